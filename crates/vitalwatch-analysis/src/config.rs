//! Configuration for the analysis pipeline
//!
//! Every section is optional in the TOML file; missing keys take the defaults below.

use crate::error::AnalysisError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use vitalwatch_core::Metric;

// Main config structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub baseline: BaselineConfig,
    pub anomaly: AnomalyConfig,
    pub predictor: PredictorConfig,
    pub alerts: AlertConfig,
    pub monitor: MonitorConfig,
}

// Rolling baseline thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    // samples needed before a baseline gives verdicts
    pub warmup_samples: u64,

    // |z| above this is elevated
    pub elevated_z: f64,

    // |z| above this is critical
    pub critical_z: f64,

    // floor for the standard deviation
    pub min_std: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            warmup_samples: 10,
            elevated_z: 2.0,
            critical_z: 3.0,
            min_std: 1e-6,
        }
    }
}

/// Whether anomaly models are shared across patients or fitted per patient
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelScope {
    #[default]
    PerMetric,
    PerPatient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub scope: ModelScope,
    pub metrics: Vec<Metric>,
    pub n_trees: usize,
    pub sample_size: usize,
    pub min_training_samples: usize,
    // default cut-off applied by classify
    pub threshold: f64,
    pub seed: u64,
    pub fit_timeout_seconds: Option<u64>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            scope: ModelScope::PerMetric,
            metrics: Metric::ALL.to_vec(),
            n_trees: 100,
            sample_size: 256,
            min_training_samples: 30,
            threshold: 0.6,
            seed: 42,
            fit_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    // ordered metric set the model is trained on
    pub metrics: Vec<Metric>,
    pub window_length: usize,
    pub horizon: usize,
    pub epochs: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub validation_split: f64,
    // 0 disables early stopping
    pub early_stopping_patience: Option<usize>,
    pub seed: u64,
    pub timeout_seconds: Option<u64>,
    pub model_dir: PathBuf,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            metrics: Metric::ALL.to_vec(),
            window_length: 7,
            horizon: 1,
            epochs: 100,
            hidden_size: 16,
            learning_rate: 0.01,
            batch_size: 16,
            validation_split: 0.2,
            early_stopping_patience: Some(10),
            seed: 42,
            timeout_seconds: None,
            model_dir: PathBuf::from("models"),
        }
    }
}

// Alert deduplication, cooldowns in minutes per finding source
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub baseline_cooldown_minutes: u64,
    pub anomaly_cooldown_minutes: u64,
    pub range_cooldown_minutes: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            baseline_cooldown_minutes: 10,
            anomaly_cooldown_minutes: 10,
            range_cooldown_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    // seconds between polls of the sources
    pub interval_seconds: u64,

    // keep critical readings out of the baseline so they don't drag it
    pub skip_critical_updates: bool,

    // optional reference range table (JSON)
    pub reference_ranges: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            skip_critical_updates: true,
            reference_ranges: None,
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let b = &self.baseline;
        if b.elevated_z <= 0.0 || b.critical_z < b.elevated_z {
            return Err(AnalysisError::InvalidConfig(format!(
                "baseline thresholds must satisfy 0 < elevated_z <= critical_z (got {} / {})",
                b.elevated_z, b.critical_z
            )));
        }
        if b.min_std <= 0.0 {
            return Err(AnalysisError::InvalidConfig("baseline.min_std must be positive".into()));
        }

        let a = &self.anomaly;
        if a.n_trees == 0 || a.sample_size < 2 {
            return Err(AnalysisError::InvalidConfig(
                "anomaly.n_trees must be > 0 and anomaly.sample_size >= 2".into(),
            ));
        }
        if a.min_training_samples < 2 {
            return Err(AnalysisError::InvalidConfig(
                "anomaly.min_training_samples must be at least 2".into(),
            ));
        }

        let p = &self.predictor;
        if p.metrics.is_empty() {
            return Err(AnalysisError::InvalidConfig("predictor.metrics is empty".into()));
        }
        if p.window_length == 0 || p.horizon == 0 || p.hidden_size == 0 || p.batch_size == 0 {
            return Err(AnalysisError::InvalidConfig(
                "predictor window_length, horizon, hidden_size and batch_size must be > 0".into(),
            ));
        }
        if !(0.0..1.0).contains(&p.validation_split) {
            return Err(AnalysisError::InvalidConfig(
                "predictor.validation_split must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

// Load configuration from a TOML file

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AnalysisConfig, AnalysisError> {
    let content = fs::read_to_string(path)?;
    let config: AnalysisConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[baseline]
warmup_samples = 12
critical_z = 3.5

[anomaly]
scope = "per_patient"
metrics = ["heart_rate", "spo2"]

[predictor]
window_length = 6
early_stopping_patience = 5

[monitor]
interval_seconds = 1
"#;
        let config: AnalysisConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.baseline.warmup_samples, 12);
        assert_eq!(config.baseline.elevated_z, 2.0);
        assert_eq!(config.baseline.critical_z, 3.5);
        assert_eq!(config.anomaly.scope, ModelScope::PerPatient);
        assert_eq!(config.anomaly.metrics, vec![Metric::HeartRate, Metric::Spo2]);
        assert_eq!(config.predictor.window_length, 6);
        assert_eq!(config.predictor.early_stopping_patience, Some(5));
        assert_eq!(config.monitor.interval_seconds, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config: AnalysisConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.anomaly.min_training_samples, 30);
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = AnalysisConfig::default();
        config.baseline.critical_z = 1.0;
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
    }
}
