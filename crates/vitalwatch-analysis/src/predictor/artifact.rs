//! Named forecast model artifacts on disk

use super::rnn::RecurrentNet;
use super::window::MinMaxScaler;
use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;
use vitalwatch_core::Metric;

pub const FORMAT_VERSION: u32 = 1;

/// The shape a model was trained for. Must match exactly to be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub window_length: usize,
    pub horizon: usize,
    pub metrics: Vec<Metric>,
}

impl ModelSpec {
    pub fn new(window_length: usize, horizon: usize, metrics: Vec<Metric>) -> Self {
        Self {
            window_length,
            horizon,
            metrics,
        }
    }

    /// Describe every difference from `other`, or None if identical
    pub fn mismatch(&self, other: &ModelSpec) -> Option<String> {
        let mut diffs = Vec::new();
        if self.window_length != other.window_length {
            diffs.push(format!(
                "window_length {} != {}",
                self.window_length, other.window_length
            ));
        }
        if self.horizon != other.horizon {
            diffs.push(format!("horizon {} != {}", self.horizon, other.horizon));
        }
        if self.metrics != other.metrics {
            let names = |m: &[Metric]| m.iter().map(|m| m.name()).collect::<Vec<_>>().join(",");
            diffs.push(format!(
                "metrics [{}] != [{}]",
                names(&self.metrics),
                names(&other.metrics)
            ));
        }
        (!diffs.is_empty()).then(|| diffs.join("; "))
    }
}

/// Trained network plus everything needed to run it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub format_version: u32,
    pub spec: ModelSpec,
    pub scaler: MinMaxScaler,
    pub net: RecurrentNet,
    pub trained_at: DateTime<Utc>,
}

impl ForecastModel {
    pub fn new(spec: ModelSpec, scaler: MinMaxScaler, net: RecurrentNet) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            spec,
            scaler,
            net,
            trained_at: Utc::now(),
        }
    }

    /// Structural checks on a deserialized model
    fn check_integrity(&self) -> Result<(), AnalysisError> {
        let n = self.spec.metrics.len();
        if self.format_version != FORMAT_VERSION {
            return Err(AnalysisError::IncompatibleModel(format!(
                "format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        if self.scaler.width() != n
            || self.scaler.max.len() != n
            || self.net.input_size != n
            || self.net.output_size != n * self.spec.horizon
            || !self.net.is_consistent()
        {
            return Err(AnalysisError::IncompatibleModel(
                "weights do not match the declared window/metric shape".into(),
            ));
        }
        Ok(())
    }
}

/// Reject names that could escape the model directory
pub fn validate_name(name: &str) -> Result<(), AnalysisError> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(AnalysisError::InvalidModelName(name.to_string()))
    }
}

pub fn artifact_path(dir: &Path, name: &str) -> Result<PathBuf, AnalysisError> {
    validate_name(name)?;
    Ok(dir.join(format!("{}.json", name)))
}

pub fn save(model: &ForecastModel, dir: &Path, name: &str) -> Result<PathBuf, AnalysisError> {
    let path = artifact_path(dir, name)?;
    fs::create_dir_all(dir)?;

    // write then rename so a reader never sees half a file
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(model)?)?;
    fs::rename(&tmp, &path)?;

    info!(model = name, path = %path.display(), "forecast model saved");
    Ok(path)
}

/// Load a model and check it against the shape the caller intends to use
pub fn load(dir: &Path, name: &str, expected: &ModelSpec) -> Result<ForecastModel, AnalysisError> {
    let path = artifact_path(dir, name)?;
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AnalysisError::ModelNotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let model: ForecastModel = serde_json::from_slice(&bytes)
        .map_err(|e| AnalysisError::IncompatibleModel(format!("unreadable artifact '{}': {}", name, e)))?;
    model.check_integrity()?;

    if let Some(diff) = model.spec.mismatch(expected) {
        return Err(AnalysisError::IncompatibleModel(format!("'{}': {}", name, diff)));
    }

    info!(model = name, trained_at = %model.trained_at, "forecast model loaded");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model(window: usize) -> ForecastModel {
        let mut rng = StdRng::seed_from_u64(0);
        let spec = ModelSpec::new(window, 1, vec![Metric::HeartRate, Metric::Spo2]);
        let scaler = MinMaxScaler::fit(&[vec![60.0, 95.0], vec![90.0, 99.0]], 2);
        ForecastModel::new(spec, scaler, RecurrentNet::new(2, 4, 2, &mut rng))
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("hr-model_v2.1").is_ok());
        for bad in ["", "..", "a/b", "..\\x", "with space"] {
            assert!(matches!(validate_name(bad), Err(AnalysisError::InvalidModelName(_))));
        }
    }

    #[test]
    fn test_round_trip_and_spec_check() {
        let dir = tempfile::tempdir().unwrap();
        let saved = model(6);
        save(&saved, dir.path(), "m").unwrap();

        let loaded = load(dir.path(), "m", &saved.spec).unwrap();
        assert_eq!(loaded, saved);

        let other = ModelSpec::new(7, 1, saved.spec.metrics.clone());
        let err = load(dir.path(), "m", &other).unwrap_err();
        assert_eq!(err.kind(), "IncompatibleModel");
        assert!(err.to_string().contains("window_length 6 != 7"));
    }

    #[test]
    fn test_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let spec = model(6).spec;
        assert!(matches!(
            load(dir.path(), "nope", &spec),
            Err(AnalysisError::ModelNotFound(_))
        ));

        fs::write(dir.path().join("bad.json"), "{\"format_version\": 1}").unwrap();
        assert!(matches!(
            load(dir.path(), "bad", &spec),
            Err(AnalysisError::IncompatibleModel(_))
        ));
    }
}
