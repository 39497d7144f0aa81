//! Unsupervised anomaly scoring
//!
//! One isolation forest per metric (or per patient and metric). Fitting
//! builds a complete new model set and swaps it in under a write lock, so a
//! scoring call in flight keeps the `Arc` it already holds and never sees a
//! half-trained set.

pub mod isolation;

pub use isolation::IsolationForest;

use crate::config::{AnomalyConfig, ModelScope};
use crate::error::AnalysisError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use vitalwatch_core::{Metric, PatientId, VitalRecord, VitalStore};

// which readings a forest was fitted on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModelKey {
    patient: Option<PatientId>,
    metric: Metric,
}

#[derive(Debug, Default)]
struct FittedModels {
    forests: HashMap<ModelKey, Arc<IsolationForest>>,
}

/// Summary of one fit call
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub models: usize,
    // training samples per metric (summed over patients in per-patient scope)
    pub samples: BTreeMap<Metric, usize>,
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    models: RwLock<Arc<FittedModels>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            models: RwLock::new(Arc::new(FittedModels::default())),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    fn current(&self) -> Arc<FittedModels> {
        Arc::clone(&self.models.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Fit one forest per requested metric from a batch of historical records.
    /// Records missing a metric simply don't contribute to that metric's model.
    /// Any metric below the minimum batch size fails the whole call and leaves
    /// the existing models untouched.
    pub fn fit(&self, records: &[VitalRecord], metrics: &[Metric]) -> Result<FitReport, AnalysisError> {
        let started = Instant::now();
        let deadline = self.config.fit_timeout_seconds.map(Duration::from_secs);

        let groups = self.group_training_values(records, metrics);

        // validate everything before growing a single tree
        for ((_, metric), values) in &groups {
            if values.len() < self.config.min_training_samples {
                return Err(AnalysisError::InsufficientTrainingData {
                    metric: *metric,
                    samples: values.len(),
                    required: self.config.min_training_samples,
                });
            }
        }
        if groups.is_empty() {
            // nothing to fit on at all: report the first requested metric
            let metric = metrics.first().copied().unwrap_or(Metric::HeartRate);
            return Err(AnalysisError::InsufficientTrainingData {
                metric,
                samples: 0,
                required: self.config.min_training_samples,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut fitted = Vec::with_capacity(groups.len());
        let mut samples: BTreeMap<Metric, usize> = BTreeMap::new();

        // BTreeMap order keeps the rng stream, and so the forests, reproducible
        for ((patient, metric), values) in groups {
            if let Some(limit) = deadline {
                if started.elapsed() > limit {
                    return Err(AnalysisError::FitTimeout {
                        elapsed: started.elapsed(),
                        models_fitted: fitted.len(),
                    });
                }
            }
            let forest =
                IsolationForest::fit(&values, self.config.n_trees, self.config.sample_size, &mut rng);
            debug!(?patient, %metric, samples = values.len(), "fitted isolation forest");
            *samples.entry(metric).or_default() += values.len();
            fitted.push((ModelKey { patient, metric }, Arc::new(forest)));
        }

        let models = fitted.len();
        self.swap_in(fitted);
        info!(models, elapsed_ms = started.elapsed().as_millis() as u64, "anomaly models fitted");

        Ok(FitReport { models, samples })
    }

    /// Fit on every stored reading. The store snapshot is taken up front.
    pub fn fit_from_store(&self, store: &VitalStore, metrics: &[Metric]) -> Result<FitReport, AnalysisError> {
        let records: Vec<VitalRecord> = store.snapshot().into_iter().flat_map(|(_, h)| h).collect();
        self.fit(&records, metrics)
    }

    /// Fit on a background worker; the store is copied before the task starts
    pub fn spawn_fit(
        self: &Arc<Self>,
        store: &VitalStore,
        metrics: Vec<Metric>,
    ) -> tokio::task::JoinHandle<Result<FitReport, AnalysisError>> {
        let records: Vec<VitalRecord> = store.snapshot().into_iter().flat_map(|(_, h)| h).collect();
        let detector = Arc::clone(self);
        tokio::task::spawn_blocking(move || detector.fit(&records, &metrics))
    }

    fn group_training_values(
        &self,
        records: &[VitalRecord],
        metrics: &[Metric],
    ) -> BTreeMap<(Option<PatientId>, Metric), Vec<f64>> {
        let mut groups: BTreeMap<(Option<PatientId>, Metric), Vec<f64>> = BTreeMap::new();

        // in global scope every requested metric gets a group, even an empty one
        if self.config.scope == ModelScope::PerMetric {
            for metric in metrics {
                groups.entry((None, *metric)).or_default();
            }
        }

        for record in records {
            let patient = match self.config.scope {
                ModelScope::PerMetric => None,
                ModelScope::PerPatient => Some(record.patient_id().clone()),
            };
            for metric in metrics {
                if let Some(value) = record.get(*metric) {
                    groups.entry((patient.clone(), *metric)).or_default().push(value);
                }
            }
        }
        groups
    }

    // the new set replaces the old one outright; metrics left out of a refit lose their model
    fn swap_in(&self, fitted: Vec<(ModelKey, Arc<IsolationForest>)>) {
        let forests = fitted.into_iter().collect();
        *self.models.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(FittedModels { forests });
    }

    fn key_for(&self, record: &VitalRecord, metric: Metric) -> ModelKey {
        ModelKey {
            patient: match self.config.scope {
                ModelScope::PerMetric => None,
                ModelScope::PerPatient => Some(record.patient_id().clone()),
            },
            metric,
        }
    }

    /// Metrics with a fitted model (for any patient in per-patient scope)
    pub fn fitted_metrics(&self) -> Vec<Metric> {
        let models = self.current();
        let mut metrics: Vec<Metric> = models.forests.keys().map(|k| k.metric).collect();
        metrics.sort();
        metrics.dedup();
        metrics
    }

    pub fn is_fitted(&self) -> bool {
        !self.current().forests.is_empty()
    }

    /// Continuous scores for every metric the record carries. A carried metric
    /// with no model for this record is `ModelNotFitted`, never silently dropped.
    pub fn score(&self, record: &VitalRecord) -> Result<BTreeMap<Metric, f64>, AnalysisError> {
        let models = self.current();
        let present: Vec<Metric> = record.metrics().iter().map(|(m, _)| m).collect();
        if let Some(missing) = present
            .iter()
            .find(|m| !models.forests.contains_key(&self.key_for(record, **m)))
        {
            return Err(AnalysisError::ModelNotFitted(format!(
                "no {} anomaly model for patient {}",
                missing,
                record.patient_id()
            )));
        }
        Ok(score_with(&models, |m| self.key_for(record, m), record, &present))
    }

    /// Metrics the record carries that have a model for this record
    pub fn scorable_metrics(&self, record: &VitalRecord) -> Vec<Metric> {
        let models = self.current();
        record
            .metrics()
            .iter()
            .map(|(m, _)| m)
            .filter(|m| models.forests.contains_key(&self.key_for(record, *m)))
            .collect()
    }

    /// Scores for specific metrics. Any requested metric without a model is
    /// `ModelNotFitted`; metrics absent from the record are left out.
    pub fn score_metrics(
        &self,
        record: &VitalRecord,
        metrics: &[Metric],
    ) -> Result<BTreeMap<Metric, f64>, AnalysisError> {
        let models = self.current();
        if let Some(missing) = metrics
            .iter()
            .find(|m| !models.forests.contains_key(&self.key_for(record, **m)))
        {
            return Err(AnalysisError::ModelNotFitted(format!("{} anomaly model", missing)));
        }
        Ok(score_with(&models, |m| self.key_for(record, m), record, metrics))
    }

    /// Threshold scores into anomaly flags (`None` uses the configured threshold)
    pub fn classify(
        &self,
        record: &VitalRecord,
        threshold: Option<f64>,
    ) -> Result<BTreeMap<Metric, bool>, AnalysisError> {
        let threshold = threshold.unwrap_or(self.config.threshold);
        Ok(self
            .score(record)?
            .into_iter()
            .map(|(metric, score)| (metric, score > threshold))
            .collect())
    }
}

fn score_with(
    models: &FittedModels,
    key: impl Fn(Metric) -> ModelKey,
    record: &VitalRecord,
    metrics: &[Metric],
) -> BTreeMap<Metric, f64> {
    metrics
        .iter()
        .filter_map(|metric| {
            let value = record.get(*metric)?;
            let forest = models.forests.get(&key(*metric))?;
            Some((*metric, forest.score(value)))
        })
        .collect()
}
