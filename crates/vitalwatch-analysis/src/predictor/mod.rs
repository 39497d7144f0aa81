//! Multi-metric forecasting with a recurrent sequence model
//!
//! Training reads a snapshot of the store into local state first, so it can
//! run on a blocking worker while ingestion keeps writing. The trained model
//! is published by swapping an `Arc`; a forecast already in progress keeps
//! the model it started with.

pub mod artifact;
pub mod rnn;
pub mod window;

pub use artifact::{ForecastModel, ModelSpec};
pub use rnn::{EpochLoss, RecurrentNet};

use crate::config::PredictorConfig;
use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rnn::FitOptions;
use serde::Serialize;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use vitalwatch_core::{Metric, MetricValues, PatientId, VitalRecord, VitalStore};
use window::{MinMaxScaler, Sample};

/// Hyper-parameters for one training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub metrics: Vec<Metric>,
    pub window_length: usize,
    pub horizon: usize,
    pub epochs: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub validation_split: f64,
    pub early_stopping_patience: Option<usize>,
    pub seed: u64,
    pub timeout: Option<Duration>,
}

impl From<&PredictorConfig> for TrainParams {
    fn from(config: &PredictorConfig) -> Self {
        Self {
            metrics: config.metrics.clone(),
            window_length: config.window_length,
            horizon: config.horizon,
            epochs: config.epochs,
            hidden_size: config.hidden_size,
            learning_rate: config.learning_rate,
            batch_size: config.batch_size,
            validation_split: config.validation_split,
            early_stopping_patience: config.early_stopping_patience,
            seed: config.seed,
            timeout: config.timeout_seconds.map(Duration::from_secs),
        }
    }
}

impl TrainParams {
    pub fn spec(&self) -> ModelSpec {
        ModelSpec::new(self.window_length, self.horizon, self.metrics.clone())
    }

    /// Usable readings a patient needs before it contributes windows
    pub fn min_history(&self) -> usize {
        self.window_length + self.horizon + 1
    }
}

/// What to train on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainTarget {
    Patient(PatientId),
    // every patient in the store, sharing one model
    Corpus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochLoss>,
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub windows: usize,
    pub patients: usize,
}

impl TrainingReport {
    pub fn final_loss(&self) -> Option<&EpochLoss> {
        self.epochs.iter().find(|e| e.epoch == self.best_epoch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub values: MetricValues,
}

/// Lazily rolled-forward forecast. Each step feeds its own prediction back
/// into the window. Consuming it is the only way to get the points; rerun
/// `predict` to start over.
pub struct Forecast {
    model: Arc<ForecastModel>,
    window: VecDeque<Vec<f64>>,
    // scaled steps from the last forward pass not yet emitted
    pending: VecDeque<Vec<f64>>,
    last_timestamp: DateTime<Utc>,
    interval: chrono::Duration,
    remaining: usize,
}

impl Forecast {
    pub fn interval(&self) -> chrono::Duration {
        self.interval
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.model.spec.metrics
    }
}

impl Iterator for Forecast {
    type Item = ForecastPoint;

    fn next(&mut self) -> Option<ForecastPoint> {
        if self.remaining == 0 {
            return None;
        }
        if self.pending.is_empty() {
            let input: Vec<Vec<f64>> = self.window.iter().cloned().collect();
            let output = self.model.net.forward(&input);
            let width = self.model.spec.metrics.len();
            self.pending.extend(output.chunks(width).map(<[f64]>::to_vec));
        }

        let scaled = self.pending.pop_front()?;
        self.window.pop_front();
        self.window.push_back(scaled.clone());
        self.remaining -= 1;
        self.last_timestamp += self.interval;

        let values = self
            .model
            .spec
            .metrics
            .iter()
            .copied()
            .zip(self.model.scaler.inverse(&scaled))
            .collect();

        Some(ForecastPoint {
            timestamp: self.last_timestamp,
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Forecast {}
impl FusedIterator for Forecast {}

pub struct VitalSignsPredictor {
    store: Arc<VitalStore>,
    config: PredictorConfig,
    model: RwLock<Option<Arc<ForecastModel>>>,
}

impl VitalSignsPredictor {
    pub fn new(store: Arc<VitalStore>, config: PredictorConfig) -> Self {
        Self {
            store,
            config,
            model: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Parameters from configuration, as a starting point for overrides
    pub fn default_params(&self) -> TrainParams {
        TrainParams::from(&self.config)
    }

    pub fn model(&self) -> Option<Arc<ForecastModel>> {
        self.model.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_trained(&self) -> bool {
        self.model().is_some()
    }

    fn publish(&self, model: ForecastModel) {
        *self.model.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(model));
    }

    fn histories(&self, target: &TrainTarget) -> Vec<(PatientId, Vec<VitalRecord>)> {
        match target {
            TrainTarget::Patient(id) => vec![(id.clone(), self.store.history(id, None, None))],
            TrainTarget::Corpus => self.store.snapshot(),
        }
    }

    /// Train on the current store contents and publish the result
    pub fn train(&self, target: &TrainTarget, params: &TrainParams) -> Result<TrainingReport, AnalysisError> {
        let histories = self.histories(target);
        let (model, report) = train_model(&histories, target, params)?;
        self.publish(model);
        Ok(report)
    }

    /// Train on a blocking worker. The store is copied before the task starts;
    /// the model is published only if training succeeds.
    pub fn spawn_training(
        self: &Arc<Self>,
        target: TrainTarget,
        params: TrainParams,
    ) -> tokio::task::JoinHandle<Result<TrainingReport, AnalysisError>> {
        let histories = self.histories(&target);
        let predictor = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let (model, report) = train_model(&histories, &target, &params)?;
            predictor.publish(model);
            Ok(report)
        })
    }

    /// Forecast `steps` points for a patient from its stored history
    pub fn predict(&self, patient_id: &PatientId, steps: usize) -> Result<Forecast, AnalysisError> {
        let history = self.store.history(patient_id, None, None);
        self.forecast(patient_id.as_str(), &history, steps)
    }

    /// Forecast from an explicit chronological history
    pub fn predict_from_history(&self, history: &[VitalRecord], steps: usize) -> Result<Forecast, AnalysisError> {
        let subject = history
            .first()
            .map_or_else(|| "history".to_string(), |r| r.patient_id().to_string());
        self.forecast(&subject, history, steps)
    }

    fn forecast(&self, subject: &str, history: &[VitalRecord], steps: usize) -> Result<Forecast, AnalysisError> {
        let model = self
            .model()
            .ok_or_else(|| AnalysisError::ModelNotFitted("no forecast model trained or loaded".into()))?;

        let rows = window::impute(history, &model.spec.metrics);
        let required = model.spec.window_length.max(2);
        let insufficient = || AnalysisError::InsufficientHistory {
            subject: subject.to_string(),
            available: rows.len(),
            required,
        };
        if rows.len() < required {
            return Err(insufficient());
        }

        let timestamps: Vec<DateTime<Utc>> = rows.iter().map(|r| r.timestamp).collect();
        let interval = window::sampling_interval(&timestamps).ok_or_else(insufficient)?;
        let last_timestamp = timestamps[timestamps.len() - 1];

        let window = rows[rows.len() - model.spec.window_length..]
            .iter()
            .map(|r| model.scaler.transform(&r.values))
            .collect();

        Ok(Forecast {
            model,
            window,
            pending: VecDeque::new(),
            last_timestamp,
            interval,
            remaining: steps,
        })
    }

    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, AnalysisError> {
        artifact::artifact_path(&self.config.model_dir, name)
    }

    pub fn save(&self, name: &str) -> Result<PathBuf, AnalysisError> {
        let model = self
            .model()
            .ok_or_else(|| AnalysisError::ModelNotFitted("nothing to save".into()))?;
        artifact::save(&model, &self.config.model_dir, name)
    }

    /// Load a saved model, failing if it was trained for a different shape
    pub fn load(&self, name: &str, expected: &ModelSpec) -> Result<(), AnalysisError> {
        let model = artifact::load(&self.config.model_dir, name, expected)?;
        self.publish(model);
        Ok(())
    }
}

/// Build windows from the histories and fit a fresh network
fn train_model(
    histories: &[(PatientId, Vec<VitalRecord>)],
    target: &TrainTarget,
    params: &TrainParams,
) -> Result<(ForecastModel, TrainingReport), AnalysisError> {
    let started = Instant::now();
    let required = params.min_history();

    let mut usable: Vec<(&PatientId, Vec<Vec<f64>>)> = Vec::new();
    let mut best_available = 0;
    for (patient, records) in histories {
        let rows: Vec<Vec<f64>> = window::impute(records, &params.metrics)
            .into_iter()
            .map(|r| r.values)
            .collect();
        if rows.len() < required {
            if let TrainTarget::Patient(_) = target {
                return Err(AnalysisError::InsufficientHistory {
                    subject: patient.to_string(),
                    available: rows.len(),
                    required,
                });
            }
            warn!(patient = %patient, available = rows.len(), required, "skipping patient with short history");
            best_available = best_available.max(rows.len());
            continue;
        }
        usable.push((patient, rows));
    }

    if usable.is_empty() {
        let subject = match target {
            TrainTarget::Patient(id) => id.to_string(),
            TrainTarget::Corpus => "corpus".to_string(),
        };
        return Err(AnalysisError::InsufficientHistory {
            subject,
            available: best_available,
            required,
        });
    }

    let width = params.metrics.len();
    let scaler = MinMaxScaler::fit(usable.iter().flat_map(|(_, rows)| rows.iter()), width);

    let mut train: Vec<Sample> = Vec::new();
    let mut val: Vec<Sample> = Vec::new();
    for (_, rows) in &usable {
        let scaled: Vec<Vec<f64>> = rows.iter().map(|r| scaler.transform(r)).collect();
        let mut samples = window::build_samples(&scaled, params.window_length, params.horizon);
        // chronologically last windows validate; always keep one for training
        let n_val = ((samples.len() as f64 * params.validation_split).floor() as usize)
            .min(samples.len().saturating_sub(1));
        val.extend(samples.split_off(samples.len() - n_val));
        train.extend(samples);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut net = RecurrentNet::new(width, params.hidden_size, width * params.horizon, &mut rng);
    let opts = FitOptions {
        epochs: params.epochs,
        batch_size: params.batch_size.max(1),
        learning_rate: params.learning_rate,
        patience: params.early_stopping_patience,
        deadline: params.timeout.map(|limit| (started, limit)),
    };

    info!(
        patients = usable.len(),
        train_windows = train.len(),
        val_windows = val.len(),
        window = params.window_length,
        horizon = params.horizon,
        "training forecast model"
    );
    let outcome = rnn::fit(&mut net, &train, &val, &opts, &mut rng)?;

    let report = TrainingReport {
        epochs: outcome.epochs,
        best_epoch: outcome.best_epoch,
        stopped_early: outcome.stopped_early,
        windows: train.len() + val.len(),
        patients: usable.len(),
    };
    info!(
        best_epoch = report.best_epoch,
        stopped_early = report.stopped_early,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "forecast model trained"
    );

    Ok((ForecastModel::new(params.spec(), scaler, net), report))
}
