//! VitalWatch analysis: baselines, anomaly scoring and forecasting

pub mod alerting;
pub mod anomaly;
pub mod baseline;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod predictor;
pub mod reference;
pub mod stats;

pub use alerting::AlertEngine;
pub use anomaly::AnomalyDetector;
pub use baseline::{BaselineComparator, Verdict, VerdictStatus};
pub use config::{AnalysisConfig, load_config};
pub use error::AnalysisError;
pub use pipeline::{IngestOutcome, Pipeline};
pub use predictor::{Forecast, ForecastPoint, ModelSpec, TrainParams, TrainTarget, VitalSignsPredictor};
pub use reference::ReferenceRanges;
