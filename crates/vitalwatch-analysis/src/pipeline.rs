//! Pipeline context that wires the store to every analysis component
//!
//! Owned by whoever drives it (CLI, dashboard, a test). Nothing in here is
//! process-global, so independent pipelines can run side by side.

use crate::alerting::{ActiveAlert, AlertEngine, AlertSource, Finding, Severity};
use crate::anomaly::{AnomalyDetector, FitReport};
use crate::baseline::{BaselineComparator, Verdict, VerdictStatus};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::predictor::VitalSignsPredictor;
use crate::reference::{RangeAlert, RangeSeverity, ReferenceRanges};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vitalwatch_core::{Metric, RawVitalRecord, VitalRecord, VitalStore};

/// Everything learned from one reading
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub record: VitalRecord,
    pub verdicts: BTreeMap<Metric, Verdict>,
    // empty until the anomaly detector has been fitted
    pub anomaly_scores: BTreeMap<Metric, f64>,
    pub anomalies: BTreeMap<Metric, bool>,
    pub ranges: Vec<RangeAlert>,
    pub baseline_updated: bool,
    pub alerts: Vec<ActiveAlert>,
}

impl IngestOutcome {
    pub fn has_critical(&self) -> bool {
        self.verdicts.values().any(|v| v.status == VerdictStatus::Critical)
            || self.ranges.iter().any(|r| r.severity == RangeSeverity::Critical)
    }

    pub fn anomalous_metrics(&self) -> Vec<Metric> {
        self.anomalies
            .iter()
            .filter_map(|(m, flagged)| flagged.then_some(*m))
            .collect()
    }
}

pub struct Pipeline {
    config: AnalysisConfig,
    store: Arc<VitalStore>,
    baseline: BaselineComparator,
    ranges: ReferenceRanges,
    anomaly: Arc<AnomalyDetector>,
    predictor: Arc<VitalSignsPredictor>,
    alerts: AlertEngine,
}

impl Pipeline {
    /// Build every component from configuration. Reference ranges come from
    /// the configured table, or the built-in adult table when none is set.
    pub fn new(config: AnalysisConfig, store: Arc<VitalStore>) -> Result<Self, AnalysisError> {
        config.validate()?;

        let ranges = match &config.monitor.reference_ranges {
            Some(path) => {
                let ranges = ReferenceRanges::load(path)?;
                info!(path = %path.display(), entries = ranges.len(), "loaded reference ranges");
                ranges
            }
            None => ReferenceRanges::standard(),
        };

        Ok(Self {
            baseline: BaselineComparator::new(config.baseline.clone()),
            anomaly: Arc::new(AnomalyDetector::new(config.anomaly.clone())),
            predictor: Arc::new(VitalSignsPredictor::new(Arc::clone(&store), config.predictor.clone())),
            alerts: AlertEngine::new(&config.alerts),
            ranges,
            store,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VitalStore> {
        &self.store
    }

    pub fn baseline(&self) -> &BaselineComparator {
        &self.baseline
    }

    pub fn anomaly(&self) -> &Arc<AnomalyDetector> {
        &self.anomaly
    }

    pub fn predictor(&self) -> &Arc<VitalSignsPredictor> {
        &self.predictor
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    /// Validate a raw reading, store it and analyze it
    pub fn ingest(&mut self, raw: RawVitalRecord) -> Result<IngestOutcome, AnalysisError> {
        let record = VitalRecord::from_raw(raw)?;
        self.ingest_record(record)
    }

    pub fn ingest_record(&mut self, record: VitalRecord) -> Result<IngestOutcome, AnalysisError> {
        self.store.append(record.clone());

        // compare before update so the reading is judged against its past
        let verdicts = self.baseline.compare(&record);

        // only metrics with a model; per-patient scope may have none for this patient yet
        let scorable = self.anomaly.scorable_metrics(&record);
        let anomaly_scores = match self.anomaly.score_metrics(&record, &scorable) {
            Ok(scores) => scores,
            // a refit swapped a smaller model set in between
            Err(AnalysisError::ModelNotFitted(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        let threshold = self.config.anomaly.threshold;
        let anomalies: BTreeMap<Metric, bool> = anomaly_scores
            .iter()
            .map(|(m, s)| (*m, *s > threshold))
            .collect();

        let ranges = self.ranges.check(&record);

        let critical = verdicts.values().any(|v| v.status == VerdictStatus::Critical);
        let baseline_updated = !(critical && self.config.monitor.skip_critical_updates);
        if baseline_updated {
            self.baseline.update(&record);
        } else {
            debug!(patient = %record.patient_id(), "critical reading kept out of baseline");
        }

        let findings = collect_findings(&record, &verdicts, &anomaly_scores, &anomalies, &ranges);
        let alerts = self.alerts.process_findings_at(findings, record.timestamp());
        for alert in &alerts {
            warn!(
                patient = %alert.key.patient_id,
                metric = %alert.key.metric,
                severity = ?alert.severity,
                "{}",
                alert.message
            );
        }

        Ok(IngestOutcome {
            record,
            verdicts,
            anomaly_scores,
            anomalies,
            ranges,
            baseline_updated,
            alerts,
        })
    }

    /// Ingest a batch, logging and skipping malformed readings
    pub fn ingest_all(&mut self, raws: Vec<RawVitalRecord>) -> Vec<IngestOutcome> {
        let mut outcomes = Vec::with_capacity(raws.len());
        for raw in raws {
            match self.ingest(raw) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(kind = e.kind(), "rejected reading: {}", e),
            }
        }
        outcomes
    }

    /// Rebuild baselines from everything already in the store
    pub fn warm_start(&mut self) -> usize {
        let mut count = 0;
        for (_, history) in self.store.snapshot() {
            count += history.len();
            self.baseline.update_from_history(&history);
        }
        info!(readings = count, "baselines warmed from store");
        count
    }

    /// Fit anomaly models on all stored history (configured metrics if empty)
    pub fn fit_anomaly_from_store(&self, metrics: &[Metric]) -> Result<FitReport, AnalysisError> {
        let metrics = if metrics.is_empty() {
            self.config.anomaly.metrics.as_slice()
        } else {
            metrics
        };
        self.anomaly.fit_from_store(&self.store, metrics)
    }
}

fn collect_findings(
    record: &VitalRecord,
    verdicts: &BTreeMap<Metric, Verdict>,
    scores: &BTreeMap<Metric, f64>,
    anomalies: &BTreeMap<Metric, bool>,
    ranges: &[RangeAlert],
) -> Vec<Finding> {
    let finding = |metric, source, severity, message: String, value| Finding {
        patient_id: record.patient_id().clone(),
        metric,
        source,
        severity,
        message,
        value,
    };
    let mut findings = Vec::new();

    for (metric, verdict) in verdicts {
        let severity = match verdict.status {
            VerdictStatus::Elevated => Severity::Warning,
            VerdictStatus::Critical => Severity::Critical,
            _ => continue,
        };
        let z = verdict.z_score.unwrap_or_default();
        findings.push(finding(
            *metric,
            AlertSource::Baseline,
            severity,
            format!("{} {:.1} is {:+.1} sd from baseline {:.1}", metric, verdict.value, z, verdict.mean),
            verdict.value,
        ));
    }

    for (metric, flagged) in anomalies {
        if !flagged {
            continue;
        }
        let value = record.get(*metric).unwrap_or_default();
        let score = scores.get(metric).copied().unwrap_or_default();
        findings.push(finding(
            *metric,
            AlertSource::Anomaly,
            Severity::Warning,
            format!("{} {:.1} looks anomalous (score {:.2})", metric, value, score),
            value,
        ));
    }

    for alert in ranges {
        let severity = match alert.severity {
            RangeSeverity::Normal => continue,
            RangeSeverity::Warning => Severity::Warning,
            RangeSeverity::Critical => Severity::Critical,
        };
        findings.push(finding(
            alert.metric,
            AlertSource::ReferenceRange,
            severity,
            alert.message.clone(),
            alert.value,
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn raw(minute: i64, hr: f64) -> RawVitalRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        RawVitalRecord::new("p1", ts.to_rfc3339()).with_metric(Metric::HeartRate, hr)
    }

    #[test]
    fn test_critical_reading_skips_baseline() {
        let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
        for i in 0..10 {
            pipeline.ingest(raw(i, 70.0 + (i % 2) as f64)).unwrap();
        }
        let outcome = pipeline.ingest(raw(10, 150.0)).unwrap();
        assert_eq!(outcome.verdicts[&Metric::HeartRate].status, VerdictStatus::Critical);
        assert!(!outcome.baseline_updated);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(pipeline.store().len(), 11);

        let b = pipeline.baseline().baseline(&"p1".into(), Metric::HeartRate).unwrap();
        assert_eq!(b.sample_count, 10);
    }

    #[test]
    fn test_unfitted_metric_does_not_drop_fitted_scores() {
        let mut config = AnalysisConfig::default();
        config.anomaly.min_training_samples = 10;
        let mut pipeline = Pipeline::new(config, Arc::new(VitalStore::new())).unwrap();
        for i in 0..20 {
            pipeline.ingest(raw(i, 70.0 + (i % 5) as f64)).unwrap();
        }
        pipeline.fit_anomaly_from_store(&[Metric::HeartRate]).unwrap();

        let with_temp = raw(20, 72.0).with_metric(Metric::Temperature, 37.0);
        let outcome = pipeline.ingest(with_temp).unwrap();
        assert!(outcome.anomaly_scores.contains_key(&Metric::HeartRate));
        assert!(!outcome.anomaly_scores.contains_key(&Metric::Temperature));
    }

    #[test]
    fn test_malformed_reading_is_not_stored() {
        let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
        let err = pipeline.ingest(RawVitalRecord::new("p1", "2024-01-01T00:00:00Z")).unwrap_err();
        assert_eq!(err.kind(), "MalformedRecord");
        assert!(pipeline.store().is_empty());
    }
}
