use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use vitalwatch_analysis::alerting::AlertSource;
use vitalwatch_analysis::reference::RangeSeverity;
use vitalwatch_analysis::{AnalysisConfig, Pipeline, VerdictStatus};
use vitalwatch_core::{Metric, RawVitalRecord, VitalStore};

fn raw(patient: &str, minute: i64, hr: f64, spo2: f64) -> RawVitalRecord {
    let ts = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
    RawVitalRecord::new(patient, ts.to_rfc3339())
        .with_metric(Metric::HeartRate, hr)
        .with_metric(Metric::Spo2, spo2)
}

fn steady(patient: &str, n: i64) -> Vec<RawVitalRecord> {
    (0..n)
        .map(|i| raw(patient, i * 5, 72.0 + (i % 5) as f64, 97.0 + (i % 3) as f64 * 0.5))
        .collect()
}

#[test]
fn test_independent_pipelines_do_not_share_state() {
    let mut a = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
    let b = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();

    assert_eq!(a.ingest_all(steady("p1", 20)).len(), 20);
    assert_eq!(a.store().len(), 20);
    assert!(b.store().is_empty());
    assert!(b.baseline().baseline(&"p1".into(), Metric::HeartRate).is_none());
}

#[test]
fn test_anomaly_scores_appear_after_fit() {
    let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
    let early = pipeline.ingest_all(steady("p1", 40));
    assert!(early.iter().all(|o| o.anomaly_scores.is_empty()));

    let report = pipeline.fit_anomaly_from_store(&[Metric::HeartRate, Metric::Spo2]).unwrap();
    assert_eq!(report.models, 2);

    let outcome = pipeline.ingest(raw("p1", 500, 160.0, 97.5)).unwrap();
    assert_eq!(outcome.anomaly_scores.len(), 2);
    assert_eq!(outcome.anomalous_metrics(), vec![Metric::HeartRate]);
    assert_eq!(outcome.verdicts[&Metric::HeartRate].status, VerdictStatus::Critical);
    assert!(
        outcome
            .alerts
            .iter()
            .any(|a| a.key.source == AlertSource::Anomaly && a.key.metric == Metric::HeartRate)
    );
}

#[test]
fn test_reference_ranges_use_demographics() {
    let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
    let mut reading = raw("p1", 0, 130.0, 88.0);
    reading.age = Some(45);
    reading.gender = Some("F".into());

    let outcome = pipeline.ingest(reading).unwrap();
    assert_eq!(outcome.ranges.len(), 2);
    assert!(outcome.ranges.iter().all(|r| r.severity == RangeSeverity::Critical));
    assert!(outcome.has_critical());
    // baseline verdicts are still warming up, range alerts fire regardless
    assert_eq!(outcome.alerts.len(), 2);
    assert!(outcome.baseline_updated);
}

#[test]
fn test_warm_start_rebuilds_baselines() {
    let store = Arc::new(VitalStore::new());
    {
        let mut first = Pipeline::new(AnalysisConfig::default(), Arc::clone(&store)).unwrap();
        first.ingest_all(steady("p1", 15));
    }

    let mut second = Pipeline::new(AnalysisConfig::default(), Arc::clone(&store)).unwrap();
    assert!(!second.baseline().is_established(&"p1".into(), Metric::HeartRate));
    assert_eq!(second.warm_start(), 15);
    assert!(second.baseline().is_established(&"p1".into(), Metric::HeartRate));
}

#[test]
fn test_malformed_readings_skipped_in_batch() {
    let mut pipeline = Pipeline::new(AnalysisConfig::default(), Arc::new(VitalStore::new())).unwrap();
    let mut batch = steady("p1", 3);
    batch.push(RawVitalRecord::new("p1", "not a time").with_metric(Metric::HeartRate, 70.0));
    batch.push(RawVitalRecord::new("p1", "2024-07-01T01:00:00Z"));

    assert_eq!(pipeline.ingest_all(batch).len(), 3);
    assert_eq!(pipeline.store().len(), 3);
}
