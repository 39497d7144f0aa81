use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use vitalwatch_analysis::config::PredictorConfig;
use vitalwatch_analysis::{AnalysisError, ModelSpec, TrainParams, TrainTarget, VitalSignsPredictor};
use vitalwatch_core::{Metric, MetricValues, PatientId, VitalRecord, VitalStore};

const METRICS: [Metric; 2] = [Metric::HeartRate, Metric::Spo2];

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 10, 6, 0, 0).unwrap()
}

fn fill(store: &VitalStore, patient: &str, n: usize) {
    for i in 0..n {
        let t = i as f64;
        let mut values = MetricValues::new().with(Metric::HeartRate, 75.0 + 6.0 * (t * 0.4).sin());
        // every fourth reading is missing spo2; carried forward
        if i % 4 != 3 {
            values.set(Metric::Spo2, 97.0 + (t * 0.25).cos());
        }
        store.append(VitalRecord::new(patient, start() + Duration::hours(i as i64), values).unwrap());
    }
}

fn config(dir: &std::path::Path) -> PredictorConfig {
    PredictorConfig {
        metrics: METRICS.to_vec(),
        window_length: 6,
        horizon: 1,
        epochs: 30,
        hidden_size: 8,
        model_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn predictor(n: usize, dir: &std::path::Path) -> VitalSignsPredictor {
    let store = Arc::new(VitalStore::new());
    fill(&store, "P001", n);
    VitalSignsPredictor::new(store, config(dir))
}

#[test]
fn test_twenty_readings_train_and_forecast_three_steps() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = predictor(20, dir.path());
    let pid = PatientId::from("P001");

    let report = predictor
        .train(&TrainTarget::Patient(pid.clone()), &predictor.default_params())
        .unwrap();
    assert_eq!(report.windows, 14);
    assert!(!report.epochs.is_empty());
    assert!(report.epochs.iter().all(|e| e.train_loss.is_finite()));
    assert!(report.epochs.iter().all(|e| e.val_loss.is_some()));

    let points: Vec<_> = predictor.predict(&pid, 3).unwrap().collect();
    assert_eq!(points.len(), 3);

    let last_seen = start() + Duration::hours(19);
    assert_eq!(points[0].timestamp, last_seen + Duration::hours(1));
    for pair in points.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
        assert_eq!(pair[1].timestamp - pair[0].timestamp, Duration::hours(1));
    }
    for p in &points {
        assert_eq!(p.values.len(), 2);
        assert!(p.values.iter().all(|(_, v)| v.is_finite()));
    }
}

#[test]
fn test_forecast_is_deterministic_and_lazy() {
    let dir = tempfile::tempdir().unwrap();
    let predictor = predictor(24, dir.path());
    let pid = PatientId::from("P001");
    predictor
        .train(&TrainTarget::Patient(pid.clone()), &predictor.default_params())
        .unwrap();

    let a: Vec<_> = predictor.predict(&pid, 5).unwrap().collect();
    let b: Vec<_> = predictor.predict(&pid, 5).unwrap().collect();
    assert_eq!(a, b);

    // taking fewer points yields the same prefix
    let prefix: Vec<_> = predictor.predict(&pid, 5).unwrap().take(2).collect();
    assert_eq!(prefix, a[..2]);

    assert_eq!(predictor.predict(&pid, 0).unwrap().count(), 0);
}

#[test]
fn test_same_seed_same_model() {
    let dir = tempfile::tempdir().unwrap();
    let pid = PatientId::from("P001");
    let a = predictor(20, dir.path());
    let b = predictor(20, dir.path());
    let ra = a.train(&TrainTarget::Patient(pid.clone()), &a.default_params()).unwrap();
    let rb = b.train(&TrainTarget::Patient(pid.clone()), &b.default_params()).unwrap();
    assert_eq!(ra, rb);
    assert_eq!(a.model().unwrap().net, b.model().unwrap().net);
}

#[test]
fn test_short_history() {
    let dir = tempfile::tempdir().unwrap();
    let pid = PatientId::from("P001");

    // window 6 + horizon 1 + 1 = 8 usable readings needed to train
    let short = predictor(7, dir.path());
    let err = short
        .train(&TrainTarget::Patient(pid.clone()), &short.default_params())
        .unwrap_err();
    match err {
        AnalysisError::InsufficientHistory { available, required, .. } => {
            assert_eq!(available, 7);
            assert_eq!(required, 8);
        }
        other => panic!("unexpected error: {other}"),
    }

    // a trained model still refuses to forecast from fewer than 6 readings
    let trained = predictor(20, dir.path());
    trained
        .train(&TrainTarget::Patient(pid.clone()), &trained.default_params())
        .unwrap();
    let history = trained.predict(&pid, 1).map(|f| f.len()).unwrap();
    assert_eq!(history, 1);

    let few: Vec<VitalRecord> = (0..5)
        .map(|i| {
            VitalRecord::new(
                "P009",
                start() + Duration::hours(i),
                MetricValues::new().with(Metric::HeartRate, 70.0).with(Metric::Spo2, 98.0),
            )
            .unwrap()
        })
        .collect();
    let err = trained.predict_from_history(&few, 3).err().unwrap();
    assert_eq!(err.kind(), "InsufficientHistory");

    let err = trained.predict(&"nobody".into(), 3).err().unwrap();
    assert_eq!(err.kind(), "InsufficientHistory");
}

#[test]
fn test_save_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let pid = PatientId::from("P001");
    let original = predictor(20, dir.path());
    original
        .train(&TrainTarget::Patient(pid.clone()), &original.default_params())
        .unwrap();
    let before: Vec<_> = original.predict(&pid, 3).unwrap().collect();
    let path = original.save("p001-hourly").unwrap();
    assert!(path.exists());

    let restored = predictor(20, dir.path());
    assert!(!restored.is_trained());
    let spec = ModelSpec::new(6, 1, METRICS.to_vec());
    restored.load("p001-hourly", &spec).unwrap();
    let after: Vec<_> = restored.predict(&pid, 3).unwrap().collect();

    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.timestamp, b.timestamp);
        for ((_, va), (_, vb)) in a.values.iter().zip(b.values.iter()) {
            assert!((va - vb).abs() < 1e-9);
        }
    }
}

#[test]
fn test_load_rejects_incompatible_shape() {
    let dir = tempfile::tempdir().unwrap();
    let pid = PatientId::from("P001");
    let original = predictor(20, dir.path());
    original
        .train(&TrainTarget::Patient(pid), &original.default_params())
        .unwrap();
    original.save("m").unwrap();

    let other = predictor(20, dir.path());
    for spec in [
        ModelSpec::new(7, 1, METRICS.to_vec()),
        ModelSpec::new(6, 2, METRICS.to_vec()),
        ModelSpec::new(6, 1, vec![Metric::Spo2, Metric::HeartRate]),
    ] {
        let err = other.load("m", &spec).unwrap_err();
        assert!(matches!(err, AnalysisError::IncompatibleModel(_)), "{spec:?}");
    }
    assert!(!other.is_trained());

    assert_eq!(other.load("missing", &ModelSpec::new(6, 1, METRICS.to_vec())).unwrap_err().kind(), "ModelNotFound");
    assert_eq!(other.save("../escape").unwrap_err().kind(), "ModelNotFitted");
    assert_eq!(original.save("../escape").unwrap_err().kind(), "InvalidModelName");
}

#[test]
fn test_training_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let pid = PatientId::from("P001");
    let predictor = predictor(40, dir.path());
    let params = TrainParams {
        epochs: 100_000,
        early_stopping_patience: None,
        timeout: Some(std::time::Duration::from_millis(50)),
        ..predictor.default_params()
    };
    let err = predictor.train(&TrainTarget::Patient(pid), &params).unwrap_err();
    assert!(matches!(err, AnalysisError::TrainingTimeout { .. }));
    assert!(err.is_recoverable());
    assert!(!predictor.is_trained());
}

#[tokio::test]
async fn test_background_training_publishes_model() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(VitalStore::new());
    fill(&store, "P001", 20);
    fill(&store, "P002", 3);
    let predictor = Arc::new(VitalSignsPredictor::new(Arc::clone(&store), config(dir.path())));

    let handle = predictor.spawn_training(TrainTarget::Corpus, predictor.default_params());
    // ingestion keeps going while training runs
    fill(&store, "P003", 12);

    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.patients, 1);
    assert!(predictor.is_trained());
    assert_eq!(predictor.predict(&"P003".into(), 2).unwrap().len(), 2);
}
