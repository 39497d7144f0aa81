use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use vitalwatch_analysis::config::BaselineConfig;
use vitalwatch_analysis::{BaselineComparator, VerdictStatus};
use vitalwatch_core::{Metric, MetricValues, PatientId, VitalRecord};

fn hour(h: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::hours(h)
}

fn reading(patient: &str, h: i64, hr: f64, spo2: f64) -> VitalRecord {
    VitalRecord::new(
        patient,
        hour(h),
        MetricValues::new()
            .with(Metric::HeartRate, hr)
            .with(Metric::Spo2, spo2),
    )
    .unwrap()
}

#[test]
fn test_constant_stream_is_normal_after_warmup() {
    let mut cmp = BaselineComparator::new(BaselineConfig::default());
    for h in 0..25 {
        cmp.update(&reading("p1", h, 72.0, 98.0));
    }
    let verdicts = cmp.compare(&reading("p1", 25, 72.0, 98.0));
    assert_eq!(verdicts.len(), 2);
    for verdict in verdicts.values() {
        assert_eq!(verdict.status, VerdictStatus::Normal);
        assert_eq!(verdict.z_score, Some(0.0));
    }
}

#[test]
fn test_sample_count_matches_updates() {
    let mut cmp = BaselineComparator::new(BaselineConfig::default());
    let pid = PatientId::from("p1");
    for n in 1..=37 {
        cmp.update(&reading("p1", n, 70.0 + n as f64, 97.0));
        assert_eq!(cmp.baseline(&pid, Metric::HeartRate).unwrap().sample_count, n as u64);
    }
    assert_eq!(cmp.baseline(&pid, Metric::Spo2).unwrap().last_updated, hour(37));
}

#[test]
fn test_insufficient_data_before_warmup() {
    let mut cmp = BaselineComparator::new(BaselineConfig::default());
    for h in 0..9 {
        cmp.update(&reading("p1", h, 70.0, 97.0));
        // wildly out of range values still can't be judged yet
        for verdict in cmp.compare(&reading("p1", h + 1, 250.0, 50.0)).values() {
            assert_eq!(verdict.status, VerdictStatus::InsufficientData);
            assert!(verdict.z_score.is_none());
        }
    }
    cmp.update(&reading("p1", 9, 70.0, 97.0));
    let verdicts = cmp.compare(&reading("p1", 10, 70.0, 97.0));
    assert!(verdicts.values().all(|v| v.status == VerdictStatus::Normal));
}

#[test]
fn test_compare_does_not_mutate() {
    let mut cmp = BaselineComparator::new(BaselineConfig::default());
    for h in 0..12 {
        cmp.update(&reading("p1", h, 70.0 + (h % 3) as f64, 97.0));
    }
    let pid = PatientId::from("p1");
    let before = cmp.baseline(&pid, Metric::HeartRate).unwrap();
    for _ in 0..5 {
        cmp.compare(&reading("p1", 20, 140.0, 90.0));
    }
    assert_eq!(cmp.baseline(&pid, Metric::HeartRate).unwrap(), before);
}

#[test]
fn test_three_patients_hourly_scenario() {
    // (patient, heart rate mean, heart rate sd, spo2 mean, spo2 sd)
    let patients = [
        ("P001", 68.0, 3.0, 98.0, 0.5),
        ("P002", 82.0, 5.0, 96.0, 1.0),
        ("P003", 75.0, 4.0, 97.0, 0.8),
    ];
    let mut rng = StdRng::seed_from_u64(2024);
    let mut cmp = BaselineComparator::new(BaselineConfig::default());

    for (pid, hr_mean, hr_sd, spo2_mean, spo2_sd) in patients {
        for h in 0..48 {
            // uniform noise scaled to the requested sd
            let hr = hr_mean + hr_sd * 3f64.sqrt() * rng.random_range(-1.0..1.0);
            let spo2 = spo2_mean + spo2_sd * 3f64.sqrt() * rng.random_range(-1.0..1.0);
            cmp.update(&reading(pid, h, hr, spo2));
        }
    }

    for (pid, ..) in patients {
        let id = PatientId::from(pid);
        let hr = cmp.baseline(&id, Metric::HeartRate).unwrap();
        let spo2 = cmp.baseline(&id, Metric::Spo2).unwrap();
        assert_eq!(hr.sample_count, 48);

        let spike = cmp.compare(&reading(pid, 48, hr.mean + 4.0 * hr.std, spo2.mean));
        assert_eq!(spike[&Metric::HeartRate].status, VerdictStatus::Critical);
        assert_eq!(spike[&Metric::Spo2].status, VerdictStatus::Normal);

        let calm = cmp.compare(&reading(pid, 48, hr.mean + 0.8 * hr.std, spo2.mean - 0.5 * spo2.std));
        assert_eq!(calm[&Metric::HeartRate].status, VerdictStatus::Normal);
        assert_eq!(calm[&Metric::Spo2].status, VerdictStatus::Normal);

        let elevated = cmp.compare(&reading(pid, 48, hr.mean - 2.5 * hr.std, spo2.mean));
        assert_eq!(elevated[&Metric::HeartRate].status, VerdictStatus::Elevated);
    }
}

#[test]
fn test_reset_returns_to_warmup() {
    let mut cmp = BaselineComparator::new(BaselineConfig::default());
    for h in 0..15 {
        cmp.update(&reading("p1", h, 70.0, 97.0));
        cmp.update(&reading("p2", h, 70.0, 97.0));
    }
    assert_eq!(cmp.reset(&"p1".into(), None), 2);

    let v = cmp.compare(&reading("p1", 16, 70.0, 97.0));
    assert!(v.values().all(|v| v.status == VerdictStatus::InsufficientData));
    let v = cmp.compare(&reading("p2", 16, 70.0, 97.0));
    assert!(v.values().all(|v| v.status == VerdictStatus::Normal));
}
