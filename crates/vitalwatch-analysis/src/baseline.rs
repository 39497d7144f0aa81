//! Rolling per-patient baselines
//!
//! One streaming baseline per (patient, metric). `compare` is read-only and
//! `update` is explicit, so the caller decides whether a suspicious reading
//! is allowed into the baseline.

use crate::config::BaselineConfig;
use crate::stats::RunningStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};
use vitalwatch_core::{Metric, PatientId, VitalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Normal,
    Elevated,
    Critical,
    InsufficientData,
}

/// Result of comparing one metric against its baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub value: f64,
    // None while warming up
    pub z_score: Option<f64>,
    pub mean: f64,
    pub std: f64,
    pub sample_count: u64,
}

/// Snapshot of a baseline's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub mean: f64,
    pub std: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BaselineState {
    stats: RunningStats,
    last_updated: DateTime<Utc>,
}

pub struct BaselineComparator {
    config: BaselineConfig,
    baselines: HashMap<(PatientId, Metric), BaselineState>,
}

impl BaselineComparator {
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config,
            baselines: HashMap::new(),
        }
    }

    pub fn config(&self) -> &BaselineConfig {
        &self.config
    }

    /// Fold every present metric of the record into its baseline
    pub fn update(&mut self, record: &VitalRecord) {
        for (metric, value) in record.metrics().iter() {
            let state = self
                .baselines
                .entry((record.patient_id().clone(), metric))
                .or_insert_with(|| BaselineState {
                    stats: RunningStats::new(),
                    last_updated: record.timestamp(),
                });
            state.stats.push(value);
            state.last_updated = state.last_updated.max(record.timestamp());

            if state.stats.count() == self.config.warmup_samples {
                debug!(patient = %record.patient_id(), %metric, "baseline established");
            }
        }
    }

    /// Warm-start baselines from stored history
    pub fn update_from_history(&mut self, records: &[VitalRecord]) {
        for record in records {
            self.update(record);
        }
    }

    /// Classify each present metric against its baseline. Never mutates state.
    pub fn compare(&self, record: &VitalRecord) -> BTreeMap<Metric, Verdict> {
        record
            .metrics()
            .iter()
            .map(|(metric, value)| (metric, self.verdict(record.patient_id(), metric, value)))
            .collect()
    }

    fn verdict(&self, patient_id: &PatientId, metric: Metric, value: f64) -> Verdict {
        let state = self.baselines.get(&(patient_id.clone(), metric));
        let (count, mean, std) = state.map_or((0, 0.0, 0.0), |s| {
            (s.stats.count(), s.stats.mean(), s.stats.std())
        });

        if count < self.config.warmup_samples {
            return Verdict {
                status: VerdictStatus::InsufficientData,
                value,
                z_score: None,
                mean,
                std,
                sample_count: count,
            };
        }

        let z = (value - mean) / std.max(self.config.min_std);
        let status = if z.abs() > self.config.critical_z {
            VerdictStatus::Critical
        } else if z.abs() > self.config.elevated_z {
            VerdictStatus::Elevated
        } else {
            VerdictStatus::Normal
        };

        Verdict {
            status,
            value,
            z_score: Some(z),
            mean,
            std,
            sample_count: count,
        }
    }

    pub fn baseline(&self, patient_id: &PatientId, metric: Metric) -> Option<Baseline> {
        self.baselines
            .get(&(patient_id.clone(), metric))
            .map(|s| Baseline {
                mean: s.stats.mean(),
                std: s.stats.std(),
                sample_count: s.stats.count(),
                last_updated: s.last_updated,
            })
    }

    pub fn is_established(&self, patient_id: &PatientId, metric: Metric) -> bool {
        self.baseline(patient_id, metric)
            .is_some_and(|b| b.sample_count >= self.config.warmup_samples)
    }

    /// Operator reset of one metric, or every metric when `metric` is None.
    /// Returns how many baselines were dropped.
    pub fn reset(&mut self, patient_id: &PatientId, metric: Option<Metric>) -> usize {
        let before = self.baselines.len();
        self.baselines
            .retain(|(p, m), _| !(p == patient_id && metric.is_none_or(|target| *m == target)));
        let removed = before - self.baselines.len();
        info!(patient = %patient_id, ?metric, removed, "baseline reset");
        removed
    }

    pub fn reset_all(&mut self) {
        self.baselines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vitalwatch_core::MetricValues;

    fn reading(minute: i64, hr: f64) -> VitalRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        VitalRecord::new("p1", ts, MetricValues::new().with(Metric::HeartRate, hr)).unwrap()
    }

    #[test]
    fn test_zero_variance_uses_floor() {
        let mut cmp = BaselineComparator::new(BaselineConfig::default());
        for i in 0..10 {
            cmp.update(&reading(i, 70.0));
        }
        let v = &cmp.compare(&reading(11, 70.0))[&Metric::HeartRate];
        assert_eq!(v.status, VerdictStatus::Normal);
        assert_eq!(v.z_score, Some(0.0));

        let v = &cmp.compare(&reading(12, 71.0))[&Metric::HeartRate];
        assert_eq!(v.status, VerdictStatus::Critical);
    }

    #[test]
    fn test_reset_single_metric() {
        let mut cmp = BaselineComparator::new(BaselineConfig::default());
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = VitalRecord::new(
            "p1",
            ts,
            MetricValues::new().with(Metric::HeartRate, 70.0).with(Metric::Spo2, 97.0),
        )
        .unwrap();
        cmp.update(&record);

        assert_eq!(cmp.reset(&"p1".into(), Some(Metric::Spo2)), 1);
        assert!(cmp.baseline(&"p1".into(), Metric::HeartRate).is_some());
        assert!(cmp.baseline(&"p1".into(), Metric::Spo2).is_none());
        assert_eq!(cmp.reset(&"p1".into(), None), 1);
    }

    #[test]
    fn test_last_updated_tracks_latest_reading() {
        let mut cmp = BaselineComparator::new(BaselineConfig::default());
        cmp.update(&reading(30, 70.0));
        cmp.update(&reading(10, 70.0));
        let b = cmp.baseline(&"p1".into(), Metric::HeartRate).unwrap();
        assert_eq!(b.last_updated, reading(30, 70.0).timestamp());
    }
}
