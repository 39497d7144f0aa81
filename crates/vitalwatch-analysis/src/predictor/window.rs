//! Turning a patient's readings into model windows
//!
//! Imputation rule: a metric missing from a reading takes the last value
//! observed for that patient (carry-forward). Readings before every model
//! metric has been observed at least once are dropped; nothing is invented
//! for them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vitalwatch_core::{Metric, VitalRecord};

/// A reading reduced to the model's metric vector
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// One training example: `window` rows in, `horizon` rows (flattened) out
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub input: Vec<Vec<f64>>,
    pub target: Vec<f64>,
}

/// Apply carry-forward imputation to chronologically sorted records
pub fn impute(records: &[VitalRecord], metrics: &[Metric]) -> Vec<Row> {
    let mut last: Vec<Option<f64>> = vec![None; metrics.len()];
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        for (slot, metric) in last.iter_mut().zip(metrics) {
            if let Some(v) = record.get(*metric) {
                *slot = Some(v);
            }
        }
        if let Some(values) = last.iter().copied().collect::<Option<Vec<f64>>>() {
            rows.push(Row {
                timestamp: record.timestamp(),
                values,
            });
        }
    }
    rows
}

/// Overlapping windows with their next-`horizon` targets
pub fn build_samples(rows: &[Vec<f64>], window: usize, horizon: usize) -> Vec<Sample> {
    if rows.len() < window + horizon {
        return Vec::new();
    }
    (0..=rows.len() - window - horizon)
        .map(|i| Sample {
            input: rows[i..i + window].to_vec(),
            target: rows[i + window..i + window + horizon].concat(),
        })
        .collect()
}

/// Median positive gap between consecutive readings
pub fn sampling_interval(timestamps: &[DateTime<Utc>]) -> Option<Duration> {
    let mut gaps: Vec<Duration> = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > Duration::zero())
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort();
    Some(gaps[gaps.len() / 2])
}

/// Per-metric min-max scaling to [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxScaler {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit<'a>(rows: impl IntoIterator<Item = &'a Vec<f64>>, width: usize) -> Self {
        let mut min = vec![f64::INFINITY; width];
        let mut max = vec![f64::NEG_INFINITY; width];
        for row in rows {
            for (i, v) in row.iter().enumerate() {
                min[i] = min[i].min(*v);
                max[i] = max[i].max(*v);
            }
        }
        Self { min, max }
    }

    // constant metrics scale by 1 so they map to 0 instead of NaN
    fn range(&self, i: usize) -> f64 {
        let r = self.max[i] - self.min[i];
        if r > f64::EPSILON { r } else { 1.0 }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.min[i]) / self.range(i))
            .collect()
    }

    pub fn inverse(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| v * self.range(i) + self.min[i])
            .collect()
    }

    pub fn width(&self) -> usize {
        self.min.len()
    }
}
