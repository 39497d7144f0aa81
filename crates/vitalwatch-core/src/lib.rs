//! Core types for the vital-signs monitoring system
//! this crate contains the record model, the shared store and the ingestion sources.
pub mod source;
pub mod store;

pub use store::{StoreError, VitalStore};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// METRICS //

/// Vital-sign metrics known to the system (fixed universe, canonical order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Spo2,
    SystolicBp,
    DiastolicBp,
    #[serde(alias = "respiratory_rate")]
    RespirationRate,
    Temperature,
}

impl Metric {
    /// Every metric, in canonical order
    pub const ALL: [Metric; 6] = [
        Metric::HeartRate,
        Metric::Spo2,
        Metric::SystolicBp,
        Metric::DiastolicBp,
        Metric::RespirationRate,
        Metric::Temperature,
    ];

    /// Parse a metric from its column/field name (case-insensitive)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "heart_rate" => Some(Self::HeartRate),
            "spo2" => Some(Self::Spo2),
            "systolic_bp" => Some(Self::SystolicBp),
            "diastolic_bp" => Some(Self::DiastolicBp),
            "respiration_rate" | "respiratory_rate" => Some(Self::RespirationRate),
            "temperature" => Some(Self::Temperature),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::HeartRate => "heart_rate",
            Metric::Spo2 => "spo2",
            Metric::SystolicBp => "systolic_bp",
            Metric::DiastolicBp => "diastolic_bp",
            Metric::RespirationRate => "respiration_rate",
            Metric::Temperature => "temperature",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Metric::HeartRate => "Heart rate",
            Metric::Spo2 => "SpO2",
            Metric::SystolicBp => "Systolic BP",
            Metric::DiastolicBp => "Diastolic BP",
            Metric::RespirationRate => "Respiration rate",
            Metric::Temperature => "Temperature",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::HeartRate => "bpm",
            Metric::Spo2 => "%",
            Metric::SystolicBp | Metric::DiastolicBp => "mmHg",
            Metric::RespirationRate => "breaths/min",
            Metric::Temperature => "°C",
        }
    }

    // position inside MetricValues
    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metric readings with a fixed key universe; any metric may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricValues {
    values: [Option<f64>; 6],
}

impl MetricValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.index()]
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        self.values[metric.index()] = Some(value);
    }

    /// Builder-style insert
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.get(metric).is_some()
    }

    /// Present metrics in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .iter()
            .filter_map(move |m| self.get(*m).map(|v| (*m, v)))
    }

    pub fn len(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(Metric, f64)> for MetricValues {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        let mut values = MetricValues::new();
        for (metric, value) in iter {
            values.set(metric, value);
        }
        values
    }
}

// serialised as an object holding only the present metrics
impl Serialize for MetricValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (metric, value) in self.iter() {
            map.serialize_entry(metric.name(), &value)?;
        }
        map.end()
    }
}

// PATIENT ID //

/// Opaque, stable patient identifier. Integer ids from sources are kept as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PatientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PatientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for PatientId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for PatientId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(u64),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => Ok(PatientId(s)),
            Repr::Number(n) => Ok(PatientId(n.to_string())),
        }
    }
}

// ERRORS //

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

// RAW RECORD (what sources produce) //

/// Raw vital-sign reading as produced by an ingestion source.
/// Nothing is validated yet; metric fields sit next to the identifying ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawVitalRecord {
    #[serde(default)]
    pub patient_id: Option<PatientId>,

    #[serde(default)]
    pub timestamp: Option<String>,

    #[serde(default)]
    pub age: Option<u32>,

    #[serde(default)]
    pub gender: Option<String>,

    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl RawVitalRecord {
    pub fn new(patient_id: impl Into<PatientId>, timestamp: impl Into<String>) -> Self {
        Self {
            patient_id: Some(patient_id.into()),
            timestamp: Some(timestamp.into()),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: Metric, value: f64) -> Self {
        self.fields.insert(metric.name().to_string(), serde_json::json!(value));
        self
    }
}

// VITAL RECORD //

/// A validated, immutable vital-sign reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVitalRecord")]
pub struct VitalRecord {
    patient_id: PatientId,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gender: Option<String>,
    #[serde(flatten)]
    metrics: MetricValues,
}

impl VitalRecord {
    /// Build a record, rejecting empty ids, empty metric sets and non-finite values
    pub fn new(
        patient_id: impl Into<PatientId>,
        timestamp: DateTime<Utc>,
        metrics: MetricValues,
    ) -> Result<Self, RecordError> {
        let patient_id = patient_id.into();
        if patient_id.is_empty() {
            return Err(RecordError::MalformedRecord("patient_id is empty".into()));
        }
        if metrics.is_empty() {
            return Err(RecordError::MalformedRecord(format!(
                "record for patient {} has no metrics",
                patient_id
            )));
        }
        if let Some((metric, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(RecordError::MalformedRecord(format!(
                "{} has non-finite value {}",
                metric, value
            )));
        }
        Ok(Self {
            patient_id,
            timestamp,
            age: None,
            gender: None,
            metrics,
        })
    }

    /// Attach demographic context used by reference range checks
    pub fn with_demographics(mut self, age: Option<u32>, gender: Option<String>) -> Self {
        self.age = age;
        self.gender = gender;
        self
    }

    /// Validate and convert a raw source record
    pub fn from_raw(raw: RawVitalRecord) -> Result<Self, RecordError> {
        let patient_id = raw
            .patient_id
            .ok_or_else(|| RecordError::MalformedRecord("missing patient_id".into()))?;
        let timestamp = raw
            .timestamp
            .as_deref()
            .ok_or_else(|| RecordError::MalformedRecord("missing timestamp".into()))
            .and_then(parse_timestamp)?;

        let mut metrics = MetricValues::new();
        for (key, value) in &raw.fields {
            let Some(metric) = Metric::from_name(key) else {
                continue; // extra source fields are carried by nobody
            };
            match metric_value(value) {
                Some(Ok(v)) => metrics.set(metric, v),
                Some(Err(())) => {
                    return Err(RecordError::MalformedRecord(format!(
                        "{} is not numeric: {}",
                        metric, value
                    )))
                }
                None => {} // null or empty means absent
            }
        }

        Ok(Self::new(patient_id, timestamp, metrics)?.with_demographics(raw.age, raw.gender))
    }

    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metrics(&self) -> &MetricValues {
        &self.metrics
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.metrics.get(metric)
    }

    pub fn age(&self) -> Option<u32> {
        self.age
    }

    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref()
    }
}

impl TryFrom<RawVitalRecord> for VitalRecord {
    type Error = RecordError;

    fn try_from(raw: RawVitalRecord) -> Result<Self, Self::Error> {
        VitalRecord::from_raw(raw)
    }
}

// Some(Ok) numeric, Some(Err) garbage, None absent
fn metric_value(value: &serde_json::Value) -> Option<Result<f64, ()>> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => Some(n.as_f64().ok_or(())),
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.trim().parse::<f64>().map_err(|_| ())),
        _ => Some(Err(())),
    }
}

/// Parse RFC 3339, or a naive ISO-8601 timestamp interpreted as UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, RecordError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RecordError::MalformedRecord("empty timestamp".into()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(RecordError::MalformedRecord(format!("unparseable timestamp: {}", s)))
}
