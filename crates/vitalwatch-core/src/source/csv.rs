//! Header-driven CSV source
//!
//! Recognised columns: `patient_id`, `timestamp`, `age`, `gender` and any
//! metric name. Empty cells mean the metric is absent. Rows that cannot be
//! parsed are skipped with a warning; one bad row never aborts the batch.

use super::{SourceError, VitalSource};
use crate::{Metric, RawVitalRecord, VitalRecord};
use ::csv::{ReaderBuilder, StringRecord, Trim, Writer};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// what a header column maps to
#[derive(Debug, Clone, Copy)]
enum Column {
    PatientId,
    Timestamp,
    Age,
    Gender,
    Metric(Metric),
    Ignored,
}

impl Column {
    fn from_header(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "patient_id" => Column::PatientId,
            "timestamp" => Column::Timestamp,
            "age" => Column::Age,
            "gender" => Column::Gender,
            other => Metric::from_name(other).map_or(Column::Ignored, Column::Metric),
        }
    }
}

// one output row; `None` becomes an empty cell
#[derive(Serialize)]
struct CsvRow<'a> {
    timestamp: String,
    patient_id: &'a str,
    age: Option<u32>,
    gender: Option<&'a str>,
    heart_rate: Option<f64>,
    spo2: Option<f64>,
    systolic_bp: Option<f64>,
    diastolic_bp: Option<f64>,
    respiration_rate: Option<f64>,
    temperature: Option<f64>,
}

impl<'a> From<&'a VitalRecord> for CsvRow<'a> {
    fn from(record: &'a VitalRecord) -> Self {
        Self {
            timestamp: record.timestamp().to_rfc3339(),
            patient_id: record.patient_id().as_str(),
            age: record.age(),
            gender: record.gender(),
            heart_rate: record.get(Metric::HeartRate),
            spo2: record.get(Metric::Spo2),
            systolic_bp: record.get(Metric::SystolicBp),
            diastolic_bp: record.get(Metric::DiastolicBp),
            respiration_rate: record.get(Metric::RespirationRate),
            temperature: record.get(Metric::Temperature),
        }
    }
}

pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse CSV text (header line first)
    pub fn parse(content: &str) -> Result<Vec<RawVitalRecord>, SourceError> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(content.as_bytes());

        let columns: Vec<Column> = reader.headers()?.iter().map(Column::from_header).collect();
        if columns.is_empty() {
            return Err(SourceError::Format("missing CSV header".into()));
        }
        if !columns.iter().any(|c| matches!(c, Column::PatientId)) {
            return Err(SourceError::Format("CSV header has no patient_id column".into()));
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable CSV row");
                    continue;
                }
            };
            match parse_row(&columns, &row) {
                Ok(raw) => records.push(raw),
                Err(reason) => warn!(line = row.position().map_or(0, |p| p.line()), %reason, "skipping CSV row"),
            }
        }
        Ok(records)
    }

    /// Write records in the layout `parse` reads back. Values keep full precision.
    pub fn write_records<P: AsRef<Path>>(path: P, records: &[VitalRecord]) -> Result<(), SourceError> {
        let mut writer = Writer::from_path(path)?;
        for record in records {
            writer.serialize(CsvRow::from(record))?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn parse_row(columns: &[Column], row: &StringRecord) -> Result<RawVitalRecord, String> {
    if row.len() != columns.len() {
        return Err(format!("expected {} cells, found {}", columns.len(), row.len()));
    }

    let mut raw = RawVitalRecord::default();
    for (column, cell) in columns.iter().zip(row.iter()) {
        if cell.is_empty() {
            continue;
        }
        match column {
            Column::PatientId => raw.patient_id = Some(cell.into()),
            Column::Timestamp => raw.timestamp = Some(cell.to_string()),
            Column::Age => {
                raw.age = Some(cell.parse().map_err(|_| format!("invalid age '{}'", cell))?)
            }
            Column::Gender => raw.gender = Some(cell.to_string()),
            Column::Metric(metric) => {
                let value: f64 = cell
                    .parse()
                    .map_err(|_| format!("invalid {} value '{}'", metric, cell))?;
                raw = raw.with_metric(*metric, value);
            }
            Column::Ignored => {}
        }
    }
    Ok(raw)
}

impl VitalSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self) -> Result<Vec<RawVitalRecord>, SourceError> {
        let content = fs::read_to_string(&self.path)?;
        Self::parse(&content)
    }
}
