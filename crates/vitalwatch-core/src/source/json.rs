//! JSON array source (the shape the monitoring API returns)

use super::{SourceError, VitalSource};
use crate::RawVitalRecord;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

enum Payload {
    File(PathBuf),
    Inline(String),
}

pub struct JsonSource {
    name: String,
    payload: Payload,
}

impl JsonSource {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "json".to_string(),
            payload: Payload::File(path.into()),
        }
    }

    pub fn from_str(body: impl Into<String>) -> Self {
        Self {
            name: "json".to_string(),
            payload: Payload::Inline(body.into()),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl VitalSource for JsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<RawVitalRecord>, SourceError> {
        let body = match &self.payload {
            Payload::File(path) => fs::read_to_string(path)?,
            Payload::Inline(body) => body.clone(),
        };
        // the array itself must parse; a bad element only loses that element
        let elements: Vec<serde_json::Value> = serde_json::from_str(&body)?;
        let mut records = Vec::with_capacity(elements.len());
        for (index, element) in elements.into_iter().enumerate() {
            match serde_json::from_value::<RawVitalRecord>(element) {
                Ok(raw) => records.push(raw),
                Err(e) => warn!(source = %self.name, index, error = %e, "skipping JSON element"),
            }
        }
        Ok(records)
    }
}
