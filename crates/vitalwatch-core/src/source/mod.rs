//! Ingestion sources - turn heterogeneous inputs into raw vital records

pub mod csv;
pub mod json;

pub use self::csv::CsvSource;
pub use self::json::JsonSource;

use crate::RawVitalRecord;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid CSV: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("invalid source format: {0}")]
    Format(String),

    #[error("unknown source: {0}")]
    Unknown(String),
}

// Source trait - every ingestion adapter implements this

pub trait VitalSource: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self) -> Result<Vec<RawVitalRecord>, SourceError>;
}

// Registry to hold all sources

#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Box<dyn VitalSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // register a source, replacing any with the same name
    pub fn register(&mut self, source: Box<dyn VitalSource>) {
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn get(&self, name: &str) -> Option<&dyn VitalSource> {
        self.sources.get(name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    // fetch from one named source
    pub fn fetch(&self, name: &str) -> Result<Vec<RawVitalRecord>, SourceError> {
        match self.get(name) {
            Some(source) => source.fetch(),
            None => Err(SourceError::Unknown(name.to_string())),
        }
    }

    /// Fetch from every source; a failing source is logged and skipped
    pub fn fetch_all(&self) -> Vec<RawVitalRecord> {
        let mut out = Vec::new();
        for name in self.names() {
            match self.fetch(name) {
                Ok(records) => out.extend(records),
                Err(e) => tracing::error!(source = name, error = %e, "source fetch failed"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<RawVitalRecord>);

    impl VitalSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }
        fn fetch(&self) -> Result<Vec<RawVitalRecord>, SourceError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_registry_unknown_source() {
        let registry = SourceRegistry::new();
        assert!(matches!(registry.fetch("nope"), Err(SourceError::Unknown(_))));
    }

    #[test]
    fn test_registry_fetch_all() {
        let mut registry = SourceRegistry::new();
        registry.register(Box::new(FixedSource(vec![RawVitalRecord::new("p1", "2024-01-01T00:00:00Z")])));
        assert_eq!(registry.fetch_all().len(), 1);
        assert_eq!(registry.names(), vec!["fixed"]);
    }
}
