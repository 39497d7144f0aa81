//! Shared in-memory vital-sign store
//!
//! Append-only, indexed by patient and kept in chronological order. Every
//! query runs under a single read lock and hands back owned copies, so callers
//! always see a consistent snapshot and never hold the lock while they work.

use crate::{PatientId, RawVitalRecord, RecordError, VitalRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("no readings found for patient {0}")]
    NotFound(PatientId),

    #[error(transparent)]
    Record(#[from] RecordError),
}

#[derive(Debug, Default)]
pub struct VitalStore {
    records: RwLock<HashMap<PatientId, Vec<VitalRecord>>>,
}

impl VitalStore {
    pub fn new() -> Self {
        Self::default()
    }

    // records are only ever inserted whole, so a poisoned lock still guards valid data
    fn read(&self) -> RwLockReadGuard<'_, HashMap<PatientId, Vec<VitalRecord>>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PatientId, Vec<VitalRecord>>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a validated record, keeping the patient's history time-ordered
    pub fn append(&self, record: VitalRecord) {
        let mut records = self.write();
        let history = records.entry(record.patient_id().clone()).or_default();

        // equal timestamps keep arrival order
        let pos = history.partition_point(|r| r.timestamp() <= record.timestamp());
        if pos < history.len() {
            debug!(
                patient = %record.patient_id(),
                timestamp = %record.timestamp(),
                "out-of-order reading inserted"
            );
        }
        history.insert(pos, record);
    }

    /// Validate a raw source record and append it
    pub fn append_raw(&self, raw: RawVitalRecord) -> Result<VitalRecord, StoreError> {
        let record = VitalRecord::from_raw(raw)?;
        self.append(record.clone());
        Ok(record)
    }

    /// Chronological readings for a patient within an inclusive time range
    pub fn history(
        &self,
        patient_id: &PatientId,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Vec<VitalRecord> {
        let records = self.read();
        let Some(history) = records.get(patient_id) else {
            return Vec::new();
        };

        let start = since.map_or(0, |s| history.partition_point(|r| r.timestamp() < s));
        let end = until.map_or(history.len(), |u| history.partition_point(|r| r.timestamp() <= u));
        if start >= end {
            return Vec::new();
        }
        history[start..end].to_vec()
    }

    /// Most recent reading for a patient
    pub fn latest(&self, patient_id: &PatientId) -> Result<VitalRecord, StoreError> {
        self.read()
            .get(patient_id)
            .and_then(|h| h.last().cloned())
            .ok_or_else(|| StoreError::NotFound(patient_id.clone()))
    }

    /// Known patients, sorted
    pub fn patients(&self) -> Vec<PatientId> {
        let mut ids: Vec<PatientId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of readings for one patient
    pub fn count(&self, patient_id: &PatientId) -> usize {
        self.read().get(patient_id).map_or(0, Vec::len)
    }

    /// Total number of readings
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every patient's history, sorted by patient id.
    /// Used to move state out before long-running work starts.
    pub fn snapshot(&self) -> Vec<(PatientId, Vec<VitalRecord>)> {
        let mut all: Vec<_> = self
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
