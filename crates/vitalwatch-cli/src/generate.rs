// Mock vital signs generator - synthetic patients for demos and testing

use chrono::{DateTime, Duration, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::sync::Mutex;
use vitalwatch_core::source::{SourceError, VitalSource};
use vitalwatch_core::{Metric, MetricValues, PatientId, RawVitalRecord, VitalRecord};

// Typical resting adult ranges
const NORMAL_RANGES: [(Metric, f64, f64); 6] = [
    (Metric::HeartRate, 60.0, 100.0),
    (Metric::Temperature, 36.5, 37.5),
    (Metric::Spo2, 95.0, 100.0),
    (Metric::RespirationRate, 12.0, 20.0),
    (Metric::SystolicBp, 110.0, 140.0),
    (Metric::DiastolicBp, 60.0, 90.0),
];

// Wide ranges used for abnormal readings
const ABNORMAL_RANGES: [(Metric, f64, f64); 6] = [
    (Metric::HeartRate, 40.0, 200.0),
    (Metric::Temperature, 35.0, 42.0),
    (Metric::Spo2, 70.0, 100.0),
    (Metric::RespirationRate, 8.0, 40.0),
    (Metric::SystolicBp, 70.0, 200.0),
    (Metric::DiastolicBp, 40.0, 120.0),
];

#[derive(Debug, Clone)]
pub struct Patient {
    pub id: PatientId,
    pub age: u32,
    pub gender: String,
}

pub struct MockGenerator {
    rng: StdRng,
    abnormal_probability: f64,
}

impl MockGenerator {
    pub fn new(seed: Option<u64>, abnormal_probability: f64) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            rng: StdRng::seed_from_u64(seed),
            abnormal_probability: abnormal_probability.clamp(0.0, 1.0),
        }
    }

    pub fn patients(&mut self, count: usize) -> Vec<Patient> {
        (1..=count)
            .map(|i| Patient {
                id: PatientId::new(format!("PATIENT_{}", i)),
                age: self.rng.random_range(18..=90),
                gender: if self.rng.random_bool(0.5) { "M" } else { "F" }.to_string(),
            })
            .collect()
    }

    fn values(&mut self) -> MetricValues {
        let ranges = if self.rng.random::<f64>() < self.abnormal_probability {
            &ABNORMAL_RANGES
        } else {
            &NORMAL_RANGES
        };
        ranges
            .iter()
            .map(|(metric, lo, hi)| {
                let v: f64 = self.rng.random_range(*lo..*hi);
                (*metric, (v * 100.0).round() / 100.0)
            })
            .collect()
    }

    pub fn reading(&mut self, patient: &Patient, at: DateTime<Utc>) -> RawVitalRecord {
        let mut raw = self
            .values()
            .iter()
            .fold(RawVitalRecord::new(patient.id.clone(), at.to_rfc3339()), |raw, (m, v)| {
                raw.with_metric(m, v)
            });
        raw.age = Some(patient.age);
        raw.gender = Some(patient.gender.clone());
        raw
    }

    /// One reading per patient every `interval` from `start` through `end`
    pub fn dataset(
        &mut self,
        patients: &[Patient],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
    ) -> Vec<VitalRecord> {
        let mut records = Vec::new();
        for patient in patients {
            let mut at = start;
            while at <= end {
                let values = self.values();
                if let Ok(record) = VitalRecord::new(patient.id.clone(), at, values) {
                    records.push(record.with_demographics(Some(patient.age), Some(patient.gender.clone())));
                }
                at += interval;
            }
        }
        records
    }
}

// live stream of readings for the monitor when no file source is given
pub struct SimulatedSource {
    generator: Mutex<MockGenerator>,
    patients: Vec<Patient>,
}

impl SimulatedSource {
    pub fn new(patients: usize, seed: Option<u64>, abnormal_probability: f64) -> Self {
        let mut generator = MockGenerator::new(seed, abnormal_probability);
        let patients = generator.patients(patients);
        Self {
            generator: Mutex::new(generator),
            patients,
        }
    }
}

impl VitalSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    fn fetch(&self) -> Result<Vec<RawVitalRecord>, SourceError> {
        let mut generator = self.generator.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(self.patients.iter().map(|p| generator.reading(p, now)).collect())
    }
}
