//! Alert engine with deduplication

use crate::config::AlertConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;
use vitalwatch_core::{Metric, PatientId};

// which analysis produced a finding
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Baseline,
    Anomaly,
    ReferenceRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

// something worth telling a clinician about, before deduplication
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub patient_id: PatientId,
    pub metric: Metric,
    pub source: AlertSource,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
}

// unique key to identify an alert (patient + metric + source)
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize)]
pub struct AlertKey {
    pub patient_id: PatientId,
    pub metric: Metric,
    pub source: AlertSource,
}

impl From<&Finding> for AlertKey {
    fn from(f: &Finding) -> Self {
        Self {
            patient_id: f.patient_id.clone(),
            metric: f.metric,
            source: f.source,
        }
    }
}

// Current state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertState {
    Firing,       // needs attention
    Acknowledged, // someone has seen it
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveAlert {
    pub id: Uuid,
    pub key: AlertKey,
    pub state: AlertState,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub firing_at: DateTime<Utc>,
    pub last_notified_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

pub struct AlertEngine {
    // Currently active alerts (key -> alert)
    active_alerts: HashMap<AlertKey, ActiveAlert>,

    // cooldown in minutes per finding source
    cooldowns: HashMap<AlertSource, u64>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(&AlertConfig::default())
    }
}

impl AlertEngine {
    pub fn new(config: &AlertConfig) -> Self {
        let cooldowns = HashMap::from([
            (AlertSource::Baseline, config.baseline_cooldown_minutes),
            (AlertSource::Anomaly, config.anomaly_cooldown_minutes),
            (AlertSource::ReferenceRange, config.range_cooldown_minutes),
        ]);
        Self {
            active_alerts: HashMap::new(),
            cooldowns,
        }
    }

    // process findings and return alerts that should be sent; `now` is the reading's clock
    pub fn process_findings_at(&mut self, findings: Vec<Finding>, now: DateTime<Utc>) -> Vec<ActiveAlert> {
        let mut alerts_to_send = Vec::new();

        for finding in findings {
            let key = AlertKey::from(&finding);

            let should_send = match self.active_alerts.get(&key) {
                Some(existing) => self.should_alert(existing, now),
                None => true,
            };
            if !should_send {
                continue;
            }

            if let Some(existing) = self.active_alerts.get_mut(&key) {
                existing.last_notified_at = now;
                existing.message = finding.message;
                existing.value = finding.value;
                // escalate, never silently downgrade a live alert
                existing.severity = existing.severity.max(finding.severity);
                alerts_to_send.push(existing.clone());
            } else {
                let alert = ActiveAlert {
                    id: Uuid::new_v4(),
                    key: key.clone(),
                    state: AlertState::Firing,
                    severity: finding.severity,
                    message: finding.message,
                    value: finding.value,
                    firing_at: now,
                    last_notified_at: now,
                    acknowledged_at: None,
                };
                self.active_alerts.insert(key, alert.clone());
                alerts_to_send.push(alert);
            }
        }
        alerts_to_send
    }

    // cooldown check
    fn should_alert(&self, alert: &ActiveAlert, now: DateTime<Utc>) -> bool {
        if alert.state == AlertState::Acknowledged {
            return false;
        }
        let cooldown_minutes = self.cooldowns.get(&alert.key.source).copied().unwrap_or(5);
        now - alert.last_notified_at >= Duration::minutes(cooldown_minutes as i64)
    }

    pub fn acknowledge(&mut self, key: &AlertKey) -> bool {
        if let Some(alert) = self.active_alerts.get_mut(key) {
            alert.state = AlertState::Acknowledged;
            alert.acknowledged_at = Some(Utc::now());
            true
        } else {
            false
        }
    }

    // Resolve and remove an alert
    pub fn resolve(&mut self, key: &AlertKey) -> Option<ActiveAlert> {
        self.active_alerts.remove(key)
    }

    // newest first
    pub fn active_alerts(&self) -> Vec<&ActiveAlert> {
        let mut alerts: Vec<&ActiveAlert> = self.active_alerts.values().collect();
        alerts.sort_by(|a, b| b.firing_at.cmp(&a.firing_at));
        alerts
    }

    pub fn active_for(&self, patient_id: &PatientId) -> Vec<&ActiveAlert> {
        self.active_alerts()
            .into_iter()
            .filter(|a| &a.key.patient_id == patient_id)
            .collect()
    }
}
