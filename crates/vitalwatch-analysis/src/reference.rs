//! Static clinical reference ranges by age group and gender

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;
use vitalwatch_core::{Metric, VitalRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Infant,
    Child,
    Adolescent,
    Adult,
    Elderly,
}

impl AgeGroup {
    pub fn from_age(years: u32) -> Self {
        match years {
            0 => AgeGroup::Infant,
            1..=11 => AgeGroup::Child,
            12..=17 => AgeGroup::Adolescent,
            18..=64 => AgeGroup::Adult,
            _ => AgeGroup::Elderly,
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "infant" => Some(AgeGroup::Infant),
            "child" => Some(AgeGroup::Child),
            "adolescent" => Some(AgeGroup::Adolescent),
            "adult" => Some(AgeGroup::Adult),
            "elderly" => Some(AgeGroup::Elderly),
            _ => None,
        }
    }
}

/// Critical bounds (`min`/`max`) plus optional tighter warning bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub warning_min: Option<f64>,
    #[serde(default)]
    pub warning_max: Option<f64>,
}

impl RangeBounds {
    fn new(min: f64, max: f64, warning_min: f64, warning_max: f64) -> Self {
        Self {
            min,
            max,
            warning_min: Some(warning_min),
            warning_max: Some(warning_max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RangeSeverity {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeAlert {
    pub metric: Metric,
    pub severity: RangeSeverity,
    pub message: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

// metric -> age group -> gender -> bounds, as written in the JSON file
type RawTable = HashMap<String, HashMap<String, HashMap<String, RangeBounds>>>;

#[derive(Debug, Clone, Default)]
pub struct ReferenceRanges {
    ranges: HashMap<(Metric, AgeGroup, String), RangeBounds>,
}

impl ReferenceRanges {
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let raw: RawTable = serde_json::from_str(json)?;
        let mut ranges = HashMap::new();

        for (metric_name, groups) in raw {
            let Some(metric) = Metric::from_name(&metric_name) else {
                warn!(metric = %metric_name, "unknown metric in reference ranges, ignoring");
                continue;
            };
            for (group_name, genders) in groups {
                let Some(group) = AgeGroup::from_name(&group_name) else {
                    warn!(group = %group_name, "unknown age group in reference ranges, ignoring");
                    continue;
                };
                for (gender, bounds) in genders {
                    ranges.insert((metric, group, normalize_gender(&gender)), bounds);
                }
            }
        }
        Ok(Self { ranges })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Adult and elderly ranges for both genders
    pub fn standard() -> Self {
        let table = [
            (Metric::HeartRate, RangeBounds::new(50.0, 120.0, 60.0, 100.0)),
            (Metric::Spo2, RangeBounds::new(90.0, 100.0, 95.0, 100.0)),
            (Metric::SystolicBp, RangeBounds::new(90.0, 160.0, 110.0, 140.0)),
            (Metric::DiastolicBp, RangeBounds::new(50.0, 100.0, 60.0, 90.0)),
            (Metric::RespirationRate, RangeBounds::new(8.0, 25.0, 12.0, 20.0)),
            (Metric::Temperature, RangeBounds::new(35.5, 38.5, 36.5, 37.5)),
        ];
        let mut ranges = HashMap::new();
        for (metric, bounds) in table {
            for group in [AgeGroup::Adult, AgeGroup::Elderly] {
                for gender in ["M", "F"] {
                    ranges.insert((metric, group, gender.to_string()), bounds);
                }
            }
        }
        Self { ranges }
    }

    pub fn get(&self, metric: Metric, group: AgeGroup, gender: &str) -> Option<&RangeBounds> {
        self.ranges.get(&(metric, group, normalize_gender(gender)))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Check a record's metrics against the ranges for its demographics.
    /// Records without age/gender, or metrics without a range, yield nothing.
    pub fn check(&self, record: &VitalRecord) -> Vec<RangeAlert> {
        let (Some(age), Some(gender)) = (record.age(), record.gender()) else {
            return Vec::new();
        };
        let group = AgeGroup::from_age(age);

        record
            .metrics()
            .iter()
            .filter_map(|(metric, value)| {
                let bounds = self.get(metric, group, gender)?;
                Some(classify(metric, value, bounds))
            })
            .collect()
    }
}

fn classify(metric: Metric, value: f64, bounds: &RangeBounds) -> RangeAlert {
    let warning_min = bounds.warning_min.unwrap_or(bounds.min);
    let warning_max = bounds.warning_max.unwrap_or(bounds.max);

    let (severity, message) = if value < bounds.min || value > bounds.max {
        let dir = if value < bounds.min { "low" } else { "high" };
        (RangeSeverity::Critical, format!("{} is critically {}", metric, dir))
    } else if value < warning_min || value > warning_max {
        let dir = if value < warning_min { "low" } else { "high" };
        (RangeSeverity::Warning, format!("{} is {}", metric, dir))
    } else {
        (RangeSeverity::Normal, format!("{} is within normal range", metric))
    };

    RangeAlert {
        metric,
        severity,
        message,
        value,
        min: bounds.min,
        max: bounds.max,
    }
}

fn normalize_gender(gender: &str) -> String {
    gender.trim().to_uppercase()
}
