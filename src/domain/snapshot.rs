// Live snapshot domain model
use super::measurement::MeasurementKind;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Best-known current value per measurement kind, plus provenance
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LiveSnapshot {
    pub values: BTreeMap<MeasurementKind, f64>,
    pub last_updated_timestamp: String,
    pub last_updated_sensor_id: String,
    pub last_raw_sensor_name: Option<String>,
}

impl LiveSnapshot {
    pub fn is_empty(&self) -> bool {
        self.last_updated_sensor_id.is_empty()
    }
}

/// Per-field suppression applied while merging inbound fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    suppressed: HashSet<String>,
}

impl FieldFilter {
    pub fn new<I, S>(suppressed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suppressed: suppressed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn includes(&self, field: &str) -> bool {
        !self.suppressed.contains(field)
    }
}
