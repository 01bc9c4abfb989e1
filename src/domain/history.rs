// Historical time-series domain models
use super::measurement::MeasurementKind;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub original_timestamp: String,
    pub sensor_id: String,
    pub measurement_kind: MeasurementKind,
    pub value: f64,
}

impl HistoricalPoint {
    pub fn new(
        timestamp: DateTime<Utc>,
        original_timestamp: String,
        sensor_id: String,
        measurement_kind: MeasurementKind,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            original_timestamp,
            sensor_id,
            measurement_kind,
            value,
        }
    }
}

/// The (sensor, measurement) pair a history query is issued for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Selection {
    pub sensor_id: String,
    pub measurement: MeasurementKind,
}

impl Selection {
    pub fn new(sensor_id: impl Into<String>, measurement: MeasurementKind) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            measurement,
        }
    }

    /// Both identifiers are present, so a query can be issued.
    pub fn is_complete(&self) -> bool {
        !self.sensor_id.is_empty()
    }
}
