// Measurement kinds tracked per tree sensor
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementKind {
    WoodResistance,
    WoodTemperature,
    SoilMoisture,
    AirTemperature,
    AirHumidity,
    Battery,
}

impl MeasurementKind {
    pub const ALL: [MeasurementKind; 6] = [
        MeasurementKind::WoodResistance,
        MeasurementKind::WoodTemperature,
        MeasurementKind::SoilMoisture,
        MeasurementKind::AirTemperature,
        MeasurementKind::AirHumidity,
        MeasurementKind::Battery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementKind::WoodResistance => "wood_resistance",
            MeasurementKind::WoodTemperature => "wood_temperature",
            MeasurementKind::SoilMoisture => "soil_moisture",
            MeasurementKind::AirTemperature => "air_temperature",
            MeasurementKind::AirHumidity => "air_humidity",
            MeasurementKind::Battery => "battery",
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps measurement kinds to the field names used on the wire and in the
/// historical store.
///
/// Both directions are needed: inbound MQTT fields are looked up by name,
/// historical queries filter on the backing field of a kind. A kind with no
/// entry has no backing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    by_kind: HashMap<MeasurementKind, String>,
}

impl FieldMapping {
    /// Each kind under its snake_case name, then `overrides` applied on top.
    pub fn with_overrides(overrides: &HashMap<MeasurementKind, String>) -> Self {
        let mut by_kind: HashMap<MeasurementKind, String> = MeasurementKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.as_str().to_string()))
            .collect();
        for (kind, field) in overrides {
            if field.is_empty() {
                by_kind.remove(kind);
            } else {
                by_kind.insert(*kind, field.clone());
            }
        }
        Self { by_kind }
    }

    pub fn field_for(&self, kind: MeasurementKind) -> Option<&str> {
        self.by_kind.get(&kind).map(String::as_str)
    }

    pub fn kind_for(&self, field: &str) -> Option<MeasurementKind> {
        self.by_kind
            .iter()
            .find(|(_, name)| name.as_str() == field)
            .map(|(kind, _)| *kind)
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::with_overrides(&HashMap::new())
    }
}
