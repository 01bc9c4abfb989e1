// Live snapshot aggregation - folds inbound sensor messages into one current view
use crate::domain::measurement::FieldMapping;
use crate::domain::snapshot::{FieldFilter, LiveSnapshot};
use crate::domain::time_format::{from_unix_seconds, to_iso};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sensor id used when neither the payload nor the topic names one
pub const UNKNOWN_SENSOR: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message carries no fields")]
    MissingFields,
    #[error("message timestamp is missing or not numeric")]
    BadTimestamp,
    #[error("no sensor identifier could be resolved")]
    NoSensor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// One decoded transport delivery
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub sensor_name_hint: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp_seconds: f64,
}

impl InboundMessage {
    /// Decode `{fields: {...}, name?: string, tags: {...}, timestamp: number}`
    pub fn decode(raw: &[u8], topic: &str) -> Result<Self, DecodeError> {
        let payload: Value = serde_json::from_slice(raw)?;

        let fields = match payload.get("fields") {
            Some(Value::Object(map)) if !map.is_empty() => map,
            _ => return Err(DecodeError::MissingFields),
        };

        let timestamp_seconds = payload
            .get("timestamp")
            .and_then(Value::as_f64)
            .ok_or(DecodeError::BadTimestamp)?;

        let sensor_name_hint = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let fields = fields
            .iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    Value::Number(n) => FieldValue::Number(n.as_f64()?),
                    Value::String(s) => FieldValue::Text(s.clone()),
                    _ => return None,
                };
                Some((name.clone(), value))
            })
            .collect();

        Ok(Self {
            topic: topic.to_string(),
            sensor_name_hint,
            fields,
            timestamp_seconds,
        })
    }

    /// Explicit name, else the third topic segment, else [`UNKNOWN_SENSOR`]
    pub fn sensor_id(&self) -> &str {
        self.sensor_name_hint
            .as_deref()
            .filter(|name| !name.is_empty())
            .or_else(|| self.topic.split('/').nth(2).filter(|s| !s.is_empty()))
            .unwrap_or(UNKNOWN_SENSOR)
    }
}

/// Owns the single live snapshot and is the only place that builds new ones
#[derive(Debug, Clone)]
pub struct LiveSnapshotAggregator {
    snapshot: LiveSnapshot,
    mapping: FieldMapping,
    filter: FieldFilter,
}

impl LiveSnapshotAggregator {
    pub fn new(mapping: FieldMapping, filter: FieldFilter) -> Self {
        Self {
            snapshot: LiveSnapshot::default(),
            mapping,
            filter,
        }
    }

    pub fn snapshot(&self) -> &LiveSnapshot {
        &self.snapshot
    }

    /// Merge one raw payload. Returns the replacement snapshot when the
    /// message was accepted; malformed messages leave the snapshot untouched.
    pub fn apply_message(&mut self, raw: &[u8], topic: &str) -> Option<LiveSnapshot> {
        match self.try_apply(raw, topic) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!("Dropping message on {}: {}", topic, e);
                None
            }
        }
    }

    fn try_apply(&mut self, raw: &[u8], topic: &str) -> Result<LiveSnapshot, DecodeError> {
        let message = InboundMessage::decode(raw, topic)?;
        let timestamp =
            from_unix_seconds(message.timestamp_seconds).ok_or(DecodeError::BadTimestamp)?;
        let sensor_id = message.sensor_id();
        if sensor_id.is_empty() {
            return Err(DecodeError::NoSensor);
        }

        let mut next = self.snapshot.clone();
        next.last_updated_timestamp = to_iso(&timestamp);
        next.last_updated_sensor_id = sensor_id.to_string();
        next.last_raw_sensor_name = message.sensor_name_hint.clone();

        for (name, value) in &message.fields {
            if !self.filter.includes(name) {
                continue;
            }
            let Some(kind) = self.mapping.kind_for(name) else {
                continue;
            };
            if let Some(v) = value.as_f64() {
                next.values.insert(kind, v);
            }
        }

        self.snapshot = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::measurement::MeasurementKind;

    const TOPIC: &str = "trees/sensors/oak-7/data";

    fn aggregator() -> LiveSnapshotAggregator {
        LiveSnapshotAggregator::new(FieldMapping::default(), FieldFilter::default())
    }

    #[test]
    fn test_rejects_invalid_messages() {
        let mut agg = aggregator();
        agg.apply_message(br#"{"fields":{"battery":3.9},"timestamp":1704067200}"#, TOPIC)
            .unwrap();
        let before = agg.snapshot().clone();

        let invalid: [&[u8]; 6] = [
            br#"{"timestamp":1704067300}"#,
            br#"{"fields":{},"timestamp":1704067300}"#,
            br#"{"fields":{"battery":3.1}}"#,
            br#"{"fields":{"battery":3.1},"timestamp":"noon"}"#,
            br#"{"fields":{"battery":3.1},"#,
            b"not json",
        ];
        for raw in invalid {
            assert!(agg.apply_message(raw, TOPIC).is_none());
            assert_eq!(agg.snapshot(), &before);
        }
    }

    #[test]
    fn test_fields_accumulate_with_latest_value_per_field() {
        let mut agg = aggregator();
        agg.apply_message(
            br#"{"fields":{"wood_resistance":120,"battery":3.9},"timestamp":1704067200}"#,
            TOPIC,
        );
        agg.apply_message(
            br#"{"fields":{"air_humidity":"71.5"},"timestamp":1704067260}"#,
            TOPIC,
        );
        let snap = agg
            .apply_message(br#"{"fields":{"battery":3.7},"timestamp":1704067320}"#, TOPIC)
            .unwrap();

        assert_eq!(snap.values.len(), 3);
        assert_eq!(snap.values.get(&MeasurementKind::WoodResistance).copied(), Some(120.0));
        assert_eq!(snap.values.get(&MeasurementKind::AirHumidity).copied(), Some(71.5));
        assert_eq!(snap.values.get(&MeasurementKind::Battery).copied(), Some(3.7));
        assert_eq!(snap.last_updated_timestamp, "2024-01-01T00:02:00.000Z");
    }

    #[test]
    fn test_timestamp_follows_processing_order() {
        let mut agg = aggregator();
        agg.apply_message(br#"{"fields":{"battery":3.7},"timestamp":1704067320}"#, TOPIC);
        let snap = agg
            .apply_message(br#"{"fields":{"battery":3.9},"timestamp":1704067200}"#, TOPIC)
            .unwrap();

        assert_eq!(snap.last_updated_timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(snap.values.get(&MeasurementKind::Battery).copied(), Some(3.9));
    }

    #[test]
    fn test_sensor_id_resolution() {
        let mut agg = aggregator();

        let snap = agg
            .apply_message(
                br#"{"fields":{"battery":3.9},"name":"Birch 2","timestamp":1704067200}"#,
                TOPIC,
            )
            .unwrap();
        assert_eq!(snap.last_updated_sensor_id, "Birch 2");
        assert_eq!(snap.last_raw_sensor_name.as_deref(), Some("Birch 2"));

        let snap = agg
            .apply_message(br#"{"fields":{"battery":3.9},"timestamp":1704067200}"#, TOPIC)
            .unwrap();
        assert_eq!(snap.last_updated_sensor_id, "oak-7");
        assert_eq!(snap.last_raw_sensor_name, None);

        let snap = agg
            .apply_message(
                br#"{"fields":{"battery":3.9},"name":"","timestamp":1704067200}"#,
                "trees",
            )
            .unwrap();
        assert_eq!(snap.last_updated_sensor_id, UNKNOWN_SENSOR);
    }

    #[test]
    fn test_suppressed_and_unmapped_fields_are_skipped() {
        let mut agg = LiveSnapshotAggregator::new(
            FieldMapping::default(),
            FieldFilter::new(["soil_moisture"]),
        );
        let snap = agg
            .apply_message(
                br#"{"fields":{"soil_moisture":40,"rssi":-70,"air_temperature":"warm","wood_temperature":11.2},"tags":{"fw":"1.2"},"timestamp":1704067200}"#,
                TOPIC,
            )
            .unwrap();

        assert_eq!(snap.values.len(), 1);
        assert_eq!(snap.values.get(&MeasurementKind::WoodTemperature).copied(), Some(11.2));
    }
}
