// Repository trait for historical data access
use crate::domain::history::HistoricalPoint;
use crate::domain::measurement::MeasurementKind;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HistoryError {
    /// The query could not be built; no request was sent
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("InfluxDB query failed with status {status}: {body}")]
    Query { status: u16, body: String },
    #[error("failed to reach InfluxDB: {0}")]
    Transport(String),
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Fetch the recent history of one measurement for one sensor.
    ///
    /// Single attempt, no retry. An empty vector means the range held no data.
    async fn fetch(
        &self,
        sensor_id: &str,
        kind: MeasurementKind,
    ) -> Result<Vec<HistoricalPoint>, HistoryError>;
}
