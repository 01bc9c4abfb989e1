// InfluxDB v2 repository implementation
use crate::application::history_repository::{HistoryError, HistoryRepository};
use crate::domain::history::HistoricalPoint;
use crate::domain::measurement::{FieldMapping, MeasurementKind};
use crate::infrastructure::config::InfluxSettings;
use crate::infrastructure::csv_parser;
use async_trait::async_trait;
use std::collections::HashMap;

/// Look-back window of every history query
const HISTORY_WINDOW_DAYS: u32 = 30;

const FLUX_TEMPLATE: &str = r#"from(bucket: "${bucket}")
  |> range(start: -${days}d)
  |> filter(fn: (r) => r._measurement == "${measurement}")
  |> filter(fn: (r) => r._field == "${field}")"#;

#[derive(Debug, Clone)]
pub struct InfluxRepository {
    client: reqwest::Client,
    host: String,
    org: String,
    bucket: String,
    token: String,
    fields: FieldMapping,
}

impl InfluxRepository {
    pub fn new(settings: &InfluxSettings, fields: FieldMapping) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: settings.host.trim_end_matches('/').to_string(),
            org: settings.org.clone(),
            bucket: settings.bucket.clone(),
            token: settings.token.clone(),
            fields,
        }
    }

    fn build_query_url(&self) -> String {
        format!(
            "{}/api/v2/query?org={}",
            self.host,
            urlencoding::encode(&self.org)
        )
    }

    fn build_query(&self, sensor_id: &str, field: &str) -> String {
        let mut vars = HashMap::new();
        vars.insert("bucket".to_string(), escape_flux(&self.bucket));
        vars.insert("days".to_string(), HISTORY_WINDOW_DAYS.to_string());
        vars.insert("measurement".to_string(), escape_flux(sensor_id));
        vars.insert("field".to_string(), escape_flux(field));
        prepare_query(FLUX_TEMPLATE, &vars)
    }

    async fn execute_query(&self, query: String) -> Result<String, HistoryError> {
        let response = self
            .client
            .post(self.build_query_url())
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(query)
            .send()
            .await
            .map_err(|e| HistoryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Query { status, body });
        }

        response
            .text()
            .await
            .map_err(|e| HistoryError::Transport(e.to_string()))
    }
}

#[async_trait]
impl HistoryRepository for InfluxRepository {
    async fn fetch(
        &self,
        sensor_id: &str,
        kind: MeasurementKind,
    ) -> Result<Vec<HistoricalPoint>, HistoryError> {
        if sensor_id.is_empty() {
            return Err(HistoryError::Configuration(
                "no active sensor selected".to_string(),
            ));
        }
        let Some(field) = self.fields.field_for(kind) else {
            return Err(HistoryError::Configuration(format!(
                "no backing field configured for {}",
                kind
            )));
        };

        let query = self.build_query(sensor_id, field);
        tracing::debug!("Executing history query for {}/{}: {}", sensor_id, kind, query);
        let body = self.execute_query(query).await?;

        let points = csv_parser::parse(&body, kind, sensor_id);
        tracing::debug!("Got {} points for {}/{}", points.len(), sensor_id, kind);
        Ok(points)
    }
}

/// Replace template variables in a query string
fn prepare_query(query: &str, vars: &HashMap<String, String>) -> String {
    let mut result = query.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

/// Escape a value for use inside a Flux string literal
fn escape_flux(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
