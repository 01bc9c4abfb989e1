use crate::domain::measurement::MeasurementKind;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub broker: BrokerSettings,
    pub influx: InfluxSettings,
    #[serde(default)]
    pub dashboard: DashboardSettings,
    /// Backing field name per measurement kind; an empty name removes the mapping
    #[serde(default)]
    pub fields: HashMap<MeasurementKind, String>,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub base_topic: String,
}

impl BrokerSettings {
    /// Wildcard subscription under the base topic
    pub fn topic_pattern(&self) -> String {
        format!("{}/#", self.base_topic.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InfluxSettings {
    pub host: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default = "default_measurement")]
    pub default_measurement: MeasurementKind,
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    #[serde(default = "default_refresh_period_secs")]
    pub refresh_period_secs: u64,
    #[serde(default = "default_age_refresh_secs")]
    pub age_refresh_secs: u64,
    #[serde(default)]
    pub suppressed_fields: Vec<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            default_measurement: default_measurement(),
            auto_refresh: true,
            refresh_period_secs: default_refresh_period_secs(),
            age_refresh_secs: default_age_refresh_secs(),
            suppressed_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_client_id() -> String {
    "tree-telemetry".to_string()
}

fn default_measurement() -> MeasurementKind {
    MeasurementKind::WoodResistance
}

fn default_true() -> bool {
    true
}

fn default_refresh_period_secs() -> u64 {
    60
}

fn default_age_refresh_secs() -> u64 {
    30
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

/// Load `config/dashboard.*` (optional) overlaid with `TREEMON__SECTION__KEY` variables
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard").required(false))
        .add_source(
            config::Environment::with_prefix("TREEMON")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    anyhow::ensure!(
        config.dashboard.refresh_period_secs > 0,
        "dashboard.refresh_period_secs must be > 0"
    );
    anyhow::ensure!(
        config.dashboard.age_refresh_secs > 0,
        "dashboard.age_refresh_secs must be > 0"
    );
    Ok(config)
}

impl AppConfig {
    /// Log the loaded configuration with secrets masked
    pub fn log_config(&self) {
        let mask = |secret: &Option<String>| match secret {
            Some(_) => "****",
            None => "<none>",
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  broker.url        : {}", self.broker.url);
        tracing::info!("  broker.client_id  : {}", self.broker.client_id);
        tracing::info!("  broker.username   : {}", self.broker.username.as_deref().unwrap_or("<none>"));
        tracing::info!("  broker.password   : {}", mask(&self.broker.password));
        tracing::info!("  broker.topic      : {}", self.broker.topic_pattern());
        tracing::info!("  influx.host       : {}", self.influx.host);
        tracing::info!("  influx.org        : {}", self.influx.org);
        tracing::info!("  influx.bucket     : {}", self.influx.bucket);
        tracing::info!("  refresh period    : {}s", self.dashboard.refresh_period_secs);
        tracing::info!("  server.bind       : {}", self.server.bind);
    }
}
