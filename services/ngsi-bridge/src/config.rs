use crate::resolver::AttributeMatch;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the bridge service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Upstream telemetry API configuration
    pub upstream: UpstreamConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Modality catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Upstream telemetry API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the telemetry API
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Devices aggregated by temporal average queries
    #[serde(default = "default_devices")]
    pub devices: Vec<u32>,
    /// Bucket size for temporal average queries
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Descriptor field matched by the `attrs` query parameter
    #[serde(default)]
    pub attribute_match: AttributeMatch,
}

/// Modality catalog source
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// JSON catalog file replacing the built-in catalog
    pub path: Option<PathBuf>,
}

// Default value functions
fn default_service_name() -> String {
    "ngsi-bridge".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_devices() -> Vec<u32> {
    vec![71, 72, 73, 63, 64, 36, 68, 70, 61, 69, 67, 66, 65, 60, 59, 120]
}

fn default_granularity() -> String {
    "1 hour".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "ngsi-bridge")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/bridge").required(false))
            .add_source(config::File::with_name("/etc/ngsi-bridge/bridge").required(false))
            // Override with environment variables
            // BRIDGE__UPSTREAM__BASE_URL -> upstream.base_url
            .add_source(
                config::Environment::with_prefix("BRIDGE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("upstream.devices")
                    .with_list_parse_key("api.cors_origins"),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            anyhow::bail!("Missing required configuration: upstream.base_url");
        }
        if self.upstream.devices.is_empty() {
            anyhow::bail!("upstream.devices must list at least one device");
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
            attribute_match: AttributeMatch::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_secs: default_request_timeout_secs(),
            devices: default_devices(),
            granularity: default_granularity(),
        }
    }

    /// Get upstream request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
