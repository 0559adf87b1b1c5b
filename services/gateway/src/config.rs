use revid_broker::config::BrokerConfig;
use serde::Deserialize;

/// Main configuration for the registration gateway
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Service configuration
    pub service: ServiceConfig,
    /// Broker configuration
    pub broker: BrokerConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name for logging
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format: json or pretty
    pub log_format: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "revid-gateway".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from config files and environment.
    ///
    /// Environment variables use the `GATEWAY__` prefix with `__` as the
    /// separator, e.g. `GATEWAY__BROKER__HOST`.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::File::with_name("/etc/revid/gateway").required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}
