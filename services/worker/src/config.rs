use revid_broker::config::{BrokerConfig, ConfigError};
use serde::Deserialize;

/// Main configuration for the frame worker
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Service configuration
    pub service: ServiceConfig,
    /// Broker configuration
    pub broker: BrokerConfig,
    /// Matching engine configuration
    pub matching: MatchingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log format: json or pretty
    pub log_format: String,
    /// Prometheus exporter port
    pub metrics_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "revid-worker".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            metrics_port: 9090,
        }
    }
}

/// Thresholds for the ReID matching engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Maximum Euclidean distance for joining an existing identity
    /// (strictly-less-than comparison)
    pub reid_threshold: f32,
    /// Detections at or below this confidence never enter the ReID path
    pub min_confidence: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            reid_threshold: 0.6,
            min_confidence: 0.4,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from config files and environment.
    ///
    /// Environment variables use the `WORKER__` prefix with `__` as the
    /// separator, e.g. `WORKER__BROKER__HOST`.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/worker").required(false))
            .add_source(config::File::with_name("/etc/revid/worker").required(false))
            .add_source(
                config::Environment::with_prefix("WORKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;

        if self.matching.reid_threshold <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "matching.reid_threshold".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.matching.min_confidence) {
            return Err(ConfigError::InvalidValue {
                key: "matching.min_confidence".to_string(),
                message: "must be within [0, 1]".to_string(),
            });
        }
        Ok(())
    }
}
