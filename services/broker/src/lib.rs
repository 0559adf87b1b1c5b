//! Revid broker layer: frame distribution over AMQP.
//!
//! This library carries live camera frames from producers to analysis
//! workers through a fanout-exchange / durable-queue topology. It handles:
//!
//! - Camera activation broadcasts from the registration gateway
//! - Per-frame envelopes fanned out to every bound worker queue
//! - Reconnect-on-failure consumption with fixed backoff
//! - Best-effort diagnostics records on a dedicated queue
//!
//! # Example
//!
//! ```rust,no_run
//! use revid_broker::{BrokerConfig, DiagnosticsSink, FrameConsumer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), revid_broker::ConfigError> {
//!     let config = BrokerConfig::from_env()?;
//!     config.validate()?;
//!
//!     let (diagnostics, _task) = DiagnosticsSink::spawn(config.clone());
//!     let _consumer = FrameConsumer::new(config).with_diagnostics(diagnostics);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod diagnostics;
pub mod messages;
pub mod publisher;
pub mod topology;

// Re-export main types
pub use config::{BrokerConfig, ConfigError, TopologyConfig};
pub use consumer::{ConsumerError, FrameConsumer, FrameHandler};
pub use diagnostics::{DiagnosticsHandle, DiagnosticsSink, LogLevel, LogRecord};
pub use messages::{normalize_object_list, CameraActivation, FramePayload};
pub use publisher::{ActivationPublisher, AmqpPublisher, PublishError};
pub use topology::{BrokerSession, ConnectionState, ReconnectPolicy, TopologyError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::BrokerConfig;
    pub use crate::consumer::{ConsumerError, FrameConsumer, FrameHandler};
    pub use crate::diagnostics::{DiagnosticsHandle, DiagnosticsSink};
    pub use crate::messages::{CameraActivation, FramePayload};
    pub use crate::publisher::{ActivationPublisher, AmqpPublisher, PublishError};
}
