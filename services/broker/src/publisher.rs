//! Typed publishers for the distribution topology.
//!
//! [`AmqpPublisher`] keeps a lazily built session and rebuilds it whenever the
//! broker drops it, so a heartbeat timeout between two publishes costs one
//! reconnect instead of an error surfaced to the caller's caller.

use crate::config::BrokerConfig;
use crate::messages::{CameraActivation, FramePayload};
use crate::topology::{BrokerSession, TopologyError};
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Errors that can occur during message publication
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Broker refused publish to exchange {exchange}: {source}")]
    Publish {
        exchange: String,
        source: lapin::Error,
    },

    #[error("Broker session is not connected")]
    NotConnected,
}

/// Seam between the registration gateway and the broker.
#[async_trait::async_trait]
pub trait ActivationPublisher: Send + Sync {
    /// Broadcast one camera activation to every currently bound subscriber.
    ///
    /// At-most-once per subscriber: queues bound after the publish never see
    /// this message.
    async fn publish_activation(&self, activation: CameraActivation) -> Result<(), PublishError>;
}

/// AMQP-backed publisher for the fanout exchanges
pub struct AmqpPublisher {
    config: BrokerConfig,
    session: Mutex<Option<BrokerSession>>,
}

impl AmqpPublisher {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Publish one frame envelope onto the frame fanout exchange.
    pub async fn publish_frame(&self, frame: &FramePayload) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(frame)?;
        debug!(
            camera_id = %frame.camera_id,
            bytes = payload.len(),
            "Publishing frame"
        );
        self.publish(&self.config.topology.frame_exchange, &payload)
            .await
    }

    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut guard = self.session.lock().await;

        let session = match guard.take() {
            // Heartbeat timeouts close sessions without an error on this
            // path, so liveness is checked before every publish.
            Some(existing) if existing.is_open() => existing,
            _ => {
                let mut fresh = BrokerSession::connect(&self.config).await?;
                fresh
                    .declare_fanout(&self.config.topology.activation_exchange)
                    .await?;
                fresh
                    .declare_fanout(&self.config.topology.frame_exchange)
                    .await?;
                fresh
            }
        };

        let outcome = async {
            session
                .channel()
                .basic_publish(
                    exchange,
                    "",
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default(),
                )
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                *guard = Some(session);
                Ok(())
            }
            // The session stays dropped; the next publish reconnects.
            Err(source) => Err(PublishError::Publish {
                exchange: exchange.to_string(),
                source,
            }),
        }
    }
}

#[async_trait::async_trait]
impl ActivationPublisher for AmqpPublisher {
    async fn publish_activation(&self, activation: CameraActivation) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&activation)?;
        debug!(camera_id = %activation.camera_id, "Publishing camera activation");
        self.publish(&self.config.topology.activation_exchange, &payload)
            .await
    }
}
