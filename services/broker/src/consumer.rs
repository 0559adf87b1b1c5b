//! Frame consumer: durable-queue subscription with reconnect-on-failure.
//!
//! The consume loop runs for the lifetime of the host process. Messages are
//! taken with automatic acknowledgement (at-most-once; a crash mid-processing
//! loses that frame, which is the right trade for live video where stale
//! frames are worthless). Broker failures send the loop through a fixed
//! backoff and a full connection/channel/subscription rebuild; per-message
//! failures are logged and skipped.

use crate::config::BrokerConfig;
use crate::diagnostics::DiagnosticsHandle;
use crate::messages::FramePayload;
use crate::topology::{BrokerSession, ReconnectPolicy, TopologyError};
use futures::StreamExt;
use lapin::options::BasicConsumeOptions;
use lapin::types::FieldTable;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_TYPE: &str = "frame-consumer";

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to deserialize frame payload: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Frame processing failed: {0}")]
    Processing(String),
}

/// Handler trait for processing frame envelopes
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync {
    /// Process a single frame envelope
    async fn handle(&self, frame: FramePayload) -> Result<(), ConsumerError>;

    /// Called when frame processing fails
    async fn on_error(&self, camera_id: &str, error: &ConsumerError) {
        warn!(camera_id = camera_id, error = %error, "Frame processing failed");
    }
}

/// Why a consume session ended
enum SessionEnd {
    Shutdown,
    Failed,
}

/// Consumer bound to one durable queue on the frame fanout exchange
pub struct FrameConsumer {
    config: BrokerConfig,
    diagnostics: Option<DiagnosticsHandle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl FrameConsumer {
    pub fn new(config: BrokerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            diagnostics: None,
            shutdown_tx,
        }
    }

    /// Forward consume-path events to the diagnostics queue
    pub fn with_diagnostics(mut self, handle: DiagnosticsHandle) -> Self {
        self.diagnostics = Some(handle);
        self
    }

    /// Signal the consume loop to stop
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    /// Run the consume loop until shutdown is signaled.
    ///
    /// Broker failures never terminate the loop; each one sends it back
    /// through the reconnect path after the configured fixed delay.
    pub async fn run<H: FrameHandler + ?Sized>(&self, handler: Arc<H>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut policy = ReconnectPolicy::new(self.config.reconnect_delay());
        let queue = self.config.topology.frame_queue.clone();

        info!(queue = %queue, "Starting frame consumer");

        loop {
            policy.connecting();

            let session = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = self.build_session() => match result {
                    Ok(session) => session,
                    Err(err) => {
                        error!(error = %err, attempts = policy.attempts(), "Broker unavailable");
                        self.diag_error(format!("Broker connection failed: {err}"));
                        if self.backoff(&mut policy, &mut shutdown_rx).await {
                            break;
                        }
                        continue;
                    }
                },
            };

            policy.connected();
            info!(queue = %queue, "Waiting for video frames");
            if let Some(diagnostics) = &self.diagnostics {
                diagnostics.info(EVENT_TYPE, "Waiting for video frames");
            }

            match self.consume(session, handler.as_ref(), &mut shutdown_rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed => {
                    self.diag_error("Consume session lost, reconnecting".to_string());
                    if self.backoff(&mut policy, &mut shutdown_rx).await {
                        break;
                    }
                }
            }
        }

        info!("Frame consumer stopped");
    }

    /// Rebuild connection, channel, topology and binding from scratch.
    async fn build_session(&self) -> Result<BrokerSession, TopologyError> {
        let mut session = BrokerSession::connect(&self.config).await?;
        session
            .declare_fanout(&self.config.topology.frame_exchange)
            .await?;
        session
            .declare_durable_queue(
                &self.config.topology.frame_queue,
                &self.config.topology.frame_exchange,
            )
            .await?;
        Ok(session)
    }

    async fn consume<H: FrameHandler + ?Sized>(
        &self,
        session: BrokerSession,
        handler: &H,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        let queue = &self.config.topology.frame_queue;
        let tag = format!("{}-{}", queue, Uuid::new_v4().simple());

        let mut deliveries = match session
            .channel()
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    // Auto-ack on receipt: at-most-once from the broker's view
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(queue = %queue, error = %err, "Failed to start consuming");
                return SessionEnd::Failed;
            }
        };

        loop {
            let next = tokio::select! {
                _ = shutdown_rx.recv() => return SessionEnd::Shutdown,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.dispatch(handler, &delivery.data).await;
                }
                Some(Err(err)) => {
                    error!(queue = %queue, error = %err, "Consume stream error");
                    return SessionEnd::Failed;
                }
                None => {
                    warn!(queue = %queue, "Consume stream ended");
                    return SessionEnd::Failed;
                }
            }

            // Heartbeat timeouts can kill the channel without an error
            // surfacing on the delivery stream.
            if !session.is_open() {
                warn!(queue = %queue, "Broker session no longer open");
                return SessionEnd::Failed;
            }
        }
    }

    /// Decode and hand one message to the handler. Never propagates: a bad
    /// message must not take the consume loop down.
    async fn dispatch<H: FrameHandler + ?Sized>(&self, handler: &H, payload: &[u8]) {
        let frame: FramePayload = match serde_json::from_slice(payload) {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "Discarding undecodable frame message");
                self.diag_error(format!("Undecodable frame message: {err}"));
                return;
            }
        };

        let camera_id = frame.camera_id.clone();
        debug!(
            camera_id = %camera_id,
            bytes = frame.frame.len(),
            "Received frame"
        );

        if let Err(err) = handler.handle(frame).await {
            handler.on_error(&camera_id, &err).await;
            self.diag_error(format!(
                "Error processing frame from camera {camera_id}: {err}"
            ));
        }
    }

    /// Sleep the fixed reconnect delay, returning true if shutdown arrived.
    async fn backoff(
        &self,
        policy: &mut ReconnectPolicy,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> bool {
        let delay = policy.failed();
        debug!(delay_secs = delay.as_secs(), "Backing off before reconnect");
        tokio::select! {
            _ = shutdown_rx.recv() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn diag_error(&self, message: String) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.error(EVENT_TYPE, message);
        }
    }
}
