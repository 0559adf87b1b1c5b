//! Broker session management and topology declaration.
//!
//! A [`BrokerSession`] owns one connection plus one channel and declares the
//! fanout/durable-queue topology. Declarations with compatible parameters are
//! idempotent; a broker-side conflict closes the channel, so the session
//! recreates the channel and redeclares once before giving up.
//!
//! Connections are not self-healing: heartbeat timeouts can drop a channel
//! without surfacing an error on any API call, so callers check
//! [`BrokerSession::is_open`] and rebuild through [`ReconnectPolicy`].

use crate::config::BrokerConfig;
use backoff::backoff::{Backoff, Constant};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while building or declaring broker topology
#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Failed to connect to broker at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        source: lapin::Error,
    },

    #[error("Failed to open channel: {0}")]
    Channel(lapin::Error),

    #[error("Failed to declare exchange {name}: {source}")]
    ExchangeDeclare { name: String, source: lapin::Error },

    #[error("Failed to declare queue {name}: {source}")]
    QueueDeclare { name: String, source: lapin::Error },

    #[error("Failed to bind queue {queue} to exchange {exchange}: {source}")]
    QueueBind {
        queue: String,
        exchange: String,
        source: lapin::Error,
    },
}

/// One AMQP connection and the channel all topology work goes through
pub struct BrokerSession {
    connection: Connection,
    channel: Channel,
}

impl BrokerSession {
    /// Connect to the broker described by `config`.
    ///
    /// The heartbeat interval rides in the connection URI.
    pub async fn connect(config: &BrokerConfig) -> Result<Self, TopologyError> {
        let endpoint = config.endpoint();
        debug!(endpoint = %endpoint, "Connecting to broker");

        let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
            .await
            .map_err(|source| TopologyError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let channel = connection
            .create_channel()
            .await
            .map_err(TopologyError::Channel)?;

        info!(endpoint = %endpoint, "Connected to broker");
        Ok(Self {
            connection,
            channel,
        })
    }

    /// Whether both the connection and the channel are still usable.
    ///
    /// Must be polled: a heartbeat timeout closes the channel silently.
    pub fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    /// The channel backing this session
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Declare a fanout exchange. Idempotent for compatible parameters; a
    /// parameter conflict is retried once on a fresh channel.
    pub async fn declare_fanout(&mut self, exchange: &str) -> Result<(), TopologyError> {
        if let Err(err) = self.try_declare_fanout(exchange).await {
            warn!(
                exchange = exchange,
                error = %err,
                "Exchange declaration rejected, retrying on a fresh channel"
            );
            self.recreate_channel().await?;
            self.try_declare_fanout(exchange)
                .await
                .map_err(|source| TopologyError::ExchangeDeclare {
                    name: exchange.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Declare a durable queue and bind it to `exchange`.
    pub async fn declare_durable_queue(
        &mut self,
        queue: &str,
        exchange: &str,
    ) -> Result<(), TopologyError> {
        if let Err(err) = self.try_declare_durable_queue(queue).await {
            warn!(
                queue = queue,
                error = %err,
                "Queue declaration rejected, retrying on a fresh channel"
            );
            self.recreate_channel().await?;
            self.try_declare_durable_queue(queue)
                .await
                .map_err(|source| TopologyError::QueueDeclare {
                    name: queue.to_string(),
                    source,
                })?;
        }

        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| TopologyError::QueueBind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                source,
            })?;

        debug!(queue = queue, exchange = exchange, "Durable queue bound");
        Ok(())
    }

    /// Declare a plain queue on the default exchange (diagnostics path).
    pub async fn declare_plain_queue(&mut self, queue: &str) -> Result<(), TopologyError> {
        if let Err(err) = self.try_declare_plain_queue(queue).await {
            warn!(
                queue = queue,
                error = %err,
                "Queue declaration rejected, retrying on a fresh channel"
            );
            self.recreate_channel().await?;
            self.try_declare_plain_queue(queue)
                .await
                .map_err(|source| TopologyError::QueueDeclare {
                    name: queue.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn try_declare_fanout(&self, exchange: &str) -> Result<(), lapin::Error> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
    }

    async fn try_declare_durable_queue(&self, queue: &str) -> Result<(), lapin::Error> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
    }

    async fn try_declare_plain_queue(&self, queue: &str) -> Result<(), lapin::Error> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map(|_| ())
    }

    async fn recreate_channel(&mut self) -> Result<(), TopologyError> {
        self.channel = self
            .connection
            .create_channel()
            .await
            .map_err(TopologyError::Channel)?;
        Ok(())
    }
}

/// State of a broker-facing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Fixed-interval reconnect state machine.
///
/// Disconnected -> Connecting -> Connected, with failures dropping back to
/// Disconnected and subsequent attempts reported as Reconnecting. There is no
/// attempt cap; consumers retry for the lifetime of the process.
pub struct ReconnectPolicy {
    state: ConnectionState,
    attempts: u64,
    interval: Duration,
    backoff: Constant,
}

impl ReconnectPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            interval,
            backoff: Constant::new(interval),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Mark the start of a connection attempt.
    pub fn connecting(&mut self) {
        self.state = if self.attempts == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        };
    }

    /// Mark the attempt as successful.
    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Record a failure and return the delay to observe before retrying.
    pub fn failed(&mut self) -> Duration {
        self.state = ConnectionState::Disconnected;
        self.attempts += 1;
        self.backoff.next_backoff().unwrap_or(self.interval)
    }
}
