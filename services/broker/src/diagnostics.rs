//! Fire-and-forget diagnostics records over the broker.
//!
//! Services push structured log records onto a dedicated queue for the
//! central log collector. The sink is best-effort by contract: the handle
//! never blocks the data path (bounded channel, `try_send`), and every
//! broker failure inside the sink is swallowed with a local log line only.

use crate::config::BrokerConfig;
use crate::topology::{BrokerSession, TopologyError};
use chrono::Local;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Severity carried on the diagnostics wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Error,
    Exception,
}

/// One diagnostics record as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_level: LogLevel,
    #[serde(rename = "Event_Type")]
    pub event_type: String,
    #[serde(rename = "Message")]
    pub message: String,
    pub datetime: String,
}

impl LogRecord {
    pub fn new(log_level: LogLevel, event_type: &str, message: impl Into<String>) -> Self {
        Self {
            log_level,
            event_type: event_type.to_string(),
            message: message.into(),
            datetime: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Error, Debug)]
enum SinkError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Failed to publish log record: {0}")]
    Publish(#[from] lapin::Error),

    #[error("Failed to serialize log record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cheap cloneable producer side of the diagnostics sink
#[derive(Clone)]
pub struct DiagnosticsHandle {
    tx: mpsc::Sender<LogRecord>,
}

impl DiagnosticsHandle {
    pub fn info(&self, event_type: &str, message: impl Into<String>) {
        self.send(LogRecord::new(LogLevel::Info, event_type, message));
    }

    pub fn error(&self, event_type: &str, message: impl Into<String>) {
        self.send(LogRecord::new(LogLevel::Error, event_type, message));
    }

    pub fn exception(&self, event_type: &str, message: impl Into<String>) {
        self.send(LogRecord::new(LogLevel::Exception, event_type, message));
    }

    fn send(&self, record: LogRecord) {
        // try_send so a stalled sink can never apply backpressure to the
        // data path; a full queue just drops the record.
        if let Err(err) = self.tx.try_send(record) {
            warn!(error = %err, "Dropping diagnostics record");
        }
    }
}

/// Background task draining records into the diagnostics queue
pub struct DiagnosticsSink {
    config: BrokerConfig,
    rx: mpsc::Receiver<LogRecord>,
}

impl DiagnosticsSink {
    const CHANNEL_CAPACITY: usize = 256;

    /// Spawn the sink task; the task ends when every handle is dropped and
    /// the queued records have drained.
    pub fn spawn(config: BrokerConfig) -> (DiagnosticsHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(Self::CHANNEL_CAPACITY);
        let sink = Self { config, rx };
        let task = tokio::spawn(sink.run());
        (DiagnosticsHandle { tx }, task)
    }

    async fn run(mut self) {
        let mut session: Option<BrokerSession> = None;

        while let Some(record) = self.rx.recv().await {
            if session.as_ref().map_or(true, |s| !s.is_open()) {
                session = match self.open_session().await {
                    Ok(fresh) => Some(fresh),
                    Err(err) => {
                        warn!(error = %err, "Diagnostics broker unavailable, dropping record");
                        continue;
                    }
                };
            }

            if let Some(live) = session.as_ref() {
                if let Err(err) =
                    Self::publish(live, &self.config.topology.log_queue, &record).await
                {
                    warn!(error = %err, "Failed to forward diagnostics record");
                    session = None;
                }
            }
        }

        debug!("Diagnostics sink stopped");
    }

    async fn open_session(&self) -> Result<BrokerSession, TopologyError> {
        let mut session = BrokerSession::connect(&self.config).await?;
        session
            .declare_plain_queue(&self.config.topology.log_queue)
            .await?;
        Ok(session)
    }

    async fn publish(
        session: &BrokerSession,
        queue: &str,
        record: &LogRecord,
    ) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(record)?;
        session
            .channel()
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await?
            .await?;
        Ok(())
    }
}
