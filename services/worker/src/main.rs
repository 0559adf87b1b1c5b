//! Frame worker for the revid platform.
//!
//! Consumes frame envelopes from its durable queue, dispatches them through
//! the detection/tracking collaborator, and assigns every accepted detection
//! a cross-camera identity from the shared gallery. The consume loop
//! survives broker outages via fixed-delay reconnection and only exits on an
//! explicit shutdown signal.

mod config;
mod detector;
mod frame_pipeline;
mod gallery;

use anyhow::{Context, Result};
use config::WorkerConfig;
use detector::{StubDetector, StubExtractor};
use frame_pipeline::FramePipeline;
use gallery::IdentityGallery;
use revid_broker::consumer::{ConsumerError, FrameConsumer, FrameHandler};
use revid_broker::diagnostics::DiagnosticsSink;
use revid_broker::messages::FramePayload;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bridges the consume loop into the per-frame pipeline
struct WorkerHandler {
    pipeline: FramePipeline,
}

#[async_trait::async_trait]
impl FrameHandler for WorkerHandler {
    async fn handle(&self, frame: FramePayload) -> Result<(), ConsumerError> {
        let annotated = self
            .pipeline
            .process(&frame)
            .await
            .map_err(|e| ConsumerError::Processing(e.to_string()))?;

        // Downstream rendering/alerting consumes these; here they only hit
        // the logs.
        for entry in &annotated {
            info!(
                camera_id = %frame.camera_id,
                track_id = entry.detection.track_id,
                identity_id = entry.identity_id,
                class = %entry.detection.class_name,
                "Identified detection"
            );
        }

        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        broker = %config.broker.endpoint(),
        queue = %config.broker.topology.frame_queue,
        "Starting frame worker"
    );

    config.validate().context("Invalid configuration")?;
    init_metrics(config.service.metrics_port)?;

    let (diagnostics, _diagnostics_task) = DiagnosticsSink::spawn(config.broker.clone());

    // One identity space for every camera this worker sees
    let gallery = Arc::new(IdentityGallery::new());

    // Stub collaborators; deployments wire the real detector and embedding
    // backends at this seam.
    let pipeline = FramePipeline::new(
        Arc::new(StubDetector),
        Arc::new(StubExtractor),
        gallery,
        &config.matching,
    )
    .with_diagnostics(diagnostics.clone());

    let handler = Arc::new(WorkerHandler { pipeline });
    let consumer = Arc::new(FrameConsumer::new(config.broker.clone()).with_diagnostics(diagnostics));

    let signal_consumer = consumer.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_consumer.shutdown();
    });

    consumer.run(handler).await;

    info!("Frame worker stopped");
    Ok(())
}

/// Initialize the tracing subsystem
fn init_tracing(service: &config::ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if service.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

/// Initialize the Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
