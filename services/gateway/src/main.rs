//! Camera registration gateway for the revid platform.
//!
//! Reads a JSON batch of camera descriptors, validates each one, and
//! broadcasts an activation message per valid camera onto the fanout
//! exchange. The HTTP surface that normally fronts this sits outside the
//! core; the binary takes the batch from a file (or stdin with `-`) and
//! prints the HTTP-style response on stdout.

mod config;
mod registration;

use anyhow::{Context, Result};
use config::GatewayConfig;
use registration::{CameraRegistration, RegistrationGateway};
use revid_broker::diagnostics::DiagnosticsSink;
use revid_broker::publisher::AmqpPublisher;
use std::io::Read;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.service);

    config
        .broker
        .validate()
        .context("Invalid broker configuration")?;

    let args: Vec<String> = std::env::args().collect();
    let Some(input) = args.get(1) else {
        print_usage();
        std::process::exit(2);
    };

    info!(
        service = %config.service.name,
        broker = %config.broker.endpoint(),
        "Starting registration gateway"
    );

    let batch = read_batch(input)?;
    info!(cameras = batch.len(), "Loaded registration batch");

    let (diagnostics, diagnostics_task) = DiagnosticsSink::spawn(config.broker.clone());
    let gateway = RegistrationGateway::new(AmqpPublisher::new(config.broker.clone()))
        .with_diagnostics(diagnostics.clone());

    let response = gateway.register_cameras(&batch).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    // Drop every handle so the sink drains its queue and exits
    drop(gateway);
    drop(diagnostics);
    let _ = diagnostics_task.await;

    if !response.is_success() {
        std::process::exit(1);
    }
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

fn print_usage() {
    println!("Usage: revid-gateway <batch.json | ->");
    println!();
    println!("Reads a registration batch and broadcasts camera activations.");
    println!();
    println!("Batch format:");
    println!("  {{\"cameras\": [{{\"camera_id\": \"cam-20\", \"url\": \"rtsp://...\",");
    println!("                 \"user_id\": \"u1\", \"running\": true,");
    println!("                 \"objectlist\": \"person, car\"}}]}}");
    println!();
    println!("Environment variables:");
    println!("  GATEWAY__BROKER__HOST   - Broker host (default: localhost)");
    println!("  GATEWAY__BROKER__PORT   - Broker port (default: 5672)");
}

fn read_batch(input: &str) -> Result<Vec<CameraRegistration>> {
    let raw = if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read batch from stdin")?;
        buf
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read batch file {input}"))?
    };

    parse_batch(&raw)
}

fn parse_batch(raw: &str) -> Result<Vec<CameraRegistration>> {
    #[derive(serde::Deserialize)]
    struct Batch {
        cameras: Vec<CameraRegistration>,
    }

    if let Ok(batch) = serde_json::from_str::<Batch>(raw) {
        return Ok(batch.cameras);
    }
    serde_json::from_str::<Vec<CameraRegistration>>(raw).context("Failed to parse camera batch")
}
