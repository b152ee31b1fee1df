//! # Redis Ingest Worker
//!
//! Consumes events from Redis and writes them to stdout as JSON lines.
//!
//! ## Usage
//!
//! ```bash
//! # Configuration from the environment (REDIS_INPUT_*)
//! REDIS_INPUT_KEY=logstash cargo run -p redis-ingest-worker
//!
//! # Or from a TOML file, with environment overrides
//! cargo run -p redis-ingest-worker -- input.toml
//! ```
//!
//! Set `LOG_FORMAT=json` for JSON logs on stderr and `RUST_LOG` to change
//! the log level.

use anyhow::Context;
use redis_ingest_shared::config::InputConfig;
use redis_ingest_shared::events::Event;
use redis_ingest_worker::decoder::output_queue;
use redis_ingest_worker::input::RedisInput;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!(
        "Redis ingest worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = InputConfig::load(path.as_deref()).context("Failed to load configuration")?;
    let grace = config.shutdown_grace();

    let input = RedisInput::from_config(config).context("Failed to create Redis input")?;
    let (queue, events) = output_queue();
    let workers = input.run(queue);
    let sink = tokio::spawn(write_events(events));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping...");
        }
        _ = workers.stopped() => {
            tracing::info!("All workers stopped");
        }
    }
    input.stop();

    let failures = workers.decode_failures();
    let outcome = workers.shutdown(grace).await;
    let written = sink.await.context("Event writer panicked")?;

    tracing::info!(events = written, decode_failures = failures, "Shutdown complete");
    outcome?;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "redis_ingest_worker=info,redis_ingest_shared=info".into());
    let json = std::env::var("LOG_FORMAT").map_or(false, |format| format == "json");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Writes events to stdout, one JSON object per line
///
/// Returns the number of events written. Stops early if stdout is closed,
/// which closes the output queue and stops the workers.
async fn write_events(mut events: mpsc::UnboundedReceiver<Event>) -> u64 {
    let mut written = 0;

    while let Some(event) = events.recv().await {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", event.to_json()) {
            tracing::error!(error = %e, "Failed to write event to stdout");
            break;
        }
        written += 1;
    }

    written
}
