//! extproc-sink server binary.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────┐
//!                       │                   EXTPROC SINK                   │
//!                       │                                                  │
//!   Envoy ext_proc      │  ┌─────────┐    ┌─────────┐    ┌──────────────┐  │
//!   stream  ────────────┼─▶│   net   │───▶│  grpc   │───▶│  processing  │  │
//!                       │  │listener │    │ server  │    │   session    │  │
//!                       │  └─────────┘    └────┬────┘    └──────┬───────┘  │
//!                       │                      │                │          │
//!                       │                      ▼                ▼          │
//!                       │               ┌────────────┐   ┌─────────────┐   │
//!   grpc.health.v1 ◀────┼───────────────│   health   │   │ codec +     │   │
//!                       │               └────────────┘   │ mutation    │   │
//!                       │                                └─────────────┘   │
//!                       │  ┌────────────────────────────────────────────┐  │
//!                       │  │ config · observability · lifecycle         │  │
//!                       │  └────────────────────────────────────────────┘  │
//!                       └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use extproc_sink::config::{load_config, validation::validate_config, SinkConfig};
use extproc_sink::lifecycle::{wait_for_termination, Shutdown};
use extproc_sink::net::Listener;
use extproc_sink::observability::{logging, metrics, LoggingObserver};
use extproc_sink::SinkServer;

#[derive(Parser)]
#[command(name = "extproc-sink")]
#[command(about = "Envoy external processing sink", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => SinkConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("config error: {}", error);
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "extproc-sink starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        max_concurrent_streams = config.listener.max_concurrent_streams,
        grace_period_secs = config.shutdown.grace_period_secs,
        on_decode_error = ?config.instructions.on_decode_error,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        trigger.trigger();
    });

    let server = SinkServer::new(config, Arc::new(LoggingObserver))
        .with_abort_token(shutdown.abort_token());
    server.run(listener, signal).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
