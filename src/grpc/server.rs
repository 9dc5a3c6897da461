//! gRPC server setup and configuration.
//!
//! # Responsibilities
//! - Build the tonic transport with HTTP/2 limits from config
//! - Wire up middleware (tracing)
//! - Register the processing and health services
//! - Serve on the bounded listener
//! - Drain on shutdown, abort after the grace period

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;

use crate::config::SinkConfig;
use crate::grpc::service::SinkService;
use crate::health::HealthService;
use crate::net::Listener;
use crate::observability::SessionObserver;
use crate::processing::Processor;

/// How long aborted sessions get to flush before the server gives up on them.
const ABORT_FLUSH: Duration = Duration::from_secs(1);

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// gRPC server for the sink.
pub struct SinkServer {
    config: SinkConfig,
    processor: Arc<Processor>,
    observer: Arc<dyn SessionObserver>,
    health: HealthService,
    abort: CancellationToken,
}

impl SinkServer {
    /// Create a new server with the given configuration.
    pub fn new(config: SinkConfig, observer: Arc<dyn SessionObserver>) -> Self {
        let processor = Arc::new(Processor::from_config(&config));
        Self {
            config,
            processor,
            observer,
            health: HealthService::new(),
            abort: CancellationToken::new(),
        }
    }

    /// Use an externally owned abort token (see `Shutdown::abort_token`).
    pub fn with_abort_token(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    /// Run the server until `shutdown` fires and streams have drained.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        let grace = Duration::from_secs(self.config.shutdown.grace_period_secs);

        tracing::info!(
            address = %addr,
            max_concurrent_streams = self.config.listener.max_concurrent_streams,
            instruction_header = %self.config.instructions.header_name,
            "gRPC server starting"
        );

        let service = SinkService::new(
            self.processor.clone(),
            self.observer.clone(),
            self.abort.clone(),
        );

        let (drain_tx, drain_rx) = oneshot::channel::<()>();

        let server = Server::builder()
            .max_concurrent_streams(Some(self.config.listener.max_concurrent_streams))
            .http2_keepalive_interval(
                self.config
                    .listener
                    .keepalive_interval_secs
                    .map(Duration::from_secs),
            )
            .layer(TraceLayer::new_for_grpc())
            .add_service(self.health.into_server())
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(listener.into_incoming(), async {
                let _ = drain_rx.await;
            });
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                self.abort.cancel();
                result?;
                tracing::info!("gRPC server stopped");
                return Ok(());
            }
            _ = shutdown.recv() => {}
        }

        tracing::info!(grace_period_secs = grace.as_secs(), "Draining streams");
        let _ = drain_tx.send(());

        let result = match tokio::time::timeout(grace, &mut server).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Grace period elapsed, aborting remaining sessions");
                self.abort.cancel();
                match tokio::time::timeout(ABORT_FLUSH, &mut server).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!("Connections still open after abort, exiting anyway");
                        Ok(())
                    }
                }
            }
        };
        self.abort.cancel();
        result?;

        tracing::info!("gRPC server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }
}
