//! `envoy.service.ext_proc.v3.ExternalProcessor` implementation.

use std::sync::Arc;

use envoy_types::pb::envoy::service::ext_proc::v3::external_processor_server::{
    ExternalProcessor, ExternalProcessorServer,
};
use envoy_types::pb::envoy::service::ext_proc::v3::{ProcessingRequest, ProcessingResponse};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

use crate::observability::SessionObserver;
use crate::processing::session::OUTBOUND_BUFFER;
use crate::processing::{Processor, StreamSession};

/// Accepts ext_proc streams and runs one session per stream.
#[derive(Clone)]
pub struct SinkService {
    processor: Arc<Processor>,
    observer: Arc<dyn SessionObserver>,
    abort: CancellationToken,
}

impl SinkService {
    pub fn new(
        processor: Arc<Processor>,
        observer: Arc<dyn SessionObserver>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            processor,
            observer,
            abort,
        }
    }

    /// Wrap into the tonic service for registration on a router.
    pub fn into_server(self) -> ExternalProcessorServer<Self> {
        ExternalProcessorServer::new(self)
    }
}

#[tonic::async_trait]
impl ExternalProcessor for SinkService {
    type ProcessStream = ReceiverStream<Result<ProcessingResponse, Status>>;

    async fn process(
        &self,
        request: Request<Streaming<ProcessingRequest>>,
    ) -> Result<Response<Self::ProcessStream>, Status> {
        if self.abort.is_cancelled() {
            return Err(Status::unavailable("sink is shutting down"));
        }

        let peer_addr = request.remote_addr();
        let inbound = request.into_inner().boxed();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);

        let session = StreamSession::new(
            self.processor.clone(),
            inbound,
            tx,
            self.abort.child_token(),
            self.observer.clone(),
        );

        tracing::trace!(session_id = %session.id(), peer_addr = ?peer_addr, "Spawning session");

        tokio::spawn(async move {
            // Outcome is reported through the observer.
            let _ = session.run().await;
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
