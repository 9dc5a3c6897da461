//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use envoy_types::pb::envoy::config::core::v3::{HeaderMap, HeaderValue};
use envoy_types::pb::envoy::service::ext_proc::v3::external_processor_client::ExternalProcessorClient;
use envoy_types::pb::envoy::service::ext_proc::v3::{
    body_mutation, processing_request::Request, processing_response::Response, CommonResponse,
    HttpBody, HttpHeaders, ProcessingRequest, ProcessingResponse,
};
use extproc_sink::config::SinkConfig;
use extproc_sink::grpc::ServerError;
use extproc_sink::lifecycle::Shutdown;
use extproc_sink::net::Listener;
use extproc_sink::observability::LoggingObserver;
use extproc_sink::SinkServer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Status, Streaming};
use tonic_health::pb::health_client::HealthClient;

/// A sink running on an ephemeral port.
pub struct TestSink {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestSink {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Boot the real server. The listener is bound before this returns, so
/// clients can connect immediately.
pub async fn start_sink(mut config: SinkConfig) -> TestSink {
    config.listener.bind_address = "127.0.0.1:0".into();

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let server = SinkServer::new(config, Arc::new(LoggingObserver))
        .with_abort_token(shutdown.abort_token());
    let handle = tokio::spawn(server.run(listener, signal));

    TestSink {
        addr,
        shutdown,
        handle,
    }
}

async fn channel(sink: &TestSink) -> Channel {
    Channel::from_shared(sink.url())
        .unwrap()
        .connect()
        .await
        .unwrap()
}

pub async fn processor_client(sink: &TestSink) -> ExternalProcessorClient<Channel> {
    ExternalProcessorClient::new(channel(sink).await)
}

pub async fn health_client(sink: &TestSink) -> HealthClient<Channel> {
    HealthClient::new(channel(sink).await)
}

/// A client stream driven one message at a time.
pub struct OpenStream {
    requests: Option<mpsc::Sender<ProcessingRequest>>,
    responses: Streaming<ProcessingResponse>,
}

impl OpenStream {
    pub async fn open(client: &mut ExternalProcessorClient<Channel>) -> Self {
        let (tx, rx) = mpsc::channel(4);
        let responses = client
            .process(ReceiverStream::new(rx))
            .await
            .unwrap()
            .into_inner();
        Self {
            requests: Some(tx),
            responses,
        }
    }

    pub async fn send(&mut self, request: ProcessingRequest) {
        if let Some(tx) = &self.requests {
            tx.send(request).await.unwrap();
        }
    }

    pub async fn next(&mut self) -> Result<Option<ProcessingResponse>, Status> {
        self.responses.message().await
    }

    /// Send one message and wait for its response.
    pub async fn exchange(&mut self, request: ProcessingRequest) -> ProcessingResponse {
        self.send(request).await;
        self.next().await.unwrap().expect("stream ended early")
    }

    /// Half-close the request side.
    pub fn close_send(&mut self) {
        self.requests = None;
    }
}

fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    HeaderMap {
        headers: pairs
            .iter()
            .map(|(k, v)| HeaderValue {
                key: k.to_string(),
                raw_value: v.as_bytes().to_vec().into(),
                ..Default::default()
            })
            .collect(),
    }
}

pub fn request_headers(pairs: &[(&str, &str)]) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(Request::RequestHeaders(HttpHeaders {
            headers: Some(header_map(pairs)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn response_headers(pairs: &[(&str, &str)]) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(Request::ResponseHeaders(HttpHeaders {
            headers: Some(header_map(pairs)),
            ..Default::default()
        })),
        ..Default::default()
    }
}

pub fn request_body(body: &[u8], end_of_stream: bool) -> ProcessingRequest {
    ProcessingRequest {
        request: Some(Request::RequestBody(HttpBody {
            body: body.to_vec().into(),
            end_of_stream,
        })),
        ..Default::default()
    }
}

pub fn common(response: &ProcessingResponse) -> Option<&CommonResponse> {
    match response.response.as_ref()? {
        Response::RequestHeaders(r) | Response::ResponseHeaders(r) => r.response.as_ref(),
        Response::RequestBody(r) | Response::ResponseBody(r) => r.response.as_ref(),
        _ => None,
    }
}

/// Upserted headers as `(name, value)` pairs.
pub fn set_headers(response: &ProcessingResponse) -> Vec<(String, String)> {
    common(response)
        .and_then(|c| c.header_mutation.as_ref())
        .map(|m| {
            m.set_headers
                .iter()
                .filter_map(|o| o.header.as_ref())
                .map(|h| {
                    (
                        h.key.clone(),
                        String::from_utf8_lossy(&h.raw_value[..]).into_owned(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn removed_headers(response: &ProcessingResponse) -> Vec<String> {
    common(response)
        .and_then(|c| c.header_mutation.as_ref())
        .map(|m| m.remove_headers.clone())
        .unwrap_or_default()
}

pub fn replaced_body(response: &ProcessingResponse) -> Option<Vec<u8>> {
    match common(response)?.body_mutation.as_ref()?.mutation.as_ref()? {
        body_mutation::Mutation::Body(body) => Some(body[..].to_vec()),
        _ => None,
    }
}

pub fn is_pass_through(response: &ProcessingResponse) -> bool {
    common(response)
        .map(|c| c.header_mutation.is_none() && c.body_mutation.is_none())
        .unwrap_or(true)
}
