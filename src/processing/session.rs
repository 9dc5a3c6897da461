//! Per-stream session state machine.
//!
//! # States
//! ```text
//! Open → Processing → Closed    (peer half-closed the stream)
//!                   → Errored   (cancellation, transport failure,
//!                                rejected instruction under fail_stream)
//! ```
//!
//! # Design Decisions
//! - Strict alternation: response N is handed to the transport before
//!   message N+1 is read
//! - Every suspension point races the cancellation token
//! - Cancellation stops without sending anything further; a transport
//!   failure reports an error status if the stream can still carry one
//! - No state is shared with other sessions; only the read-only
//!   [`Processor`] is

use std::sync::Arc;

use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::ProcessingMode;
use envoy_types::pb::envoy::service::ext_proc::v3::{ProcessingRequest, ProcessingResponse};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

use crate::config::{DecodeErrorPolicy, SinkConfig};
use crate::observability::{SessionEvent, SessionId, SessionObserver};
use crate::processing::instruction::{DecodeError, InstructionCodec, InstructionOutcome};
use crate::processing::mutation::MutationEngine;
use crate::processing::phase::ProcessingPhase;
use crate::processing::response::{build_response, processing_mode};

/// Inbound half of a stream.
pub type InboundStream = BoxStream<'static, Result<ProcessingRequest, Status>>;

/// Outbound half of a stream.
pub type OutboundSender = mpsc::Sender<Result<ProcessingResponse, Status>>;

/// Capacity of the outbound channel. Alternation keeps at most one response
/// in flight, so a single slot is enough.
pub const OUTBOUND_BUFFER: usize = 1;

/// Why a session ended early.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The server cancelled the session or the caller's deadline passed.
    #[error("stream canceled")]
    Canceled,

    /// The transport stopped accepting responses.
    #[error("peer stopped reading responses")]
    PeerGone,

    #[error("cannot receive stream request: {}", .0.message())]
    Receive(Status),

    /// The instruction header was malformed and policy is `fail_stream`.
    #[error("instruction rejected: {0}")]
    InstructionRejected(DecodeError),
}

impl SessionError {
    /// Cancellations are expected terminations, not application errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SessionError::Canceled | SessionError::PeerGone)
    }

    /// Status reported to the peer, if the stream should carry one.
    fn status(&self) -> Option<Status> {
        match self {
            SessionError::Canceled | SessionError::PeerGone => None,
            SessionError::Receive(_) => Some(Status::unknown(self.to_string())),
            SessionError::InstructionRejected(_) => Some(Status::invalid_argument(self.to_string())),
        }
    }
}

/// Lifecycle state of a session, as reported by its events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Processing,
    Closed,
    Errored,
}

/// Read-only processing settings shared by every session.
#[derive(Debug, Clone)]
pub struct Processor {
    codec: InstructionCodec,
    engine: MutationEngine,
    decode_policy: DecodeErrorPolicy,
    mode_override: Option<ProcessingMode>,
}

impl Processor {
    pub fn new(codec: InstructionCodec, engine: MutationEngine) -> Self {
        Self {
            codec,
            engine,
            decode_policy: DecodeErrorPolicy::PassThrough,
            mode_override: None,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            InstructionCodec::new(config.instructions.header_name.clone()),
            MutationEngine::new(&config.body),
        )
        .with_decode_policy(config.instructions.on_decode_error)
        .with_mode_override(config.mode_override.as_ref().map(processing_mode))
    }

    pub fn with_decode_policy(mut self, policy: DecodeErrorPolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    pub fn with_mode_override(mut self, mode: Option<ProcessingMode>) -> Self {
        self.mode_override = mode;
        self
    }
}

/// One ext_proc stream.
pub struct StreamSession {
    id: SessionId,
    processor: Arc<Processor>,
    inbound: InboundStream,
    outbound: OutboundSender,
    cancel: CancellationToken,
    observer: Arc<dyn SessionObserver>,
    /// Decoded from the first request headers message, if one arrives.
    instruction: Option<InstructionOutcome>,
    /// Responses handed to the transport.
    processed: u64,
}

impl StreamSession {
    pub fn new(
        processor: Arc<Processor>,
        inbound: InboundStream,
        outbound: OutboundSender,
        cancel: CancellationToken,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            processor,
            inbound,
            outbound,
            cancel,
            observer,
            instruction: None,
            processed: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Drive the stream to completion.
    ///
    /// Returns the number of responses sent when the peer closes gracefully.
    pub async fn run(mut self) -> Result<u64, SessionError> {
        self.emit(SessionEvent::Opened { session: self.id });

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SessionError::Canceled),
                _ = self.outbound.closed() => Err(SessionError::PeerGone),
                next = self.inbound.next() => Ok(next),
            };

            let request = match next {
                Err(error) => return self.finish(Err(error)).await,
                Ok(None) => return self.finish(Ok(())).await,
                Ok(Some(Err(status))) => {
                    let error = match status.code() {
                        Code::Cancelled | Code::DeadlineExceeded => SessionError::Canceled,
                        _ => SessionError::Receive(status),
                    };
                    return self.finish(Err(error)).await;
                }
                Ok(Some(Ok(request))) => request,
            };

            let response = match self.process(request) {
                Ok(response) => response,
                Err(error) => return self.finish(Err(error)).await,
            };

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SessionError::Canceled),
                sent = self.outbound.send(Ok(response)) => sent.map_err(|_| SessionError::PeerGone),
            };
            if let Err(error) = sent {
                return self.finish(Err(error)).await;
            }
            self.processed += 1;
        }
    }

    fn process(&mut self, request: ProcessingRequest) -> Result<ProcessingResponse, SessionError> {
        let phase = ProcessingPhase::from(request);
        let kind = phase.kind();

        if let ProcessingPhase::RequestHeaders(headers) = &phase {
            if self.instruction.is_none() {
                let outcome = self.processor.codec.decode(headers);
                if let InstructionOutcome::DecodeError(e) = &outcome {
                    self.emit(SessionEvent::InstructionRejected {
                        session: self.id,
                        reason: e.to_string(),
                    });
                    if self.processor.decode_policy == DecodeErrorPolicy::FailStream {
                        return Err(SessionError::InstructionRejected(e.clone()));
                    }
                }
                self.instruction = Some(outcome);
            }
        }

        let instruction = self
            .instruction
            .as_ref()
            .and_then(InstructionOutcome::instruction);
        let mutation = self.processor.engine.mutate(&phase, instruction);

        self.emit(SessionEvent::PhaseProcessed {
            session: self.id,
            phase: kind,
            sequence: self.processed + 1,
            headers_set: mutation.set_headers.len(),
            headers_removed: mutation.remove_headers.len(),
            body_replaced: mutation.body.is_some(),
        });

        Ok(build_response(
            kind,
            mutation,
            self.processor.mode_override.as_ref(),
        ))
    }

    async fn finish(self, outcome: Result<(), SessionError>) -> Result<u64, SessionError> {
        match outcome {
            Ok(()) => {
                self.emit(SessionEvent::Closed {
                    session: self.id,
                    processed: self.processed,
                });
                Ok(self.processed)
            }
            Err(error) => {
                if let Some(status) = error.status() {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {}
                        _ = self.outbound.send(Err(status)) => {}
                    }
                }
                self.emit(SessionEvent::Errored {
                    session: self.id,
                    processed: self.processed,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::phase::PhaseKind;
    use envoy_types::pb::envoy::config::core::v3::{HeaderMap, HeaderValue};
    use envoy_types::pb::envoy::service::ext_proc::v3::{
        processing_request::Request, processing_response::Response, CommonResponse, HttpBody,
        HttpHeaders, HttpTrailers,
    };
    use std::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio_stream::wrappers::ReceiverStream;

    const INSTRUCTION: &str = r#"{"addHeaders":{"x-a":"1"},"removeHeaders":["x-b","x-c"]}"#;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<SessionEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl SessionObserver for Recorder {
        fn on_event(&self, event: &SessionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    struct Harness {
        requests: mpsc::Sender<Result<ProcessingRequest, Status>>,
        responses: mpsc::Receiver<Result<ProcessingResponse, Status>>,
        cancel: CancellationToken,
        recorder: Arc<Recorder>,
        handle: JoinHandle<Result<u64, SessionError>>,
    }

    impl Harness {
        fn start(processor: Processor) -> Self {
            let (req_tx, req_rx) = mpsc::channel(16);
            let (resp_tx, resp_rx) = mpsc::channel(OUTBOUND_BUFFER);
            let cancel = CancellationToken::new();
            let recorder = Arc::new(Recorder::default());
            let session = StreamSession::new(
                Arc::new(processor),
                ReceiverStream::new(req_rx).boxed(),
                resp_tx,
                cancel.clone(),
                recorder.clone(),
            );

            Self {
                requests: req_tx,
                responses: resp_rx,
                cancel,
                recorder,
                handle: tokio::spawn(session.run()),
            }
        }

        async fn send(&self, request: Request) {
            self.requests
                .send(Ok(ProcessingRequest {
                    request: Some(request),
                    ..Default::default()
                }))
                .await
                .unwrap();
        }

        async fn exchange(&mut self, request: Request) -> ProcessingResponse {
            self.send(request).await;
            self.responses.recv().await.unwrap().unwrap()
        }

        async fn close(self) -> (Result<u64, SessionError>, Vec<SessionEvent>) {
            drop(self.requests);
            let result = self.handle.await.unwrap();
            (result, self.recorder.events())
        }
    }

    fn processor() -> Processor {
        Processor::new(InstructionCodec::new("instructions"), MutationEngine::default())
    }

    fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
        HeaderMap {
            headers: pairs
                .iter()
                .map(|(k, v)| HeaderValue {
                    key: k.to_string(),
                    value: v.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn request_headers(pairs: &[(&str, &str)]) -> Request {
        Request::RequestHeaders(HttpHeaders {
            headers: Some(header_map(pairs)),
            ..Default::default()
        })
    }

    fn response_headers(pairs: &[(&str, &str)]) -> Request {
        Request::ResponseHeaders(HttpHeaders {
            headers: Some(header_map(pairs)),
            ..Default::default()
        })
    }

    fn request_body(body: &[u8], end_of_stream: bool) -> Request {
        Request::RequestBody(HttpBody {
            body: body.to_vec().into(),
            end_of_stream,
            ..Default::default()
        })
    }

    fn response_body(body: &[u8], end_of_stream: bool) -> Request {
        Request::ResponseBody(HttpBody {
            body: body.to_vec().into(),
            end_of_stream,
            ..Default::default()
        })
    }

    fn common(response: &ProcessingResponse) -> &CommonResponse {
        match response.response.as_ref() {
            Some(Response::RequestHeaders(r)) | Some(Response::ResponseHeaders(r)) => {
                r.response.as_ref().unwrap()
            }
            Some(Response::RequestBody(r)) | Some(Response::ResponseBody(r)) => {
                r.response.as_ref().unwrap()
            }
            other => panic!("no common response in {other:?}"),
        }
    }

    fn is_pass_through(response: &ProcessingResponse) -> bool {
        let common = common(response);
        common.header_mutation.is_none() && common.body_mutation.is_none()
    }

    fn set_header_keys(response: &ProcessingResponse) -> Vec<(String, Vec<u8>)> {
        common(response)
            .header_mutation
            .as_ref()
            .map(|m| {
                m.set_headers
                    .iter()
                    .filter_map(|o| o.header.as_ref())
                    .map(|h| (h.key.clone(), h.raw_value[..].to_vec()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn removed(response: &ProcessingResponse) -> Vec<String> {
        common(response)
            .header_mutation
            .as_ref()
            .map(|m| m.remove_headers.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn pass_through_without_instruction() {
        let mut h = Harness::start(processor());

        let responses = vec![
            h.exchange(request_headers(&[("x-b", "v")])).await,
            h.exchange(request_body(b"payload", true)).await,
            h.exchange(response_headers(&[("x-c", "v")])).await,
            h.exchange(response_body(b"reply", true)).await,
        ];
        assert!(responses.iter().all(is_pass_through));

        let (result, events) = h.close().await;
        assert_eq!(result.unwrap(), 4);
        assert!(matches!(events.first(), Some(SessionEvent::Opened { .. })));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Closed { processed: 4, .. })
        ));
        let states: Vec<_> = events.iter().map(SessionEvent::state).collect();
        assert_eq!(states.first(), Some(&SessionState::Open));
        assert_eq!(states.last(), Some(&SessionState::Closed));
        assert!(states[1..states.len() - 1]
            .iter()
            .all(|s| *s == SessionState::Processing));
    }

    #[tokio::test]
    async fn applies_instruction_to_both_header_phases() {
        let mut h = Harness::start(processor());

        let first = h
            .exchange(request_headers(&[
                ("x-b", "v"),
                ("x-c", "v"),
                ("x-d", "v"),
                ("instructions", INSTRUCTION),
            ]))
            .await;
        assert!(matches!(first.response, Some(Response::RequestHeaders(_))));
        assert_eq!(removed(&first), vec!["x-b", "x-c"]);
        assert_eq!(set_header_keys(&first), vec![("x-a".to_string(), b"1".to_vec())]);

        let body = h.exchange(request_body(b"payload", true)).await;
        assert!(is_pass_through(&body));

        let second = h.exchange(response_headers(&[("x-b", "v")])).await;
        assert!(matches!(second.response, Some(Response::ResponseHeaders(_))));
        assert_eq!(removed(&second), vec!["x-b", "x-c"]);
        assert_eq!(set_header_keys(&second), vec![("x-a".to_string(), b"1".to_vec())]);

        let (result, _) = h.close().await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn skipped_request_headers_never_decode_instruction() {
        let mut h = Harness::start(processor());

        let headers = h
            .exchange(response_headers(&[("x-b", "v"), ("instructions", INSTRUCTION)]))
            .await;
        let body = h.exchange(response_body(b"reply", true)).await;
        assert!(is_pass_through(&headers));
        assert!(is_pass_through(&body));

        let (result, _) = h.close().await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn instruction_is_decoded_once() {
        let mut h = Harness::start(processor());

        h.exchange(request_headers(&[("instructions", INSTRUCTION)])).await;
        let again = h
            .exchange(request_headers(&[(
                "instructions",
                r#"{"addHeaders":{"x-z":"9"}}"#,
            )]))
            .await;
        assert_eq!(set_header_keys(&again), vec![("x-a".to_string(), b"1".to_vec())]);

        h.close().await.0.unwrap();
    }

    #[tokio::test]
    async fn malformed_instruction_does_not_stop_stream() {
        let mut h = Harness::start(processor());

        let headers = h
            .exchange(request_headers(&[("x-b", "v"), ("instructions", "invalid json value")]))
            .await;
        assert!(is_pass_through(&headers));
        let reply = h.exchange(response_headers(&[("x-b", "v")])).await;
        assert!(is_pass_through(&reply));

        let (result, events) = h.close().await;
        assert_eq!(result.unwrap(), 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::InstructionRejected { .. })));
    }

    #[tokio::test]
    async fn malformed_instruction_fails_stream_when_configured() {
        let mut h = Harness::start(processor().with_decode_policy(DecodeErrorPolicy::FailStream));

        h.send(request_headers(&[("instructions", "{not json")])).await;
        let status = h.responses.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert!(h.responses.recv().await.is_none());

        let (result, events) = h.close().await;
        assert!(matches!(result, Err(SessionError::InstructionRejected(_))));
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Errored { processed: 0, .. })
        ));
    }

    #[tokio::test]
    async fn responses_follow_request_order() {
        let mut h = Harness::start(processor());

        h.send(request_headers(&[])).await;
        h.send(request_body(b"a", false)).await;
        h.send(request_body(b"b", true)).await;
        h.send(Request::RequestTrailers(HttpTrailers::default())).await;
        h.send(response_headers(&[])).await;
        h.send(response_body(b"c", true)).await;
        h.send(Request::ResponseTrailers(HttpTrailers::default())).await;
        drop(h.requests);

        let mut kinds = Vec::new();
        while let Some(response) = h.responses.recv().await {
            kinds.push(match response.unwrap().response {
                Some(Response::RequestHeaders(_)) => PhaseKind::RequestHeaders,
                Some(Response::RequestBody(_)) => PhaseKind::RequestBody,
                Some(Response::RequestTrailers(_)) => PhaseKind::RequestTrailers,
                Some(Response::ResponseHeaders(_)) => PhaseKind::ResponseHeaders,
                Some(Response::ResponseBody(_)) => PhaseKind::ResponseBody,
                Some(Response::ResponseTrailers(_)) => PhaseKind::ResponseTrailers,
                _ => PhaseKind::Unknown,
            });
        }
        assert_eq!(
            kinds,
            vec![
                PhaseKind::RequestHeaders,
                PhaseKind::RequestBody,
                PhaseKind::RequestBody,
                PhaseKind::RequestTrailers,
                PhaseKind::ResponseHeaders,
                PhaseKind::ResponseBody,
                PhaseKind::ResponseTrailers,
            ]
        );
        assert_eq!(h.handle.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn message_without_phase_is_answered() {
        let mut h = Harness::start(processor());

        h.requests
            .send(Ok(ProcessingRequest::default()))
            .await
            .unwrap();
        let response = h.responses.recv().await.unwrap().unwrap();
        assert!(response.response.is_none());

        assert_eq!(h.close().await.0.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_sessions_are_isolated() {
        let shared = processor();
        let mut a = Harness::start(shared.clone());
        let mut b = Harness::start(shared);

        let (ra, rb) = tokio::join!(
            a.exchange(request_headers(&[("x-b", "v"), ("instructions", INSTRUCTION)])),
            b.exchange(request_headers(&[("x-b", "v")])),
        );
        assert!(!is_pass_through(&ra));
        assert!(is_pass_through(&rb));

        let (ra, rb) = tokio::join!(
            a.exchange(response_headers(&[("x-b", "v")])),
            b.exchange(response_headers(&[("x-b", "v")])),
        );
        assert_eq!(removed(&ra), vec!["x-b", "x-c"]);
        assert!(is_pass_through(&rb));

        let ((res_a, events_a), (res_b, events_b)) = tokio::join!(a.close(), b.close());
        res_a.unwrap();
        res_b.unwrap();
        let id_a = events_a[0].session();
        let id_b = events_b[0].session();
        assert_ne!(id_a, id_b);
        assert!(events_a.iter().all(|e| e.session() == id_a));
        assert!(events_b.iter().all(|e| e.session() == id_b));
    }

    #[tokio::test]
    async fn transport_error_is_distinct_from_graceful_close() {
        let mut h = Harness::start(processor());

        h.exchange(request_headers(&[])).await;
        h.requests
            .send(Err(Status::unavailable("connection reset")))
            .await
            .unwrap();

        let status = h.responses.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Unknown);
        assert!(status.message().contains("connection reset"));

        let (result, events) = h.close().await;
        assert_eq!(events.last().map(SessionEvent::state), Some(SessionState::Errored));
        let error = result.unwrap_err();
        assert!(matches!(error, SessionError::Receive(_)));
        assert!(!error.is_cancellation());
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Errored { processed: 1, .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_receive_is_not_graceful() {
        let mut h = Harness::start(processor());

        h.requests
            .send(Err(Status::cancelled("client went away")))
            .await
            .unwrap();
        assert!(h.responses.recv().await.is_none());

        let (result, _) = h.close().await;
        assert!(matches!(result, Err(SessionError::Canceled)));
    }

    #[tokio::test]
    async fn cancellation_stops_without_responding() {
        let mut h = Harness::start(processor());

        h.exchange(request_headers(&[])).await;
        h.cancel.cancel();
        let result = (&mut h.handle).await.unwrap();
        assert!(matches!(result, Err(SessionError::Canceled)));

        // Anything sent after cancellation goes unanswered.
        let _ = h.requests.send(Ok(ProcessingRequest::default())).await;
        assert!(h.responses.recv().await.is_none());

        let events = h.recorder.events();
        match events.last() {
            Some(SessionEvent::Errored { error, processed, .. }) => {
                assert!(error.is_cancellation());
                assert_eq!(*processed, 1);
            }
            other => panic!("unexpected last event {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_response_stream_aborts_session() {
        let h = Harness::start(processor());
        drop(h.responses);

        let result = h.handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::PeerGone)));
    }

    #[tokio::test]
    async fn mode_override_rides_on_request_headers() {
        let mode = ProcessingMode {
            response_body_mode: 2,
            ..Default::default()
        };
        let mut h = Harness::start(processor().with_mode_override(Some(mode.clone())));

        let first = h.exchange(request_headers(&[])).await;
        assert_eq!(first.mode_override, Some(mode));
        let later = h.exchange(response_headers(&[])).await;
        assert!(later.mode_override.is_none());

        h.close().await.0.unwrap();
    }

    #[test]
    fn processor_from_config() {
        let mut config = SinkConfig::default();
        config.instructions.header_name = "x-sink".into();
        config.instructions.on_decode_error = DecodeErrorPolicy::FailStream;
        config.mode_override = Some(Default::default());

        let processor = Processor::from_config(&config);
        assert_eq!(processor.codec.header_name(), "x-sink");
        assert_eq!(processor.decode_policy, DecodeErrorPolicy::FailStream);
        assert!(processor.mode_override.is_some());
    }
}
