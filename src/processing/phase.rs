//! Processing phases carried on an ext_proc stream.
//!
//! The wire message names its phase through a protobuf oneof. This module
//! lowers it into [`ProcessingPhase`], a closed enum the mutation engine
//! matches exhaustively, plus [`PhaseKind`], a payload-free tag used for
//! logging, metrics and picking the response shape.

use envoy_types::pb::envoy::config::core::v3::HeaderMap;
use envoy_types::pb::envoy::service::ext_proc::v3::{
    processing_request::Request, HttpBody, HttpHeaders, ProcessingRequest,
};

/// Payload-free identity of a phase message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
    RequestTrailers,
    ResponseTrailers,
    /// The message carried no phase this build recognises.
    Unknown,
}

impl PhaseKind {
    /// Stable lowercase name for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::RequestHeaders => "request_headers",
            PhaseKind::RequestBody => "request_body",
            PhaseKind::ResponseHeaders => "response_headers",
            PhaseKind::ResponseBody => "response_body",
            PhaseKind::RequestTrailers => "request_trailers",
            PhaseKind::ResponseTrailers => "response_trailers",
            PhaseKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single header as observed by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: Vec<u8>,
}

/// Headers delivered on a header phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseHeaders {
    pub headers: Vec<Header>,
    pub end_of_stream: bool,
}

impl PhaseHeaders {
    /// First value of `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }
}

/// Body bytes delivered on a body phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseBody {
    pub body: Vec<u8>,
    /// Set when this chunk completes the body.
    pub end_of_stream: bool,
}

/// One inbound phase message with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingPhase {
    RequestHeaders(PhaseHeaders),
    RequestBody(PhaseBody),
    ResponseHeaders(PhaseHeaders),
    ResponseBody(PhaseBody),
    /// A phase the mutation engine has no case for.
    Other(PhaseKind),
}

impl ProcessingPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            ProcessingPhase::RequestHeaders(_) => PhaseKind::RequestHeaders,
            ProcessingPhase::RequestBody(_) => PhaseKind::RequestBody,
            ProcessingPhase::ResponseHeaders(_) => PhaseKind::ResponseHeaders,
            ProcessingPhase::ResponseBody(_) => PhaseKind::ResponseBody,
            ProcessingPhase::Other(kind) => *kind,
        }
    }
}

impl From<ProcessingRequest> for ProcessingPhase {
    fn from(request: ProcessingRequest) -> Self {
        match request.request {
            Some(Request::RequestHeaders(headers)) => {
                ProcessingPhase::RequestHeaders(headers_from_wire(headers))
            }
            Some(Request::RequestBody(body)) => ProcessingPhase::RequestBody(body_from_wire(body)),
            Some(Request::ResponseHeaders(headers)) => {
                ProcessingPhase::ResponseHeaders(headers_from_wire(headers))
            }
            Some(Request::ResponseBody(body)) => {
                ProcessingPhase::ResponseBody(body_from_wire(body))
            }
            Some(Request::RequestTrailers(_)) => ProcessingPhase::Other(PhaseKind::RequestTrailers),
            Some(Request::ResponseTrailers(_)) => {
                ProcessingPhase::Other(PhaseKind::ResponseTrailers)
            }
            None => ProcessingPhase::Other(PhaseKind::Unknown),
        }
    }
}

fn headers_from_wire(headers: HttpHeaders) -> PhaseHeaders {
    PhaseHeaders {
        headers: headers.headers.map(header_list).unwrap_or_default(),
        end_of_stream: headers.end_of_stream,
    }
}

// Envoy fills either `value` or `raw_value` depending on its version.
fn header_list(map: HeaderMap) -> Vec<Header> {
    map.headers
        .into_iter()
        .map(|h| Header {
            value: if h.value.is_empty() {
                h.raw_value.into()
            } else {
                h.value.into_bytes()
            },
            name: h.key,
        })
        .collect()
}

fn body_from_wire(body: HttpBody) -> PhaseBody {
    PhaseBody {
        body: body.body.into(),
        end_of_stream: body.end_of_stream,
    }
}
