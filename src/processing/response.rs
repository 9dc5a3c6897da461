//! Wire response construction.
//!
//! Each phase answers with its own response variant. Header phases carry a
//! `HeadersResponse`, body phases a `BodyResponse`, trailer phases an empty
//! `TrailersResponse`. A message whose phase is unknown gets a response with
//! no phase payload.

use envoy_types::pb::envoy::config::core::v3::{
    header_value_option::HeaderAppendAction, HeaderValue, HeaderValueOption,
};
use envoy_types::pb::envoy::extensions::filters::http::ext_proc::v3::{
    processing_mode::{BodySendMode, HeaderSendMode},
    ProcessingMode,
};
use envoy_types::pb::envoy::service::ext_proc::v3::{
    body_mutation, processing_response::Response, BodyMutation, BodyResponse, CommonResponse,
    HeaderMutation, HeadersResponse, ProcessingResponse, TrailersResponse,
};

use crate::config::{BodyMode, HeaderMode, ModeOverrideConfig};
use crate::processing::mutation::Mutation;
use crate::processing::phase::PhaseKind;

/// Build the response for one phase.
///
/// `mode_override` is attached only to the request headers response, the one
/// place the proxy honours it.
pub fn build_response(
    kind: PhaseKind,
    mutation: Mutation,
    mode_override: Option<&ProcessingMode>,
) -> ProcessingResponse {
    let response = match kind {
        PhaseKind::RequestHeaders => Some(Response::RequestHeaders(headers_response(mutation))),
        PhaseKind::ResponseHeaders => Some(Response::ResponseHeaders(headers_response(mutation))),
        PhaseKind::RequestBody => Some(Response::RequestBody(body_response(mutation))),
        PhaseKind::ResponseBody => Some(Response::ResponseBody(body_response(mutation))),
        PhaseKind::RequestTrailers => Some(Response::RequestTrailers(TrailersResponse::default())),
        PhaseKind::ResponseTrailers => {
            Some(Response::ResponseTrailers(TrailersResponse::default()))
        }
        PhaseKind::Unknown => None,
    };

    ProcessingResponse {
        response,
        mode_override: mode_override
            .filter(|_| kind == PhaseKind::RequestHeaders)
            .cloned(),
        ..Default::default()
    }
}

/// Translate the configured override into the proxy's processing mode.
pub fn processing_mode(config: &ModeOverrideConfig) -> ProcessingMode {
    ProcessingMode {
        request_header_mode: header_mode(config.request_header_mode) as i32,
        response_header_mode: header_mode(config.response_header_mode) as i32,
        request_body_mode: body_mode(config.request_body_mode) as i32,
        response_body_mode: body_mode(config.response_body_mode) as i32,
        request_trailer_mode: header_mode(config.request_trailer_mode) as i32,
        response_trailer_mode: header_mode(config.response_trailer_mode) as i32,
        ..Default::default()
    }
}

fn header_mode(mode: HeaderMode) -> HeaderSendMode {
    match mode {
        HeaderMode::Default => HeaderSendMode::Default,
        HeaderMode::Send => HeaderSendMode::Send,
        HeaderMode::Skip => HeaderSendMode::Skip,
    }
}

fn body_mode(mode: BodyMode) -> BodySendMode {
    match mode {
        BodyMode::None => BodySendMode::None,
        BodyMode::Streamed => BodySendMode::Streamed,
        BodyMode::Buffered => BodySendMode::Buffered,
        BodyMode::BufferedPartial => BodySendMode::BufferedPartial,
    }
}

fn headers_response(mutation: Mutation) -> HeadersResponse {
    HeadersResponse {
        response: Some(common_response(mutation)),
    }
}

fn body_response(mutation: Mutation) -> BodyResponse {
    BodyResponse {
        response: Some(common_response(mutation)),
    }
}

fn common_response(mutation: Mutation) -> CommonResponse {
    let header_mutation = mutation.has_header_changes().then(|| HeaderMutation {
        set_headers: mutation
            .set_headers
            .into_iter()
            .map(|(key, value)| HeaderValueOption {
                header: Some(HeaderValue {
                    key,
                    raw_value: value.into_bytes().into(),
                    ..Default::default()
                }),
                append_action: HeaderAppendAction::OverwriteIfExistsOrAdd as i32,
                ..Default::default()
            })
            .collect(),
        remove_headers: mutation.remove_headers,
    });
    let body_mutation = mutation.body.map(|body| BodyMutation {
        mutation: Some(body_mutation::Mutation::Body(body.into())),
    });

    CommonResponse {
        header_mutation,
        body_mutation,
        ..Default::default()
    }
}
