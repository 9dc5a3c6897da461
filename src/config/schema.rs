//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sink.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the processing sink.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SinkConfig {
    /// Listener configuration (bind address, connection and stream limits).
    pub listener: ListenerConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Instruction header settings.
    pub instructions: InstructionConfig,

    /// Body rewrite applied to complete bodies.
    pub body: BodyRewriteConfig,

    /// Processing mode override sent back on the request headers response.
    pub mode_override: Option<ModeOverrideConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:18080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Maximum concurrent HTTP/2 streams per connection.
    pub max_concurrent_streams: u32,

    /// Interval between HTTP/2 keepalive pings. Disabled when unset.
    pub keepalive_interval_secs: Option<u64>,

    /// Set TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:18080".to_string(),
            max_connections: 10_000,
            max_concurrent_streams: 1_000,
            keepalive_interval_secs: None,
            tcp_nodelay: true,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight streams get to finish before they are cancelled.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
        }
    }
}

/// What a session does when the instruction header cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorPolicy {
    /// Answer the phase with an empty mutation and keep the stream open.
    #[default]
    PassThrough,
    /// Answer the phase with an INVALID_ARGUMENT status and end the stream.
    FailStream,
}

/// Instruction header configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstructionConfig {
    /// Request header carrying the JSON instruction payload.
    pub header_name: String,

    /// Behaviour on malformed instruction payloads.
    pub on_decode_error: DecodeErrorPolicy,
}

impl Default for InstructionConfig {
    fn default() -> Self {
        Self {
            header_name: "instructions".to_string(),
            on_decode_error: DecodeErrorPolicy::PassThrough,
        }
    }
}

/// Body rewrite configuration.
///
/// Suffixes are appended only to bodies the proxy marks as complete.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BodyRewriteConfig {
    /// Suffix appended to complete request bodies.
    pub request_suffix: Option<String>,

    /// Suffix appended to complete response bodies.
    pub response_suffix: Option<String>,
}

/// Header phase send mode, mirroring the proxy's `HeaderSendMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMode {
    #[default]
    Default,
    Send,
    Skip,
}

/// Body phase send mode, mirroring the proxy's `BodySendMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyMode {
    #[default]
    None,
    Streamed,
    Buffered,
    BufferedPartial,
}

/// Processing mode the sink asks the proxy to use for the rest of a transaction.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ModeOverrideConfig {
    pub request_header_mode: HeaderMode,
    pub response_header_mode: HeaderMode,
    pub request_body_mode: BodyMode,
    pub response_body_mode: BodyMode,
    pub request_trailer_mode: HeaderMode,
    pub response_trailer_mode: HeaderMode,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
