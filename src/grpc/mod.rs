//! gRPC frontend subsystem.
//!
//! # Data Flow
//! ```text
//! PermittedStream (net)
//!     → server.rs (tonic transport, HTTP/2 limits, TraceLayer)
//!     → service.rs (one StreamSession task per ext_proc stream)
//!     → health (grpc.health.v1 beside the processing service)
//! ```
//!
//! # Design Decisions
//! - The transport refuses streams over `max_concurrent_streams`
//! - Shutdown is two-staged: drain, then abort sessions

pub mod server;
pub mod service;

pub use server::{ServerError, SinkServer};
pub use service::SinkService;
