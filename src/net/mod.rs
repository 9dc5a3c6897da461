//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → PermittedStream (holds a slot for the connection's lifetime)
//!     → Hand off to the gRPC server (HTTP/2 stream limits)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Per-connection stream limits are left to the HTTP/2 transport

pub mod listener;

pub use listener::{Listener, ListenerError, PermittedStream};
