//! External processing sink for Envoy.
//!
//! Terminates `envoy.service.ext_proc.v3.ExternalProcessor` streams and
//! answers every phase with a mutation derived from a JSON instruction the
//! client sends in a request header.

// Core subsystems
pub mod config;
pub mod grpc;
pub mod net;
pub mod processing;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::schema::SinkConfig;
pub use grpc::SinkServer;
pub use lifecycle::Shutdown;
