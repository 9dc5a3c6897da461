//! Liveness reporting subsystem.
//!
//! # Data Flow
//! ```text
//! grpc.health.v1.Health/Check
//!     → service.rs (HealthService)
//!     → SERVING while the process is up
//! ```
//!
//! # Design Decisions
//! - The frontend owns one `HealthService` and registers it next to the
//!   processing service; there is no global health registry
//! - Liveness only: the sink has no dependencies whose readiness could vary

pub mod service;

pub use service::HealthService;
