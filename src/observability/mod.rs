//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Stream sessions produce:
//!     → events.rs (SessionEvent at each state transition)
//!     → SessionObserver (injected; LoggingObserver in production)
//!
//! LoggingObserver feeds:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Session ID flows through every event
//! - Sessions report through an observer, never through ambient log calls

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{LoggingObserver, SessionEvent, SessionId, SessionObserver};
