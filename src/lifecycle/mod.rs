//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain streams (grace period)
//!             → Abort remaining sessions → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, abort
//! - Shutdown has timeout: forced abort after the grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_termination;
