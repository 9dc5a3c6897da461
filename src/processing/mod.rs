//! Stream processing subsystem.
//!
//! # Data Flow
//! ```text
//! ProcessingRequest (wire)
//!     → phase.rs (lower to ProcessingPhase)
//!     → session.rs (first RequestHeaders: instruction.rs decodes, result cached)
//!     → mutation.rs (phase + instruction → Mutation)
//!     → response.rs (Mutation → ProcessingResponse)
//!     → back onto the same stream, one response per request
//! ```
//!
//! # Design Decisions
//! - One session per stream, strictly sequential inside
//! - Instructions live and die with their session
//! - Unknown phases always pass through

pub mod instruction;
pub mod mutation;
pub mod phase;
pub mod response;
pub mod session;

pub use instruction::{DecodeError, Instruction, InstructionCodec, InstructionOutcome};
pub use mutation::{Mutation, MutationEngine};
pub use phase::{PhaseKind, ProcessingPhase};
pub use session::{Processor, SessionError, SessionState, StreamSession};
