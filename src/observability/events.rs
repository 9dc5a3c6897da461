//! Session lifecycle events and the observer seam.
//!
//! Sessions never log directly. They emit a [`SessionEvent`] at each state
//! transition to an injected [`SessionObserver`]; the server installs
//! [`LoggingObserver`], tests install a recorder.

use std::fmt;

use uuid::Uuid;

use crate::observability::metrics;
use crate::processing::phase::PhaseKind;
use crate::processing::session::{SessionError, SessionState};

/// Unique identifier for a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess-{}", self.0.simple())
    }
}

/// A state transition of one session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The stream was accepted and the session started reading.
    Opened { session: SessionId },

    /// One phase was answered.
    PhaseProcessed {
        session: SessionId,
        phase: PhaseKind,
        /// 1-based position of the message on the stream.
        sequence: u64,
        headers_set: usize,
        headers_removed: usize,
        body_replaced: bool,
    },

    /// The instruction header was present but could not be decoded.
    InstructionRejected { session: SessionId, reason: String },

    /// The peer half-closed the stream.
    Closed { session: SessionId, processed: u64 },

    /// The session ended early.
    Errored {
        session: SessionId,
        processed: u64,
        error: SessionError,
    },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::Opened { session }
            | SessionEvent::PhaseProcessed { session, .. }
            | SessionEvent::InstructionRejected { session, .. }
            | SessionEvent::Closed { session, .. }
            | SessionEvent::Errored { session, .. } => *session,
        }
    }

    /// State of the session once this event has been emitted.
    pub fn state(&self) -> SessionState {
        match self {
            SessionEvent::Opened { .. } => SessionState::Open,
            SessionEvent::PhaseProcessed { .. } | SessionEvent::InstructionRejected { .. } => {
                SessionState::Processing
            }
            SessionEvent::Closed { .. } => SessionState::Closed,
            SessionEvent::Errored { .. } => SessionState::Errored,
        }
    }
}

/// Receives session events.
pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Default observer: structured logs plus metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Opened { session } => {
                metrics::record_stream_opened();
                tracing::debug!(session_id = %session, "Stream opened");
            }
            SessionEvent::PhaseProcessed {
                session,
                phase,
                sequence,
                headers_set,
                headers_removed,
                body_replaced,
            } => {
                metrics::record_phase(phase.as_str());
                tracing::debug!(
                    session_id = %session,
                    phase = %phase,
                    sequence,
                    headers_set,
                    headers_removed,
                    body_replaced,
                    "Phase processed"
                );
            }
            SessionEvent::InstructionRejected { session, reason } => {
                metrics::record_decode_error();
                tracing::warn!(session_id = %session, reason = %reason, "Instruction rejected");
            }
            SessionEvent::Closed { session, processed } => {
                metrics::record_stream_closed("closed");
                tracing::debug!(session_id = %session, processed, "Stream closed");
            }
            SessionEvent::Errored {
                session,
                processed,
                error,
            } => {
                if error.is_cancellation() {
                    metrics::record_stream_closed("aborted");
                    tracing::debug!(session_id = %session, processed, error = %error, "Stream aborted");
                } else {
                    metrics::record_stream_closed("failed");
                    tracing::error!(session_id = %session, processed, error = %error, "Stream failed");
                }
            }
        }
    }
}
