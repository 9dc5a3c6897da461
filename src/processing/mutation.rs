//! Mutation engine.
//!
//! # Responsibilities
//! - Turn a phase plus the stream's instruction into concrete header changes
//! - Apply the configured body rewrite to complete bodies
//! - Recompute `content-length` whenever a rewrite changes the body length
//!
//! # Design Decisions
//! - Never fails: the worst case is a pass-through mutation
//! - Needs no data from other phases
//! - Removals never name a header that is also upserted, so adds win no
//!   matter which order the proxy applies the two lists in

use crate::config::BodyRewriteConfig;
use crate::processing::instruction::Instruction;
use crate::processing::phase::{PhaseBody, ProcessingPhase};

/// Concrete changes for one phase response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mutation {
    /// Headers to overwrite or add, in emission order.
    pub set_headers: Vec<(String, String)>,
    /// Headers to remove.
    pub remove_headers: Vec<String>,
    /// Full replacement for a complete body.
    pub body: Option<Vec<u8>>,
}

impl Mutation {
    /// A mutation that changes nothing.
    pub fn pass_through() -> Self {
        Self::default()
    }

    pub fn is_pass_through(&self) -> bool {
        self.set_headers.is_empty() && self.remove_headers.is_empty() && self.body.is_none()
    }

    pub fn has_header_changes(&self) -> bool {
        !self.set_headers.is_empty() || !self.remove_headers.is_empty()
    }
}

/// Computes per-phase mutations.
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    request_suffix: Option<Vec<u8>>,
    response_suffix: Option<Vec<u8>>,
}

impl MutationEngine {
    /// Build an engine from the body rewrite settings. Empty suffixes are
    /// treated as unset.
    pub fn new(body: &BodyRewriteConfig) -> Self {
        let suffix = |s: &Option<String>| {
            s.as_ref()
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec())
        };
        Self {
            request_suffix: suffix(&body.request_suffix),
            response_suffix: suffix(&body.response_suffix),
        }
    }

    /// Compute the mutation for `phase`.
    pub fn mutate(&self, phase: &ProcessingPhase, instruction: Option<&Instruction>) -> Mutation {
        match phase {
            ProcessingPhase::RequestHeaders(_) | ProcessingPhase::ResponseHeaders(_) => {
                instruction.map(header_mutation).unwrap_or_default()
            }
            ProcessingPhase::RequestBody(body) => {
                body_mutation(body, self.request_suffix.as_deref())
            }
            ProcessingPhase::ResponseBody(body) => {
                body_mutation(body, self.response_suffix.as_deref())
            }
            ProcessingPhase::Other(_) => Mutation::pass_through(),
        }
    }
}

fn header_mutation(instruction: &Instruction) -> Mutation {
    let remove_headers = instruction
        .remove_headers
        .iter()
        .filter(|name| !instruction.add_headers.contains_key(*name))
        .cloned()
        .collect();
    let set_headers = instruction
        .add_headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    Mutation {
        set_headers,
        remove_headers,
        body: None,
    }
}

// Streamed chunks are never rewritten; only a body marked complete is.
fn body_mutation(body: &PhaseBody, suffix: Option<&[u8]>) -> Mutation {
    let suffix = match suffix {
        Some(suffix) if body.end_of_stream => suffix,
        _ => return Mutation::pass_through(),
    };

    let mut rewritten = Vec::with_capacity(body.body.len() + suffix.len());
    rewritten.extend_from_slice(&body.body);
    rewritten.extend_from_slice(suffix);

    let mut mutation = Mutation::pass_through();
    if rewritten.len() != body.body.len() {
        mutation
            .set_headers
            .push(("content-length".to_string(), rewritten.len().to_string()));
    }
    mutation.body = Some(rewritten);
    mutation
}
