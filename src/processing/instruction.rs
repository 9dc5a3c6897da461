//! Instruction header codec.
//!
//! Callers steer the sink per transaction by sending a JSON object in a
//! well-known request header:
//!
//! ```text
//! instructions: {"addHeaders": {"x-a": "1"}, "removeHeaders": ["x-b"]}
//! ```
//!
//! Decoding is a pure function of the request headers and reports one of
//! three outcomes, so callers can tell "nothing sent" apart from "garbage sent".

use std::collections::{BTreeMap, BTreeSet};

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::processing::phase::PhaseHeaders;

/// Directive decoded from the instruction header.
///
/// Header names are lowercased; a name repeated under different casing keeps
/// the last value seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instruction {
    pub add_headers: BTreeMap<String, String>,
    pub remove_headers: BTreeSet<String>,
}

/// Why an instruction payload was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("instruction header is not valid UTF-8")]
    NotUtf8,

    #[error("malformed instruction JSON: {0}")]
    Json(String),

    #[error("instruction names an empty header")]
    EmptyHeaderName,
}

/// Result of looking for an instruction on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionOutcome {
    /// The header was absent; every phase passes through.
    NoInstruction,
    Decoded(Instruction),
    DecodeError(DecodeError),
}

impl InstructionOutcome {
    /// The decoded instruction, if any.
    pub fn instruction(&self) -> Option<&Instruction> {
        match self {
            InstructionOutcome::Decoded(instruction) => Some(instruction),
            InstructionOutcome::NoInstruction | InstructionOutcome::DecodeError(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default, deserialize_with = "ordered_pairs")]
    add_headers: Vec<(String, String)>,
    #[serde(default)]
    remove_headers: Vec<String>,
}

/// Decodes instructions from a configured header.
#[derive(Debug, Clone)]
pub struct InstructionCodec {
    header_name: String,
}

impl InstructionCodec {
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Look up and decode the instruction header.
    pub fn decode(&self, headers: &PhaseHeaders) -> InstructionOutcome {
        match headers.get(&self.header_name) {
            None => InstructionOutcome::NoInstruction,
            Some(raw) => match parse(raw) {
                Ok(instruction) => InstructionOutcome::Decoded(instruction),
                Err(e) => InstructionOutcome::DecodeError(e),
            },
        }
    }
}

fn parse(raw: &[u8]) -> Result<Instruction, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotUtf8)?;
    let payload: Payload =
        serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;

    let mut instruction = Instruction::default();
    for (name, value) in payload.add_headers {
        instruction.add_headers.insert(normalize(name)?, value);
    }
    for name in payload.remove_headers {
        instruction.remove_headers.insert(normalize(name)?);
    }
    Ok(instruction)
}

// Keeps document order so duplicate names resolve to the last one written.
fn ordered_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("an object of header names to string values")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(pair) = map.next_entry::<String, String>()? {
                pairs.push(pair);
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}

fn normalize(name: String) -> Result<String, DecodeError> {
    if name.is_empty() {
        return Err(DecodeError::EmptyHeaderName);
    }
    Ok(name.to_ascii_lowercase())
}
