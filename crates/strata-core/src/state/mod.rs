// Copyright (C) 2025 Strata Infrastructure Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State document parsing, content digests, and the version store.
//!
//! Remote state is an opaque JSON document from the engine's point of view
//! except for three things it must understand: the embedded serial, the
//! declared outputs, and nothing else. [`StateFile`] models exactly that
//! surface; the rest of the payload travels as raw bytes.

mod store;

pub use store::{CreateVersionOptions, StateVersionStore};

use std::collections::HashMap;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// The parsed surface of a state payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StateFile {
    /// State file format version, passed through untouched.
    #[serde(default)]
    pub version: Option<i64>,
    /// Monotonic serial embedded in the document.
    pub serial: i64,
    /// Lineage marker, passed through untouched.
    #[serde(default)]
    pub lineage: Option<String>,
    /// Declared outputs, keyed by name.
    #[serde(default)]
    pub outputs: HashMap<String, StateFileOutput>,
}

/// One declared output inside a state payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StateFileOutput {
    /// The output value, kept as raw JSON.
    pub value: serde_json::Value,
    /// Whether the value is marked sensitive in the document.
    #[serde(default)]
    pub sensitive: bool,
}

impl StateFile {
    /// Parse a raw payload into its state-file surface.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedStatePayload`] when the bytes are not
    /// a parseable state document, and [`EngineError::Validation`] when the
    /// embedded serial is negative.
    pub fn parse(payload: &[u8]) -> Result<Self, EngineError> {
        let file: StateFile =
            serde_json::from_slice(payload).map_err(|e| EngineError::MalformedStatePayload {
                reason: e.to_string(),
            })?;
        if file.serial < 0 {
            return Err(EngineError::Validation {
                field: "serial".to_string(),
                message: format!("must be non-negative, got {}", file.serial),
            });
        }
        Ok(file)
    }
}

impl StateFileOutput {
    /// Derive the type tag recorded alongside the output.
    pub fn type_tag(&self) -> &'static str {
        output_type(&self.value)
    }
}

/// Type tag for an output value, derived from its JSON shape.
pub fn output_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "tuple",
        serde_json::Value::Object(_) => "object",
    }
}

/// Hex-encoded SHA-256 digest of a raw state payload.
pub fn digest(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}
