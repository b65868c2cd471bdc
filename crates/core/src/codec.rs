// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Binary update format for document deltas.
//!
//! An update is a 4-byte header (`FSU` + format version) followed by a JSON
//! body listing register writes. The body is treated as opaque by every
//! consumer outside this module; over JSON transports it travels as base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::hlc::Hlc;

const MAGIC: &[u8; 3] = b"FSU";
const FORMAT_VERSION: u8 = 1;

/// A single register write.
///
/// `field: None` addresses the record's presence register (add/remove).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub record: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub stamp: Hlc,
    pub value: Value,
}

/// A set of register writes for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub entity_id: String,
    pub entries: Vec<Entry>,
}

impl Update {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Update { entity_id: entity_id.into(), entries: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest stamp carried by this update.
    pub fn max_stamp(&self) -> Option<Hlc> {
        self.entries.iter().map(|e| e.stamp).max()
    }

    /// Serializes to the binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(MAGIC);
        bytes.push(FORMAT_VERSION);
        serde_json::to_writer(&mut bytes, self)?;
        Ok(bytes)
    }

    /// Parses the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 || &bytes[..3] != MAGIC {
            return Err(Error::Merge("not a document update".to_string()));
        }
        if bytes[3] != FORMAT_VERSION {
            return Err(Error::Merge(format!("unsupported update format version {}", bytes[3])));
        }
        serde_json::from_slice(&bytes[4..]).map_err(|e| Error::Merge(format!("corrupt update body: {e}")))
    }
}

/// Encodes update bytes for JSON transport.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes update bytes received over JSON transport.
pub fn from_base64(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
