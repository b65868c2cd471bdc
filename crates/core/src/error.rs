// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for fieldsync-core operations.
//!
//! Conflicts are deliberately absent: a conflicting change is a classified
//! result ([`crate::change::ChangeStatus::Conflict`]), never an error.

use thiserror::Error;

/// All possible errors that can occur in fieldsync-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("sync state not found for {0}")]
    SyncStateNotFound(String),

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("malformed message: {0}")]
    Transport(String),

    #[error("unknown message type: '{0}'")]
    UnknownMessageType(String),

    #[error("sync store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("invalid {kind}: '{value}'\n  hint: valid values are: {valid}")]
    InvalidEnum {
        kind: &'static str,
        value: String,
        valid: &'static str,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl Error {
    /// Stable machine-readable code sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Handshake(_) => "handshake",
            Error::SyncStateNotFound(_) => "sync_state_not_found",
            Error::Merge(_) | Error::Decode(_) => "merge",
            Error::Transport(_) | Error::Json(_) => "transport",
            Error::UnknownMessageType(_) => "unknown_type",
            Error::StoreUnavailable(_) | Error::Database(_) | Error::Io(_) => "store_unavailable",
            Error::RecordNotFound(_) => "not_found",
            Error::InvalidEnum { .. } | Error::InvalidInput(_) => "invalid_input",
            Error::CorruptedData(_) => "corrupted",
        }
    }

    /// Returns true if the error stems from the durable store being down.
    pub fn is_store_unavailable(&self) -> bool {
        self.code() == "store_unavailable"
    }
}

/// A specialized Result type for fieldsync-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
