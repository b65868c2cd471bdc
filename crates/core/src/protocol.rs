// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket protocol messages for client-server communication.
//!
//! Every frame is a JSON envelope `{type, timestamp, data}`:
//! - Clients push changes, request changes, settle conflicts and exchange
//!   document deltas
//! - The server answers each request on the same connection and broadcasts
//!   document deltas to every other session

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::change::{ChangeResult, SyncChange};
use crate::conflict::Resolution;
use crate::error::{Error, Result};
use crate::note::note_entity_id;
use crate::photo::photos_entity_id;
use crate::sync_state::ConflictPolicy;

/// Wire frame shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender's clock, ms since epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Parses a text frame. Malformed JSON is a [`Error::Transport`].
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::Transport(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        // A missing `data` means "no fields".
        let data = if self.data.is_null() { Value::Object(Default::default()) } else { self.data.clone() };
        serde_json::from_value(data).map_err(|e| Error::Transport(format!("invalid '{}' payload: {e}", self.kind)))
    }
}

/// Kind of replicated document a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    ParcelNote,
    ReportPhotos,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::ParcelNote => "parcel_note",
            EntityKind::ReportPhotos => "report_photos",
        }
    }

    /// Document id for an entity of this kind.
    pub fn document_id(&self, entity_id: &str) -> String {
        match self {
            EntityKind::ParcelNote => note_entity_id(entity_id),
            EntityKind::ReportPhotos => photos_entity_id(entity_id),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Server timestamp of the client's last completed sync.
    #[serde(default)]
    pub last_sync_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpdate {
    pub changes: Vec<SyncChange>,
    /// Replaces the device's stored policy before the batch is classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_resolution: Option<ConflictPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolutionRequest {
    pub resolutions: Vec<Resolution>,
}

/// Names one replicated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRef {
    pub entity_kind: EntityKind,
    pub entity_id: String,
}

/// A base64 document delta or full state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocPayload {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub update: String,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    SyncRequest(SyncRequest),
    SyncUpdate(SyncUpdate),
    ConflictResolution(ConflictResolutionRequest),
    Ping,
    DocUpdate(DocPayload),
    DocState(DocRef),
}

impl ClientMessage {
    /// Decodes a client envelope.
    ///
    /// Unknown types yield [`Error::UnknownMessageType`]; bad payloads yield
    /// [`Error::Transport`].
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(match envelope.kind.as_str() {
            "sync_request" => ClientMessage::SyncRequest(envelope.payload()?),
            "sync_update" => ClientMessage::SyncUpdate(envelope.payload()?),
            "conflict_resolution" => ClientMessage::ConflictResolution(envelope.payload()?),
            "ping" => ClientMessage::Ping,
            "doc_update" => ClientMessage::DocUpdate(envelope.payload()?),
            "doc_state" => ClientMessage::DocState(envelope.payload()?),
            other => return Err(Error::UnknownMessageType(other.to_string())),
        })
    }

    /// Parses a text frame.
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_envelope(&Envelope::from_json(s)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SyncRequest(_) => "sync_request",
            ClientMessage::SyncUpdate(_) => "sync_update",
            ClientMessage::ConflictResolution(_) => "conflict_resolution",
            ClientMessage::Ping => "ping",
            ClientMessage::DocUpdate(_) => "doc_update",
            ClientMessage::DocState(_) => "doc_state",
        }
    }

    /// Wraps the message in an envelope stamped `timestamp`.
    pub fn to_envelope(&self, timestamp: i64) -> Result<Envelope> {
        let data = match self {
            ClientMessage::SyncRequest(p) => serde_json::to_value(p)?,
            ClientMessage::SyncUpdate(p) => serde_json::to_value(p)?,
            ClientMessage::ConflictResolution(p) => serde_json::to_value(p)?,
            ClientMessage::Ping => Value::Object(Default::default()),
            ClientMessage::DocUpdate(p) => serde_json::to_value(p)?,
            ClientMessage::DocState(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope { kind: self.kind().to_string(), timestamp, data })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChanges {
    pub changes: Vec<SyncChange>,
    pub sync_version: u64,
    /// Cursor for the client's next `sync_request`.
    pub server_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResults {
    pub results: Vec<ChangeResult>,
    pub sync_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocUpdateAck {
    pub entity_id: String,
    /// Full merged state, base64.
    pub update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SyncChanges(SyncChanges),
    SyncUpdateResponse(SyncResults),
    ConflictResolutionResponse(SyncResults),
    Pong(Pong),
    DocUpdateAck(DocUpdateAck),
    /// Delta merged by another session.
    DocUpdate(DocPayload),
    DocState(DocPayload),
    Error(ErrorPayload),
}

impl ServerMessage {
    /// Error reply carrying the error's stable code.
    pub fn error(err: &Error) -> Self {
        ServerMessage::Error(ErrorPayload { message: err.to_string(), code: err.code().to_string() })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::SyncChanges(_) => "sync_changes",
            ServerMessage::SyncUpdateResponse(_) => "sync_update_response",
            ServerMessage::ConflictResolutionResponse(_) => "conflict_resolution_response",
            ServerMessage::Pong(_) => "pong",
            ServerMessage::DocUpdateAck(_) => "doc_update_ack",
            ServerMessage::DocUpdate(_) => "doc_update",
            ServerMessage::DocState(_) => "doc_state",
            ServerMessage::Error(_) => "error",
        }
    }

    pub fn to_envelope(&self, timestamp: i64) -> Result<Envelope> {
        let data = match self {
            ServerMessage::SyncChanges(p) => serde_json::to_value(p)?,
            ServerMessage::SyncUpdateResponse(p) | ServerMessage::ConflictResolutionResponse(p) => {
                serde_json::to_value(p)?
            }
            ServerMessage::Pong(p) => serde_json::to_value(p)?,
            ServerMessage::DocUpdateAck(p) => serde_json::to_value(p)?,
            ServerMessage::DocUpdate(p) | ServerMessage::DocState(p) => serde_json::to_value(p)?,
            ServerMessage::Error(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope { kind: self.kind().to_string(), timestamp, data })
    }

    /// Serializes the message to a text frame.
    pub fn to_json(&self, timestamp: i64) -> Result<String> {
        self.to_envelope(timestamp)?.to_json()
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(match envelope.kind.as_str() {
            "sync_changes" => ServerMessage::SyncChanges(envelope.payload()?),
            "sync_update_response" => ServerMessage::SyncUpdateResponse(envelope.payload()?),
            "conflict_resolution_response" => ServerMessage::ConflictResolutionResponse(envelope.payload()?),
            "pong" => ServerMessage::Pong(envelope.payload()?),
            "doc_update_ack" => ServerMessage::DocUpdateAck(envelope.payload()?),
            "doc_update" => ServerMessage::DocUpdate(envelope.payload()?),
            "doc_state" => ServerMessage::DocState(envelope.payload()?),
            "error" => ServerMessage::Error(envelope.payload()?),
            other => return Err(Error::UnknownMessageType(other.to_string())),
        })
    }

    /// Parses a text frame.
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_envelope(&Envelope::from_json(s)?)
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
