// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection protocol state machine.
//!
//! `Connecting -> Connected -> {Syncing <-> Idle} -> Disconnected`. The
//! socket loop in [`crate::server`] feeds text frames to
//! [`Session::handle_text`] and forwards whatever it returns.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use fieldsync_core::protocol::Pong;
use fieldsync_core::{ClientMessage, DeviceType, Error, Result, ServerMessage};

use crate::service::{Broadcast, SessionTicket, SyncService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Syncing,
    Idle,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Syncing => "syncing",
            SessionState::Idle => "idle",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Handshake query parameters: `deviceId`, `userId`, `deviceType`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeParams {
    pub device_id: Option<String>,
    pub user_id: Option<String>,
    pub device_type: DeviceType,
}

impl HandshakeParams {
    /// Parses a raw query string. Unknown keys are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = HandshakeParams::default();
        let mut device_type = None;
        for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = match urlencoding::decode(&value.replace('+', " ")) {
                Ok(value) => value.into_owned(),
                Err(_) => continue,
            };
            match key {
                "deviceId" => params.device_id = Some(value),
                "userId" => params.user_id = Some(value),
                "deviceType" => device_type = Some(value),
                _ => {}
            }
        }
        params.device_type = DeviceType::from_param(device_type.as_deref());
        params
    }
}

pub struct Session {
    service: Arc<SyncService>,
    ticket: SessionTicket,
    device_type: DeviceType,
    state: SessionState,
}

impl Session {
    /// Registers the connection; fails with [`Error::Handshake`] without a user.
    pub async fn open(service: Arc<SyncService>, params: &HandshakeParams) -> Result<Self> {
        debug!(state = %SessionState::Connecting, "session handshake");
        let ticket = service
            .open_session(params.device_id.as_deref(), params.user_id.as_deref(), params.device_type)
            .await?;
        info!(
            connection = %ticket.connection_id,
            user = %ticket.user_id,
            device = %ticket.device_id,
            device_type = %params.device_type,
            "session opened"
        );
        Ok(Session { service, ticket, device_type: params.device_type, state: SessionState::Connected })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ticket(&self) -> &SessionTicket {
        &self.ticket
    }

    /// True when a broadcast should be forwarded to this session.
    pub fn wants(&self, broadcast: &Broadcast) -> bool {
        broadcast.origin != self.ticket.socket
    }

    /// Records activity. A socket whose session was swept away while it sat
    /// idle registers again.
    pub async fn touch(&mut self) {
        if self.service.touch(&self.ticket).await || self.state == SessionState::Disconnected {
            return;
        }
        match self.service.resume_session(&self.ticket, self.device_type).await {
            Ok(ticket) => {
                info!(
                    evicted = %self.ticket.connection_id,
                    connection = %ticket.connection_id,
                    device = %ticket.device_id,
                    "idle socket re-registered after eviction"
                );
                self.ticket = ticket;
            }
            Err(e) => warn!(connection = %self.ticket.connection_id, error = %e, "failed to re-register session"),
        }
    }

    /// Handles one text frame; returns the reply, if any.
    ///
    /// Unknown types are ignored. Malformed frames and failed operations
    /// produce an `error` reply; the connection stays open.
    pub async fn handle_text(&mut self, text: &str) -> Option<ServerMessage> {
        self.touch().await;
        let message = match ClientMessage::from_json(text) {
            Ok(message) => message,
            Err(Error::UnknownMessageType(kind)) => {
                warn!(connection = %self.ticket.connection_id, %kind, "ignoring unknown message type");
                return None;
            }
            Err(e) => {
                warn!(connection = %self.ticket.connection_id, error = %e, "malformed message");
                return Some(ServerMessage::error(&e));
            }
        };

        let kind = message.kind();
        debug!(connection = %self.ticket.connection_id, kind, "received");
        match self.dispatch(message).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(connection = %self.ticket.connection_id, kind, error = %e, "message failed");
                Some(ServerMessage::error(&e))
            }
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<ServerMessage> {
        let service = Arc::clone(&self.service);
        match message {
            ClientMessage::Ping => Ok(ServerMessage::Pong(Pong { timestamp: service.now_ms() })),
            ClientMessage::SyncRequest(request) => {
                self.syncing();
                let reply = service.sync_request(&self.ticket, request).await;
                self.idle();
                Ok(ServerMessage::SyncChanges(reply?))
            }
            ClientMessage::SyncUpdate(update) => {
                self.syncing();
                let reply = service.sync_update(&self.ticket, update).await;
                self.idle();
                Ok(ServerMessage::SyncUpdateResponse(reply?))
            }
            ClientMessage::ConflictResolution(request) => {
                self.syncing();
                let reply = service.conflict_resolution(&self.ticket, request).await;
                self.idle();
                Ok(ServerMessage::ConflictResolutionResponse(reply?))
            }
            ClientMessage::DocUpdate(payload) => {
                Ok(ServerMessage::DocUpdateAck(service.doc_update(self.ticket.socket, payload).await?))
            }
            ClientMessage::DocState(doc) => Ok(ServerMessage::DocState(service.doc_state(doc).await?)),
        }
    }

    fn syncing(&mut self) {
        self.state = SessionState::Syncing;
    }

    fn idle(&mut self) {
        self.state = SessionState::Idle;
    }

    /// Detaches the socket from its registry entry.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.service.close_session(&self.ticket).await;
        self.state = SessionState::Disconnected;
        info!(
            connection = %self.ticket.connection_id,
            user = %self.ticket.user_id,
            device = %self.ticket.device_id,
            "session closed"
        );
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
