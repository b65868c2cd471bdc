// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Accepts connections on `/sync`, runs the handshake, then pumps frames
//! between the socket, its [`Session`] and the broadcast fanout.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::service::SyncService;
use crate::session::{HandshakeParams, Session};

/// Path of the WebSocket endpoint.
pub const SYNC_PATH: &str = "/sync";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, service: Arc<SyncService>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "websocket listening");
    serve(listener, service).await
}

/// Accepts connections until the service shuts down.
pub async fn serve(listener: TcpListener, service: Arc<SyncService>) -> std::io::Result<()> {
    let cancel_token = service.cancel_token();
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = cancel_token.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let service = Arc::clone(&service);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, service).await {
                error!(%peer_addr, error = %e, "connection error");
            }
        });
    }
    debug!("websocket listener stopped");
    Ok(())
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: Arc<SyncService>,
) -> Result<(), BoxError> {
    let mut query = None;
    let mut ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        if req.uri().path() != SYNC_PATH {
            let mut rejection = ErrorResponse::new(Some(format!("no websocket endpoint at {}", req.uri().path())));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        query = req.uri().query().map(str::to_string);
        Ok(resp)
    })
    .await?;

    let params = HandshakeParams::from_query(query.as_deref());
    let mut session = match Session::open(Arc::clone(&service), &params).await {
        Ok(session) => session,
        Err(e) => {
            warn!(%peer_addr, error = %e, "rejecting connection");
            let frame = CloseFrame { code: CloseCode::Policy, reason: e.to_string().into() };
            ws_stream.close(Some(frame)).await?;
            return Ok(());
        }
    };

    let result = pump(&mut session, ws_stream, &service).await;
    session.close().await;
    result
}

/// Moves frames until the client leaves or the service shuts down.
async fn pump(
    session: &mut Session,
    ws_stream: WebSocketStream<TcpStream>,
    service: &SyncService,
) -> Result<(), BoxError> {
    let connection = session.ticket().connection_id;
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut broadcast_rx = service.subscribe();
    let cancel_token = service.cancel_token();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                let frame = CloseFrame { code: CloseCode::Away, reason: "server shutting down".into() };
                ws_sink.send(Message::Close(Some(frame))).await?;
                break;
            }

            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = session.handle_text(&text).await {
                            ws_sink.send(Message::text(reply.to_json(service.now_ms())?)).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(%connection, "client sent close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.touch().await;
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {
                        session.touch().await;
                    }
                    Some(Err(e)) => {
                        warn!(%connection, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }

            broadcast = broadcast_rx.recv() => {
                match broadcast {
                    Ok(broadcast) if session.wants(&broadcast) => {
                        let json = broadcast.message.to_json(service.now_ms())?;
                        if let Err(e) = ws_sink.send(Message::text(json)).await {
                            warn!(%connection, error = %e, "failed to forward broadcast");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(%connection, skipped = n, "session lagged behind broadcasts");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    debug!(%connection, state = %session.state(), "socket loop ended");
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
