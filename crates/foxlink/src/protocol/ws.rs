// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket carrier (`foxglove.websocket.v1`).
//!
//! A background task owns the socket. It emits `Open` once the handshake
//! completes, turns frames into [`ServerEvent`]s, and ends with `Close`
//! (preceded by `Error` on failure). Outbound ops go through an unbounded
//! queue drained by a forward task.

use super::messages::{decode_server_binary, decode_server_text, encode_client_op, Frame};
use super::{ClientOp, CloseInfo, Connection, ProtocolError, ServerEvent, Transport};
use crate::config::SessionConfig;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

enum Outbound {
    Op(ClientOp),
    Close,
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: AtomicBool,
}

impl Transport for WsTransport {
    fn send(&self, op: ClientOp) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::TransportClosed);
        }
        self.outbound
            .send(Outbound::Op(op))
            .map_err(|_| ProtocolError::TransportClosed)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}

/// Open a WebSocket connection in the background.
///
/// Must be called from within a tokio runtime. Connection failures surface
/// as `Error` + `Close` events, not as an error here.
pub fn connect(config: &SessionConfig) -> Result<Connection, ProtocolError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ProtocolError::WebSocket(e.to_string()))?;
    let protocol = HeaderValue::from_str(&config.subprotocol)
        .map_err(|e| ProtocolError::WebSocket(e.to_string()))?;
    request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

    let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let transport = Arc::new(WsTransport {
        outbound: out_tx,
        closed: AtomicBool::new(false),
    });

    tokio::spawn(run(request, config.name.clone(), event_tx, out_rx));

    Ok(Connection {
        transport,
        events: event_rx,
    })
}

async fn run(
    request: Request,
    label: String,
    events: mpsc::Sender<ServerEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let uri = request.uri().to_string();
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!("[{}] Failed to connect to {}: {}", label, uri, e);
            let _ = events.send(ServerEvent::Error(e.to_string())).await;
            let _ = events
                .send(ServerEvent::Close(CloseInfo::abnormal(e.to_string())))
                .await;
            return;
        }
    };
    info!("[{}] Connected to {}", label, uri);

    if events.send(ServerEvent::Open).await.is_err() {
        return;
    }

    let (mut ws_tx, mut ws_rx) = stream.split();

    // Forward outbound ops to the socket
    let forward_label = label.clone();
    let ws_forward = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let op = match item {
                Outbound::Op(op) => op,
                Outbound::Close => {
                    debug!("[{}] Sending close frame", forward_label);
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            let message = match encode_client_op(&op) {
                Ok(Frame::Text(text)) => Message::Text(text),
                Ok(Frame::Binary(data)) => Message::Binary(data),
                Err(e) => {
                    error!("[{}] Failed to encode {:?}: {}", forward_label, op, e);
                    continue;
                }
            };
            if ws_tx.send(message).await.is_err() {
                debug!("[{}] WebSocket send failed, closing", forward_label);
                break;
            }
        }
    });

    let close = loop {
        let decoded = match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => decode_server_text(&text),
            Some(Ok(Message::Binary(data))) => decode_server_binary(&data),
            Some(Ok(Message::Close(frame))) => {
                let info = frame
                    .map(|f| CloseInfo {
                        code: f.code.into(),
                        reason: f.reason.into_owned(),
                    })
                    .unwrap_or_else(|| CloseInfo {
                        code: 1005,
                        reason: String::new(),
                    });
                info!("[{}] Server closed connection ({})", label, info.code);
                break info;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                error!("[{}] WebSocket error: {}", label, e);
                let _ = events.send(ServerEvent::Error(e.to_string())).await;
                break CloseInfo::abnormal(e.to_string());
            }
            None => break CloseInfo::abnormal("connection dropped"),
        };

        match decoded {
            Ok(Some(event)) => {
                if events.send(event).await.is_err() {
                    // Session is gone
                    ws_forward.abort();
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("[{}] Dropping malformed frame: {}", label, e),
        }
    };

    ws_forward.abort();
    let _ = events.send(ServerEvent::Close(close)).await;
    info!("[{}] Connection ended", label);
}
