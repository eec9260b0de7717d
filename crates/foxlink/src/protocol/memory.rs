// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process carrier.
//!
//! The client half records every [`ClientOp`]; the [`MemoryServer`] half
//! injects [`ServerEvent`]s. Useful for tests and for bridging a session to
//! something that is not a WebSocket.

use super::{ClientOp, Connection, ProtocolError, ServerEvent, ServerInfo, Transport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct Shared {
    ops: Mutex<Vec<ClientOp>>,
    closed: AtomicBool,
}

struct MemoryTransport {
    shared: Arc<Shared>,
}

impl Transport for MemoryTransport {
    fn send(&self, op: ClientOp) -> Result<(), ProtocolError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::TransportClosed);
        }
        self.shared.ops.lock().push(op);
        Ok(())
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// Server half of an in-memory connection.
pub struct MemoryServer {
    events: mpsc::Sender<ServerEvent>,
    shared: Arc<Shared>,
}

/// Create a connected pair. `capacity` bounds the inbound event queue.
pub fn pair(capacity: usize) -> (Connection, MemoryServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared::default());
    let connection = Connection {
        transport: Arc::new(MemoryTransport {
            shared: Arc::clone(&shared),
        }),
        events: rx,
    };
    (connection, MemoryServer { events: tx, shared })
}

impl MemoryServer {
    /// Deliver one event to the client.
    pub async fn send(&self, event: ServerEvent) -> Result<(), ProtocolError> {
        self.events
            .send(event)
            .await
            .map_err(|_| ProtocolError::TransportClosed)
    }

    /// Deliver `Open` and a `ServerInfo` listing `encodings`.
    pub async fn handshake(&self, encodings: &[&str]) -> Result<(), ProtocolError> {
        self.send(ServerEvent::Open).await?;
        self.send(ServerEvent::ServerInfo(ServerInfo {
            name: "memory".into(),
            supported_encodings: encodings.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }))
        .await
    }

    /// Operations recorded so far.
    pub fn ops(&self) -> Vec<ClientOp> {
        self.shared.ops.lock().clone()
    }

    /// Drain recorded operations.
    pub fn take_ops(&self) -> Vec<ClientOp> {
        std::mem::take(&mut *self.shared.ops.lock())
    }

    /// Whether the client closed its transport.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
