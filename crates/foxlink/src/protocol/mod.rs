// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Foxglove WebSocket protocol client.
//!
//! The session never sees frames. It consumes [`ServerEvent`]s from a
//! [`Connection`] and issues [`ClientOp`]s through a [`ProtocolClient`].
//! Two carriers are provided:
//! - [`ws`]: `foxglove.websocket.v1` over tokio-tungstenite
//! - [`memory`]: in-process pair for tests and custom bridges

mod client;
pub mod memory;
mod messages;
pub mod ws;

pub use client::ProtocolClient;
pub use messages::{decode_server_binary, decode_server_text, encode_client_op, Frame};

use crate::codec::SchemaSource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Subprotocol negotiated with the server.
pub const SUBPROTOCOL: &str = "foxglove.websocket.v1";

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("truncated binary frame (opcode 0x{opcode:02x}, {len} bytes)")]
    Truncated { opcode: u8, len: usize },

    #[error("unknown binary opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    #[error("transport closed")]
    TransportClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Server-advertised topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: u32,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

impl Channel {
    pub fn schema_source(&self) -> SchemaSource<'_> {
        SchemaSource {
            name: &self.schema_name,
            schema_encoding: self.schema_encoding.as_deref(),
            schema: &self.schema,
        }
    }
}

/// Server-advertised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub id: u32,
    pub name: String,
    pub service_type: String,
    pub request_type: String,
    pub request_schema: String,
    pub request_schema_encoding: Option<String>,
    pub response_type: String,
    pub response_schema: String,
    pub response_schema_encoding: Option<String>,
}

impl RemoteService {
    /// Service with `.msg` request/response schemas named after its type.
    pub fn new(
        id: u32,
        name: impl Into<String>,
        service_type: impl Into<String>,
        request_schema: impl Into<String>,
        response_schema: impl Into<String>,
    ) -> Self {
        let service_type = service_type.into();
        Self {
            id,
            name: name.into(),
            request_type: format!("{}_Request", service_type),
            response_type: format!("{}_Response", service_type),
            service_type,
            request_schema: request_schema.into(),
            request_schema_encoding: None,
            response_schema: response_schema.into(),
            response_schema_encoding: None,
        }
    }

    pub fn request_source(&self) -> SchemaSource<'_> {
        SchemaSource {
            name: &self.request_type,
            schema_encoding: self.request_schema_encoding.as_deref(),
            schema: &self.request_schema,
        }
    }

    pub fn response_source(&self) -> SchemaSource<'_> {
        SchemaSource {
            name: &self.response_type,
            schema_encoding: self.response_schema_encoding.as_deref(),
            schema: &self.response_schema,
        }
    }
}

/// One-time server capability announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub supported_encodings: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Named parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            value,
            kind: None,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    /// Normal closure requested by this side.
    pub fn local() -> Self {
        Self {
            code: 1000,
            reason: "closed by client".into(),
        }
    }

    /// Connection lost without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: 1006,
            reason: reason.into(),
        }
    }
}

/// Severity of a server `status` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    fn from_wire(level: u8) -> Self {
        match level {
            0 => Self::Info,
            1 => Self::Warning,
            _ => Self::Error,
        }
    }
}

/// Inbound event produced by a carrier.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Open,
    ServerInfo(ServerInfo),
    Status {
        level: StatusLevel,
        message: String,
    },
    Advertise(Vec<Channel>),
    Unadvertise(Vec<u32>),
    AdvertiseServices(Vec<RemoteService>),
    UnadvertiseServices(Vec<u32>),
    Message {
        subscription_id: u32,
        timestamp: u64,
        data: Vec<u8>,
    },
    ServiceCallResponse {
        service_id: u32,
        call_id: u32,
        encoding: String,
        data: Vec<u8>,
    },
    ServiceCallFailure {
        service_id: u32,
        call_id: u32,
        message: String,
    },
    ParameterValues {
        id: Option<String>,
        parameters: Vec<Parameter>,
    },
    Close(CloseInfo),
    Error(String),
}

/// Client-advertised channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientChannel {
    pub id: u32,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
}

/// Outbound operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOp {
    Advertise(ClientChannel),
    Unadvertise {
        publisher_id: u32,
    },
    Subscribe {
        subscription_id: u32,
        channel_id: u32,
    },
    Unsubscribe {
        subscription_id: u32,
    },
    MessageData {
        publisher_id: u32,
        data: Vec<u8>,
    },
    ServiceCallRequest {
        service_id: u32,
        call_id: u32,
        encoding: String,
        data: Vec<u8>,
    },
    GetParameters {
        names: Vec<String>,
        id: String,
    },
    SetParameters {
        parameters: Vec<Parameter>,
        id: String,
    },
}

/// Outbound half of a carrier. Sends never block; carriers queue.
pub trait Transport: Send + Sync {
    fn send(&self, op: ClientOp) -> Result<(), ProtocolError>;

    /// Start closing. Further sends fail with `TransportClosed`.
    fn close(&self);
}

/// An opened carrier: outbound transport plus inbound event stream.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::Receiver<ServerEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
