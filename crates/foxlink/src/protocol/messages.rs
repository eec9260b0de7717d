// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Foxglove WebSocket v1 frame encoding.
//!
//! Text frames carry JSON tagged by `op`. Binary frames start with a one-byte
//! opcode followed by little endian fields.

use super::{
    Channel, ClientChannel, ClientOp, Parameter, ProtocolError, RemoteService, ServerEvent,
    ServerInfo, StatusLevel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Server binary opcodes.
const OP_MESSAGE_DATA: u8 = 0x01;
const OP_TIME: u8 = 0x02;
const OP_SERVICE_CALL_RESPONSE: u8 = 0x03;

/// Client binary opcodes.
const OP_CLIENT_MESSAGE_DATA: u8 = 0x01;
const OP_SERVICE_CALL_REQUEST: u8 = 0x02;

/// Encoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ServerJson {
    ServerInfo(ServerInfo),
    Status {
        level: u8,
        message: String,
    },
    Advertise {
        channels: Vec<Channel>,
    },
    Unadvertise {
        #[serde(rename = "channelIds")]
        channel_ids: Vec<u32>,
    },
    AdvertiseServices {
        services: Vec<WireService>,
    },
    UnadvertiseServices {
        #[serde(rename = "serviceIds")]
        service_ids: Vec<u32>,
    },
    ParameterValues {
        #[serde(default)]
        id: Option<String>,
        parameters: Vec<Parameter>,
    },
    ServiceCallFailure {
        #[serde(rename = "serviceId")]
        service_id: u32,
        #[serde(rename = "callId")]
        call_id: u32,
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Service as advertised: flat (`requestSchema`) or nested (`request{}`).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireService {
    id: u32,
    name: String,
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    request_schema: Option<String>,
    #[serde(default)]
    response_schema: Option<String>,
    #[serde(default)]
    request: Option<WireServiceSchema>,
    #[serde(default)]
    response: Option<WireServiceSchema>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServiceSchema {
    #[serde(default)]
    schema_name: Option<String>,
    #[serde(default)]
    schema_encoding: Option<String>,
    #[serde(default)]
    schema: String,
}

impl From<WireService> for RemoteService {
    fn from(wire: WireService) -> Self {
        let mut service = RemoteService::new(
            wire.id,
            wire.name,
            wire.service_type,
            wire.request_schema.unwrap_or_default(),
            wire.response_schema.unwrap_or_default(),
        );
        if let Some(request) = wire.request {
            if let Some(name) = request.schema_name {
                service.request_type = name;
            }
            service.request_schema = request.schema;
            service.request_schema_encoding = request.schema_encoding;
        }
        if let Some(response) = wire.response {
            if let Some(name) = response.schema_name {
                service.response_type = name;
            }
            service.response_schema = response.schema;
            service.response_schema_encoding = response.schema_encoding;
        }
        service
    }
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum ClientJson<'a> {
    Subscribe {
        subscriptions: [SubscriptionJson; 1],
    },
    Unsubscribe {
        #[serde(rename = "subscriptionIds")]
        subscription_ids: [u32; 1],
    },
    Advertise {
        channels: [&'a ClientChannel; 1],
    },
    Unadvertise {
        #[serde(rename = "channelIds")]
        channel_ids: [u32; 1],
    },
    GetParameters {
        #[serde(rename = "parameterNames")]
        parameter_names: &'a [String],
        id: &'a str,
    },
    SetParameters {
        parameters: &'a [Parameter],
        id: &'a str,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionJson {
    id: u32,
    channel_id: u32,
}

/// Decode a text frame. Unknown ops yield `None`.
pub fn decode_server_text(text: &str) -> Result<Option<ServerEvent>, ProtocolError> {
    let event = match serde_json::from_str::<ServerJson>(text)? {
        ServerJson::ServerInfo(info) => ServerEvent::ServerInfo(info),
        ServerJson::Status { level, message } => ServerEvent::Status {
            level: StatusLevel::from_wire(level),
            message,
        },
        ServerJson::Advertise { channels } => ServerEvent::Advertise(channels),
        ServerJson::Unadvertise { channel_ids } => ServerEvent::Unadvertise(channel_ids),
        ServerJson::AdvertiseServices { services } => {
            ServerEvent::AdvertiseServices(services.into_iter().map(Into::into).collect())
        }
        ServerJson::UnadvertiseServices { service_ids } => {
            ServerEvent::UnadvertiseServices(service_ids)
        }
        ServerJson::ParameterValues { id, parameters } => {
            ServerEvent::ParameterValues { id, parameters }
        }
        ServerJson::ServiceCallFailure {
            service_id,
            call_id,
            message,
        } => ServerEvent::ServiceCallFailure {
            service_id,
            call_id,
            message,
        },
        ServerJson::Unknown => {
            debug!("Ignoring unsupported server op: {}", text);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn u32_at(body: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&body[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn u64_at(body: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&body[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Decode a binary frame. Time frames yield `None`.
pub fn decode_server_binary(data: &[u8]) -> Result<Option<ServerEvent>, ProtocolError> {
    let (&opcode, body) = data
        .split_first()
        .ok_or(ProtocolError::Truncated { opcode: 0, len: 0 })?;
    let truncated = || ProtocolError::Truncated {
        opcode,
        len: data.len(),
    };

    match opcode {
        OP_MESSAGE_DATA => {
            if body.len() < 12 {
                return Err(truncated());
            }
            Ok(Some(ServerEvent::Message {
                subscription_id: u32_at(body, 0),
                timestamp: u64_at(body, 4),
                data: body[12..].to_vec(),
            }))
        }
        OP_TIME => Ok(None),
        OP_SERVICE_CALL_RESPONSE => {
            if body.len() < 12 {
                return Err(truncated());
            }
            let encoding_len = u32_at(body, 8) as usize;
            let payload_start = 12usize
                .checked_add(encoding_len)
                .filter(|end| *end <= body.len())
                .ok_or_else(truncated)?;
            Ok(Some(ServerEvent::ServiceCallResponse {
                service_id: u32_at(body, 0),
                call_id: u32_at(body, 4),
                encoding: String::from_utf8_lossy(&body[12..payload_start]).into_owned(),
                data: body[payload_start..].to_vec(),
            }))
        }
        other => Err(ProtocolError::UnknownOpcode(other)),
    }
}

/// Encode an outbound operation as a text or binary frame.
pub fn encode_client_op(op: &ClientOp) -> Result<Frame, ProtocolError> {
    let json = match op {
        ClientOp::Subscribe {
            subscription_id,
            channel_id,
        } => ClientJson::Subscribe {
            subscriptions: [SubscriptionJson {
                id: *subscription_id,
                channel_id: *channel_id,
            }],
        },
        ClientOp::Unsubscribe { subscription_id } => ClientJson::Unsubscribe {
            subscription_ids: [*subscription_id],
        },
        ClientOp::Advertise(channel) => ClientJson::Advertise {
            channels: [channel],
        },
        ClientOp::Unadvertise { publisher_id } => ClientJson::Unadvertise {
            channel_ids: [*publisher_id],
        },
        ClientOp::GetParameters { names, id } => ClientJson::GetParameters {
            parameter_names: names,
            id,
        },
        ClientOp::SetParameters { parameters, id } => ClientJson::SetParameters { parameters, id },
        ClientOp::MessageData { publisher_id, data } => {
            let mut frame = Vec::with_capacity(5 + data.len());
            frame.push(OP_CLIENT_MESSAGE_DATA);
            frame.extend_from_slice(&publisher_id.to_le_bytes());
            frame.extend_from_slice(data);
            return Ok(Frame::Binary(frame));
        }
        ClientOp::ServiceCallRequest {
            service_id,
            call_id,
            encoding,
            data,
        } => {
            let encoding_len = u32::try_from(encoding.len())
                .map_err(|_| ProtocolError::WebSocket("encoding name too long".into()))?;
            let mut frame = Vec::with_capacity(13 + encoding.len() + data.len());
            frame.push(OP_SERVICE_CALL_REQUEST);
            frame.extend_from_slice(&service_id.to_le_bytes());
            frame.extend_from_slice(&call_id.to_le_bytes());
            frame.extend_from_slice(&encoding_len.to_le_bytes());
            frame.extend_from_slice(encoding.as_bytes());
            frame.extend_from_slice(data);
            return Ok(Frame::Binary(frame));
        }
    };
    Ok(Frame::Text(serde_json::to_string(&json)?))
}
