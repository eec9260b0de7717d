// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for session integration tests.

#![allow(dead_code)]

use foxlink::codec::{CodecFactory, Encoding, RosCodecFactory, SchemaSource};
use foxlink::protocol::memory::{self, MemoryServer};
use foxlink::protocol::{Channel, ClientOp};
use foxlink::Session;
use serde_json::Value;
use std::time::Duration;

pub const STRING_TYPE: &str = "std_msgs/msg/String";
pub const STRING_SCHEMA: &str = "string data\n";

/// Session over an in-memory pair, handshake done.
pub async fn ready_session(encodings: &[&str]) -> (Session, MemoryServer) {
    let (connection, server) = memory::pair(64);
    let session = Session::builder().open(connection);
    server.handshake(encodings).await.expect("handshake");
    session.ready().await.expect("session ready");
    (session, server)
}

pub fn channel(id: u32, topic: &str, schema_name: &str, schema: &str) -> Channel {
    Channel {
        id,
        topic: topic.into(),
        encoding: "cdr".into(),
        schema_name: schema_name.into(),
        schema: schema.into(),
        schema_encoding: Some("ros2msg".into()),
    }
}

pub fn string_channel(id: u32, topic: &str) -> Channel {
    channel(id, topic, STRING_TYPE, STRING_SCHEMA)
}

pub fn encode(encoding: Encoding, name: &str, schema: &str, message: &Value) -> Vec<u8> {
    RosCodecFactory
        .writer(
            SchemaSource {
                name,
                schema_encoding: None,
                schema,
            },
            encoding,
        )
        .expect("writer")
        .write_message(message)
        .expect("encode")
}

pub fn decode(encoding: Encoding, name: &str, schema: &str, data: &[u8]) -> Value {
    RosCodecFactory
        .reader(
            SchemaSource {
                name,
                schema_encoding: None,
                schema,
            },
            encoding,
        )
        .expect("reader")
        .read_message(data)
        .expect("decode")
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// (subscription id, channel id) of every recorded subscribe.
pub fn subscribes(ops: &[ClientOp]) -> Vec<(u32, u32)> {
    ops.iter()
        .filter_map(|op| match op {
            ClientOp::Subscribe {
                subscription_id,
                channel_id,
            } => Some((*subscription_id, *channel_id)),
            _ => None,
        })
        .collect()
}

pub fn unsubscribes(ops: &[ClientOp]) -> Vec<u32> {
    ops.iter()
        .filter_map(|op| match op {
            ClientOp::Unsubscribe { subscription_id } => Some(*subscription_id),
            _ => None,
        })
        .collect()
}

pub fn advertises(ops: &[ClientOp]) -> Vec<u32> {
    ops.iter()
        .filter_map(|op| match op {
            ClientOp::Advertise(channel) => Some(channel.id),
            _ => None,
        })
        .collect()
}

pub fn unadvertises(ops: &[ClientOp]) -> Vec<u32> {
    ops.iter()
        .filter_map(|op| match op {
            ClientOp::Unadvertise { publisher_id } => Some(*publisher_id),
            _ => None,
        })
        .collect()
}

/// (service id, call id, data) of every recorded service call.
pub fn service_calls(ops: &[ClientOp]) -> Vec<(u32, u32, Vec<u8>)> {
    ops.iter()
        .filter_map(|op| match op {
            ClientOp::ServiceCallRequest {
                service_id,
                call_id,
                data,
                ..
            } => Some((*service_id, *call_id, data.clone())),
            _ => None,
        })
        .collect()
}
