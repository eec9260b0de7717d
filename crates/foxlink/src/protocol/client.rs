// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::{ClientChannel, ClientOp, Parameter, ProtocolError, Transport};
use std::sync::Arc;

/// Issues outbound operations and owns the client-chosen id spaces.
///
/// Subscription and publisher ids are picked by the client in the Foxglove
/// protocol. Counters live here, one pair per session.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    next_subscription_id: u32,
    next_publisher_id: u32,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_subscription_id: 1,
            next_publisher_id: 1,
        }
    }

    /// Advertise a client channel, returning its publisher id.
    pub fn advertise(
        &mut self,
        topic: &str,
        encoding: &str,
        schema_name: &str,
    ) -> Result<u32, ProtocolError> {
        let id = self.next_publisher_id;
        self.transport.send(ClientOp::Advertise(ClientChannel {
            id,
            topic: topic.to_string(),
            encoding: encoding.to_string(),
            schema_name: schema_name.to_string(),
        }))?;
        self.next_publisher_id = id.wrapping_add(1).max(1);
        Ok(id)
    }

    pub fn unadvertise(&self, publisher_id: u32) -> Result<(), ProtocolError> {
        self.transport.send(ClientOp::Unadvertise { publisher_id })
    }

    /// Subscribe to a server channel, returning the subscription id.
    pub fn subscribe(&mut self, channel_id: u32) -> Result<u32, ProtocolError> {
        let id = self.next_subscription_id;
        self.transport.send(ClientOp::Subscribe {
            subscription_id: id,
            channel_id,
        })?;
        self.next_subscription_id = id.wrapping_add(1).max(1);
        Ok(id)
    }

    pub fn unsubscribe(&self, subscription_id: u32) -> Result<(), ProtocolError> {
        self.transport.send(ClientOp::Unsubscribe { subscription_id })
    }

    pub fn send_message(&self, publisher_id: u32, data: Vec<u8>) -> Result<(), ProtocolError> {
        self.transport
            .send(ClientOp::MessageData { publisher_id, data })
    }

    pub fn send_service_call_request(
        &self,
        service_id: u32,
        call_id: u32,
        encoding: &str,
        data: Vec<u8>,
    ) -> Result<(), ProtocolError> {
        self.transport.send(ClientOp::ServiceCallRequest {
            service_id,
            call_id,
            encoding: encoding.to_string(),
            data,
        })
    }

    pub fn get_parameters(&self, names: Vec<String>, id: String) -> Result<(), ProtocolError> {
        self.transport.send(ClientOp::GetParameters { names, id })
    }

    pub fn set_parameters(
        &self,
        parameters: Vec<Parameter>,
        id: String,
    ) -> Result<(), ProtocolError> {
        self.transport
            .send(ClientOp::SetParameters { parameters, id })
    }

    pub fn close(&self) {
        self.transport.close();
    }
}
