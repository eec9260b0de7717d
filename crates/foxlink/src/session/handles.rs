// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::{HandlerId, Session};
use crate::error::Result;
use serde_json::Value;
use tracing::debug;

/// One subscriber on a topic. Dropping it detaches the handler.
#[derive(Debug)]
pub struct Subscription {
    session: Session,
    topic: String,
    handler_id: HandlerId,
    active: bool,
}

impl Subscription {
    pub(super) fn new(session: Session, topic: &str, handler_id: HandlerId) -> Self {
        Self {
            session,
            topic: topic.to_string(),
            handler_id,
            active: true,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Detach the handler. The last subscriber on the topic unsubscribes.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.active, false) {
            return Ok(());
        }
        self.session.detach_subscriber(&self.topic, self.handler_id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!("Dropping subscription on '{}': {}", self.topic, e);
        }
    }
}

/// Advertisement of a topic by this client. Dropping it releases the
/// advertisement.
#[derive(Debug)]
pub struct Publisher {
    session: Session,
    topic: String,
    message_type: String,
    publisher_id: u32,
    active: bool,
}

impl Publisher {
    pub(super) fn new(session: Session, topic: &str, message_type: &str, publisher_id: u32) -> Self {
        Self {
            session,
            topic: topic.to_string(),
            message_type: message_type.to_string(),
            publisher_id,
            active: true,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Protocol id of the shared advertisement.
    pub fn publisher_id(&self) -> u32 {
        self.publisher_id
    }

    /// Encode `message` with the server's schema for the topic and send it.
    pub fn publish(&self, message: &Value) -> Result<()> {
        self.session.publish(&self.topic, message)
    }

    pub fn unadvertise(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.active, false) {
            return Ok(());
        }
        self.session.detach_publisher(&self.topic)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            debug!("Dropping publisher on '{}': {}", self.topic, e);
        }
    }
}
