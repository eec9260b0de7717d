// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::Result;
use crate::session::{Publisher, Session, Subscription};
use serde_json::Value;
use tokio::sync::Mutex;

/// A named topic of a fixed message type.
///
/// The first [`publish`](Self::publish) advertises the topic; the
/// advertisement is held until [`unadvertise`](Self::unadvertise) or drop.
#[derive(Debug)]
pub struct Topic {
    session: Session,
    name: String,
    message_type: String,
    publisher: Mutex<Option<Publisher>>,
}

impl Topic {
    pub fn new(session: &Session, name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            session: session.clone(),
            name: name.into(),
            message_type: message_type.into(),
            publisher: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub async fn advertise(&self) -> Result<()> {
        let mut slot = self.publisher.lock().await;
        if slot.is_none() {
            let publisher = self
                .session
                .create_publisher(&self.name, &self.message_type)
                .await?;
            *slot = Some(publisher);
        }
        Ok(())
    }

    pub async fn publish(&self, message: &Value) -> Result<()> {
        let mut slot = self.publisher.lock().await;
        let publisher = match slot.take() {
            Some(publisher) => publisher,
            None => {
                self.session
                    .create_publisher(&self.name, &self.message_type)
                    .await?
            }
        };
        let result = publisher.publish(message);
        *slot = Some(publisher);
        result
    }

    pub async fn unadvertise(&self) -> Result<()> {
        match self.publisher.lock().await.take() {
            Some(publisher) => publisher.unadvertise(),
            None => Ok(()),
        }
    }

    /// Subscribe `handler`. Keep the returned handle alive to keep receiving.
    pub async fn subscribe<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.session.create_subscription(&self.name, handler).await
    }
}
