// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::Result;
use crate::session::Session;
use serde_json::Value;

/// A named remote service.
#[derive(Debug, Clone)]
pub struct Service {
    session: Session,
    name: String,
    service_type: String,
}

impl Service {
    pub fn new(session: &Session, name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            session: session.clone(),
            name: name.into(),
            service_type: service_type.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type. Requests are encoded with the server's schema.
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub async fn call(&self, request: &Value) -> Result<Value> {
        self.session.send_service_request(&self.name, request).await
    }
}
