// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::Result;
use crate::protocol::Parameter;
use crate::session::Session;
use serde_json::Value;

/// A named server parameter.
///
/// `node:param` names are accepted; the first `:` becomes `.`.
#[derive(Debug, Clone)]
pub struct Param {
    session: Session,
    name: String,
}

impl Param {
    pub fn new(session: &Session, name: &str) -> Self {
        Self {
            session: session.clone(),
            name: name.replacen(':', ".", 1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value, `null` when unset.
    pub async fn get(&self) -> Result<Value> {
        self.session.get_parameter(&self.name).await
    }

    pub async fn set(&self, value: Value) -> Result<Parameter> {
        self.session.set_parameter(&self.name, value).await
    }
}
