// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session configuration.
//!
//! Supports both programmatic and file-based configuration.

use crate::protocol::SUBPROTOCOL;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server endpoint (`ws://` or `wss://`).
    pub url: String,

    /// WebSocket subprotocol.
    #[serde(default = "default_subprotocol")]
    pub subprotocol: String,

    /// Capacity of the inbound event queue.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Label used in log lines.
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_subprotocol() -> String {
    SUBPROTOCOL.to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_name() -> String {
    "foxlink".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765".to_string(),
            subprotocol: default_subprotocol(),
            event_capacity: default_event_capacity(),
            name: default_name(),
        }
    }
}

impl SessionConfig {
    /// Configuration for `url` with defaults elsewhere.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "url '{}' must start with ws:// or wss://",
                self.url
            )));
        }
        if self.subprotocol.trim().is_empty() {
            return Err(ConfigError::Invalid("subprotocol is empty".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
