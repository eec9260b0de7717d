// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::protocol::ProtocolError;
use thiserror::Error;

/// Session errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The session was closed locally.
    #[error("session closed")]
    Closed,

    /// The transport was lost after the session became ready.
    #[error("connection lost")]
    Disconnected,

    /// The name was advertised, then withdrawn while still in use.
    #[error("'{0}' is no longer advertised")]
    NoLongerAdvertised(String),

    /// No live registration exists for the name.
    #[error("'{0}' is not advertised")]
    NotAdvertised(String),

    #[error("service call to '{service}' failed: {message}")]
    ServiceCallFailed { service: String, message: String },

    #[error("goal rejected")]
    GoalRejected,

    #[error("goal aborted")]
    GoalAborted(serde_json::Value),

    /// Service call ids ran out for this session.
    #[error("call id space exhausted")]
    Exhausted,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
