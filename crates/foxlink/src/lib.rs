// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # foxlink - ROS-style client over Foxglove WebSocket
//!
//! Topics, services, parameters and actions over one Foxglove WebSocket
//! (`foxglove.websocket.v1`) connection. Application code works with names;
//! the session resolves them against what the server advertises and shares
//! protocol registrations between callers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use foxlink::{Session, Topic};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> foxlink::Result<()> {
//!     let session = Session::connect("ws://localhost:8765")?;
//!     session.ready().await?;
//!
//!     let _sub = session
//!         .create_subscription("/chatter", |msg| println!("{}", msg))
//!         .await?;
//!
//!     let topic = Topic::new(&session, "/chatter", "std_msgs/msg/String");
//!     topic.publish(&json!({ "data": "hello" })).await?;
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |  facade: Topic | Service | Param | Action | TfClient           |
//! +---------------------------------------------------------------+
//! |  session: lifecycle gate, directory, pending names,            |
//! |           registrations, call correlation                      |
//! +---------------------------------------------------------------+
//! |  codec: .msg / IDL parsers, CDR / ROS 1 serialization, cache   |
//! +---------------------------------------------------------------+
//! |  protocol: Foxglove v1 frames, WebSocket and in-memory carriers|
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Limitations
//!
//! - Service calls and parameter requests have no timeout; wrap them in
//!   `tokio::time::timeout`.
//! - If the transport closes before the server info arrives, operations
//!   waiting for readiness stay pending until [`Session::close`].
//! - There is no reconnect: open a new session.

pub mod codec;
pub mod config;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod session;

pub use codec::{CodecError, CodecFactory, Encoding, RosCodecFactory};
pub use config::{ConfigError, SessionConfig};
pub use error::{Error, Result};
pub use facade::{
    Action, ActionGoal, FrameSubscription, GoalId, Param, Service, TfClient, TfOptions, Topic,
};
pub use protocol::{Channel, CloseInfo, Parameter, ProtocolError, RemoteService};
pub use session::{
    Publisher, Session, SessionBuilder, SessionEvent, SessionState, Subscription, TopicList,
};
