// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named handles forwarding into a [`Session`](crate::session::Session).

mod action;
mod param;
mod service;
mod tf;
mod topic;

pub use action::{Action, ActionGoal, GoalId};
pub use param::Param;
pub use service::Service;
pub use tf::{FrameSubscription, TfClient, TfOptions};
pub use topic::Topic;
