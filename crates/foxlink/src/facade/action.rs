// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ROS 2 action client over the action's hidden services and topics.
//!
//! For an action `name` of type `T`:
//! - `name/_action/send_goal` (`T_SendGoal`)
//! - `name/_action/get_result` (`T_GetResult`)
//! - `name/_action/cancel_goal` (`T_CancelGoal`)
//! - `name/_action/feedback` (`T_FeedbackMessage`)

use super::Service;
use crate::error::{Error, Result};
use crate::session::{Session, Subscription};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// `action_msgs/GoalStatus` STATUS_ABORTED.
const STATUS_ABORTED: i64 = 6;

type FeedbackHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// 16-byte goal identifier (`unique_identifier_msgs/UUID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GoalId([u8; 16]);

impl GoalId {
    pub fn random() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    fn to_json(self) -> Value {
        json!({ "uuid": self.0.to_vec() })
    }

    /// Parse `{"uuid": [16 bytes]}`.
    fn from_json(value: &Value) -> Option<Self> {
        let uuid = value.get("uuid")?.as_array()?;
        let mut bytes = [0u8; 16];
        if uuid.len() != bytes.len() {
            return None;
        }
        for (slot, byte) in bytes.iter_mut().zip(uuid) {
            *slot = u8::try_from(byte.as_u64()?).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0), f)
    }
}

struct ActionInner {
    session: Session,
    name: String,
    action_type: String,
    send_goal: Service,
    get_result: Service,
    cancel_goal: Service,
    goals: Mutex<HashMap<GoalId, FeedbackHandler>>,
    feedback: tokio::sync::Mutex<Option<Subscription>>,
}

impl ActionInner {
    fn route_feedback(&self, message: Value) {
        let Some(id) = message.get("goal_id").and_then(GoalId::from_json) else {
            return;
        };
        let handler = self.goals.lock().get(&id).cloned();
        if let Some(handler) = handler {
            handler(message);
        }
    }
}

/// Client for one action.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.inner.name)
            .field("action_type", &self.inner.action_type)
            .finish_non_exhaustive()
    }
}

impl Action {
    pub fn new(session: &Session, name: impl Into<String>, action_type: impl Into<String>) -> Self {
        let name = name.into();
        let action_type = action_type.into();
        let service = |suffix: &str, kind: &str| {
            Service::new(
                session,
                format!("{}/_action/{}", name, suffix),
                format!("{}_{}", action_type, kind),
            )
        };
        let inner = ActionInner {
            session: session.clone(),
            send_goal: service("send_goal", "SendGoal"),
            get_result: service("get_result", "GetResult"),
            cancel_goal: service("cancel_goal", "CancelGoal"),
            goals: Mutex::new(HashMap::new()),
            feedback: tokio::sync::Mutex::new(None),
            name,
            action_type,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn action_type(&self) -> &str {
        &self.inner.action_type
    }

    /// Send a goal. Resolves once the server accepts it.
    pub async fn send_goal(&self, goal: Value) -> Result<ActionGoal> {
        self.submit(goal, None).await
    }

    /// Send a goal, routing its feedback messages to `on_feedback`.
    ///
    /// The first call subscribes to the feedback topic and waits for it to
    /// be advertised.
    pub async fn send_goal_with_feedback<F>(&self, goal: Value, on_feedback: F) -> Result<ActionGoal>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe_feedback().await?;
        self.submit(goal, Some(Arc::new(on_feedback))).await
    }

    /// Ask the server to cancel a goal. Returns the cancel response.
    pub async fn cancel_goal(&self, id: GoalId) -> Result<Value> {
        let request = json!({
            "goal_info": {
                "goal_id": id.to_json(),
                "stamp": { "sec": 0, "nanosec": 0 },
            }
        });
        self.inner.cancel_goal.call(&request).await
    }

    async fn submit(&self, goal: Value, feedback: Option<FeedbackHandler>) -> Result<ActionGoal> {
        let id = GoalId::random();
        // Registered before sending: feedback may beat the response.
        if let Some(handler) = feedback {
            self.inner.goals.lock().insert(id, handler);
        }
        // Dropped on every early return, which unregisters the handler.
        let handle = ActionGoal {
            action: self.clone(),
            id,
        };

        let request = json!({ "goal_id": id.to_json(), "goal": goal });
        let response = self.inner.send_goal.call(&request).await?;
        if response.get("accepted").and_then(Value::as_bool) != Some(true) {
            debug!("Goal {} rejected by '{}'", id, self.inner.name);
            return Err(Error::GoalRejected);
        }
        debug!("Goal {} accepted by '{}'", id, self.inner.name);
        Ok(handle)
    }

    async fn subscribe_feedback(&self) -> Result<()> {
        let mut slot = self.inner.feedback.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let topic = format!("{}/_action/feedback", self.inner.name);
        let action: Weak<ActionInner> = Arc::downgrade(&self.inner);
        let subscription = self
            .inner
            .session
            .create_subscription(&topic, move |message| {
                if let Some(action) = action.upgrade() {
                    action.route_feedback(message);
                }
            })
            .await?;
        *slot = Some(subscription);
        Ok(())
    }
}

/// An accepted goal. Dropping it stops feedback delivery.
pub struct ActionGoal {
    action: Action,
    id: GoalId,
}

impl fmt::Debug for ActionGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionGoal")
            .field("action", &self.action.inner.name)
            .field("id", &self.id)
            .finish()
    }
}

impl ActionGoal {
    pub fn id(&self) -> GoalId {
        self.id
    }

    /// Wait for the goal's result.
    ///
    /// Fails with [`Error::GoalAborted`] carrying the response when the goal
    /// was aborted.
    pub async fn result(self) -> Result<Value> {
        let response = self
            .action
            .inner
            .get_result
            .call(&json!({ "goal_id": self.id.to_json() }))
            .await?;
        if response.get("status").and_then(Value::as_i64) == Some(STATUS_ABORTED) {
            return Err(Error::GoalAborted(response));
        }
        Ok(response)
    }

    pub async fn cancel(&self) -> Result<Value> {
        self.action.cancel_goal(self.id).await
    }
}

impl Drop for ActionGoal {
    fn drop(&mut self) {
        // Released after the lock: the handler may own this action's handles.
        let handler = self.action.inner.goals.lock().remove(&self.id);
        drop(handler);
    }
}
