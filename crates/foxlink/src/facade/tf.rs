// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame transforms from a `tf2_web_republisher` action server.
//!
//! All watched frames share one goal. Adding a frame schedules a goal
//! update after `update_delay`; the update cancels the previous goal and
//! sends one listing every watched frame. Feedback carries an array of
//! `geometry_msgs/TransformStamped`, routed by `child_frame_id`.

use super::{Action, ActionGoal, GoalId};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use crate::session::Session;

type TransformHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Goal parameters sent to the republisher.
#[derive(Debug, Clone)]
pub struct TfOptions {
    pub fixed_frame: String,
    pub angular_thres: f64,
    pub trans_thres: f64,
    /// Hz
    pub rate: f64,
    pub update_delay: Duration,
    pub server_name: String,
    pub action_type: String,
}

impl Default for TfOptions {
    fn default() -> Self {
        Self {
            fixed_frame: "base_link".into(),
            angular_thres: 2.0,
            trans_thres: 0.01,
            rate: 10.0,
            update_delay: Duration::from_millis(50),
            server_name: "/tf2_web_republisher".into(),
            action_type: "tf2_web_republisher_msgs/TFSubscription".into(),
        }
    }
}

/// `/odom` and `odom` name the same frame.
fn frame_key(frame: &str) -> &str {
    frame.strip_prefix('/').unwrap_or(frame)
}

#[derive(Default)]
struct FrameInfo {
    handlers: Vec<(u64, TransformHandler)>,
    /// Last transform seen, replayed to late subscribers.
    transform: Option<Value>,
}

#[derive(Default)]
struct Frames {
    infos: BTreeMap<String, FrameInfo>,
    next_id: u64,
    update_requested: bool,
}

struct TfInner {
    action: Action,
    options: TfOptions,
    frames: Mutex<Frames>,
    goal: Mutex<Option<ActionGoal>>,
    // Serializes goal updates.
    updating: tokio::sync::Mutex<()>,
}

impl TfInner {
    fn process_feedback(&self, message: &Value) {
        let feedback = message.get("feedback").unwrap_or(message);
        let Some(transforms) = feedback.get("transforms").and_then(Value::as_array) else {
            return;
        };
        for stamped in transforms {
            let Some(child) = stamped.get("child_frame_id").and_then(Value::as_str) else {
                continue;
            };
            let transform = json!({
                "stamp": stamped["header"]["stamp"],
                "translation": stamped["transform"]["translation"],
                "rotation": stamped["transform"]["rotation"],
            });
            let handlers: Vec<TransformHandler> = {
                let mut frames = self.frames.lock();
                let Some(info) = frames.infos.get_mut(frame_key(child)) else {
                    continue;
                };
                info.transform = Some(transform.clone());
                info.handlers.iter().map(|(_, h)| Arc::clone(h)).collect()
            };
            for handler in handlers {
                handler(&transform);
            }
        }
    }
}

async fn update_goal(inner: Arc<TfInner>) {
    tokio::time::sleep(inner.options.update_delay).await;
    let _updating = inner.updating.lock().await;

    let source_frames: Vec<String> = {
        let mut frames = inner.frames.lock();
        frames.update_requested = false;
        frames.infos.keys().cloned().collect()
    };
    let goal = json!({
        "source_frames": source_frames,
        "target_frame": inner.options.fixed_frame,
        "angular_thres": inner.options.angular_thres,
        "trans_thres": inner.options.trans_thres,
        "rate": inner.options.rate,
    });

    let previous = inner.goal.lock().take();
    if let Some(previous) = previous {
        if let Err(e) = previous.cancel().await {
            warn!("Cancel of TF goal {} failed: {}", previous.id(), e);
        }
    }

    let weak: Weak<TfInner> = Arc::downgrade(&inner);
    let sent = inner
        .action
        .send_goal_with_feedback(goal, move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.process_feedback(&message);
            }
        })
        .await;
    match sent {
        Ok(goal) => {
            debug!("TF goal {} watches {:?}", goal.id(), source_frames);
            let replaced = inner.goal.lock().replace(goal);
            drop(replaced);
        }
        Err(e) => warn!("TF goal update on '{}' failed: {}", inner.action.name(), e),
    }
}

/// Watches frame transforms through a republisher action.
///
/// Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct TfClient {
    inner: Arc<TfInner>,
}

impl fmt::Debug for TfClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TfClient")
            .field("server_name", &self.inner.options.server_name)
            .field("fixed_frame", &self.inner.options.fixed_frame)
            .finish_non_exhaustive()
    }
}

impl TfClient {
    pub fn new(session: &Session, options: TfOptions) -> Self {
        let action = Action::new(session, &options.server_name, &options.action_type);
        let inner = TfInner {
            action,
            options,
            frames: Mutex::new(Frames::default()),
            goal: Mutex::new(None),
            updating: tokio::sync::Mutex::new(()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn options(&self) -> &TfOptions {
        &self.inner.options
    }

    /// Watched frames, without leading slashes.
    pub fn frames(&self) -> Vec<String> {
        self.inner.frames.lock().infos.keys().cloned().collect()
    }

    /// Goal currently held with the republisher.
    pub fn current_goal(&self) -> Option<GoalId> {
        self.inner.goal.lock().as_ref().map(ActionGoal::id)
    }

    /// Call `handler` with every transform of `frame`.
    ///
    /// A new frame schedules a goal update. For a known frame, the last
    /// transform is delivered before this returns.
    pub fn subscribe<F>(&self, frame: &str, handler: F) -> FrameSubscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = frame_key(frame).to_string();
        let handler: TransformHandler = Arc::new(handler);
        let (id, cached, schedule) = {
            let mut frames = self.inner.frames.lock();
            let id = frames.next_id;
            frames.next_id += 1;
            let is_new = !frames.infos.contains_key(&key);
            let schedule = is_new && !frames.update_requested;
            if schedule {
                frames.update_requested = true;
            }
            let info = frames.infos.entry(key.clone()).or_default();
            let cached = info.transform.clone();
            info.handlers.push((id, Arc::clone(&handler)));
            (id, cached, schedule)
        };
        if schedule {
            tokio::spawn(update_goal(Arc::clone(&self.inner)));
        }
        if let Some(transform) = cached {
            handler(&transform);
        }
        FrameSubscription {
            tf: Arc::downgrade(&self.inner),
            frame: key,
            id,
        }
    }

    /// Drop every handler of `frame`.
    pub fn unsubscribe_all(&self, frame: &str) {
        let removed = self.inner.frames.lock().infos.remove(frame_key(frame));
        drop(removed);
    }
}

/// Handler registration for one frame. Dropping it unsubscribes.
pub struct FrameSubscription {
    tf: Weak<TfInner>,
    frame: String,
    id: u64,
}

impl fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSubscription")
            .field("frame", &self.frame)
            .field("id", &self.id)
            .finish()
    }
}

impl FrameSubscription {
    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        let Some(tf) = self.tf.upgrade() else {
            return;
        };
        let released = {
            let mut frames = tf.frames.lock();
            let Some(info) = frames.infos.get_mut(&self.frame) else {
                return;
            };
            let Some(pos) = info.handlers.iter().position(|(id, _)| *id == self.id) else {
                return;
            };
            let (_, handler) = info.handlers.remove(pos);
            if info.handlers.is_empty() {
                frames.infos.remove(&self.frame);
            }
            handler
        };
        drop(released);
    }
}
