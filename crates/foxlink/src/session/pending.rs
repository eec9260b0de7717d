// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::{Error, Result};
use crate::protocol::{Channel, RemoteService};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// What a deferred caller wants to do with the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PendingKind {
    Subscribe,
    Publish,
    Call,
}

pub(crate) enum Waiter {
    Channel(oneshot::Sender<Result<Arc<Channel>>>),
    Service(oneshot::Sender<Result<Arc<RemoteService>>>),
}

impl Waiter {
    fn is_abandoned(&self) -> bool {
        match self {
            Self::Channel(tx) => tx.is_closed(),
            Self::Service(tx) => tx.is_closed(),
        }
    }

    /// Wake with `Error::Closed`.
    pub fn close(self) {
        match self {
            Self::Channel(tx) => {
                let _ = tx.send(Err(Error::Closed));
            }
            Self::Service(tx) => {
                let _ = tx.send(Err(Error::Closed));
            }
        }
    }
}

/// Names referenced before the directory knew them.
///
/// Entries are consumed whole by the first discovery event for the name.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<(PendingKind, String), Vec<Waiter>>,
}

impl PendingTable {
    pub fn defer(&mut self, kind: PendingKind, name: &str, waiter: Waiter) {
        self.entries
            .entry((kind, name.to_string()))
            .or_default()
            .push(waiter);
    }

    /// Release channel waiters for `channel.topic`: subscribers first, then
    /// publishers, each in arrival order.
    pub fn take_for_channel(&mut self, channel: &Arc<Channel>) -> Vec<Waiter> {
        let mut released = Vec::new();
        for kind in [PendingKind::Subscribe, PendingKind::Publish] {
            if let Some(waiters) = self.entries.remove(&(kind, channel.topic.clone())) {
                released.extend(waiters);
            }
        }
        released
    }

    pub fn take_for_service(&mut self, name: &str) -> Vec<Waiter> {
        self.entries
            .remove(&(PendingKind::Call, name.to_string()))
            .unwrap_or_default()
    }

    /// Drop waiters whose callers stopped waiting.
    pub fn prune(&mut self, kind: PendingKind, name: &str) {
        let key = (kind, name.to_string());
        if let Some(waiters) = self.entries.get_mut(&key) {
            waiters.retain(|w| !w.is_abandoned());
            if waiters.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    #[cfg(test)]
    pub fn waiting(&self, kind: PendingKind, name: &str) -> usize {
        self.entries
            .get(&(kind, name.to_string()))
            .map_or(0, Vec::len)
    }

    pub fn drain(&mut self) -> Vec<Waiter> {
        self.entries.drain().flat_map(|(_, w)| w).collect()
    }
}

/// Hand a resolved channel to a waiter.
pub(crate) fn release_channel(waiter: Waiter, channel: &Arc<Channel>) {
    if let Waiter::Channel(tx) = waiter {
        let _ = tx.send(Ok(Arc::clone(channel)));
    }
}

/// Hand a resolved service to a waiter.
pub(crate) fn release_service(waiter: Waiter, service: &Arc<RemoteService>) {
    if let Waiter::Service(tx) = waiter {
        let _ = tx.send(Ok(Arc::clone(service)));
    }
}
