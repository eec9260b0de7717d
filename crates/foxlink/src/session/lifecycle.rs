// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::error::{Error, Result};
use tokio::sync::watch;

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the transport to open and the server info to arrive.
    Connecting,
    Ready,
    /// Transport lost after the session became ready.
    Disconnected,
    /// Closed locally.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting { open: bool, server_info: bool },
    Ready,
    Disconnected,
    Closed,
}

/// Readiness gate: open AND server info, in either order.
pub(crate) struct Lifecycle {
    tx: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Phase::Connecting {
            open: false,
            server_info: false,
        });
        Self { tx }
    }

    pub fn state(&self) -> SessionState {
        match *self.tx.borrow() {
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Ready => SessionState::Ready,
            Phase::Disconnected => SessionState::Disconnected,
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Returns true when this step completed the handshake.
    fn handshake_step(&self, step: impl FnOnce(&mut bool, &mut bool)) -> bool {
        let mut became_ready = false;
        self.tx.send_if_modified(|phase| match phase {
            Phase::Connecting { open, server_info } => {
                step(open, server_info);
                if *open && *server_info {
                    *phase = Phase::Ready;
                    became_ready = true;
                }
                true
            }
            _ => false,
        });
        became_ready
    }

    pub fn mark_open(&self) -> bool {
        self.handshake_step(|open, _| *open = true)
    }

    pub fn mark_server_info(&self) -> bool {
        self.handshake_step(|_, server_info| *server_info = true)
    }

    /// Transport gone. Only a ready session moves to `Disconnected`; a
    /// session still connecting keeps its waiters pending.
    pub fn mark_transport_lost(&self) -> bool {
        self.tx.send_if_modified(|phase| {
            if *phase == Phase::Ready {
                *phase = Phase::Disconnected;
                true
            } else {
                false
            }
        })
    }

    /// Returns false if already closed.
    pub fn mark_closed(&self) -> bool {
        self.tx.send_replace(Phase::Closed) != Phase::Closed
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow() == Phase::Closed
    }

    /// Fail fast on a closed or disconnected session.
    pub fn check(&self) -> Result<()> {
        match *self.tx.borrow() {
            Phase::Closed => Err(Error::Closed),
            Phase::Disconnected => Err(Error::Disconnected),
            // Callers await readiness before checking.
            Phase::Connecting { .. } | Phase::Ready => Ok(()),
        }
    }

    /// Wait until ready. Pends forever if the transport dies first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        loop {
            let phase = *rx.borrow_and_update();
            match phase {
                Phase::Ready => return Ok(()),
                Phase::Closed => return Err(Error::Closed),
                Phase::Disconnected => return Err(Error::Disconnected),
                Phase::Connecting { .. } => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::Closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ready_needs_both_steps_in_any_order() {
        let a = Lifecycle::new();
        assert!(!a.mark_open());
        assert_eq!(a.state(), SessionState::Connecting);
        assert!(a.mark_server_info());
        assert_eq!(a.state(), SessionState::Ready);

        let b = Lifecycle::new();
        assert!(!b.mark_server_info());
        assert!(b.mark_open());
        // A repeated step does not re-trigger readiness.
        assert!(!b.mark_open());
    }

    #[test]
    fn transport_loss() {
        let connecting = Lifecycle::new();
        assert!(!connecting.mark_transport_lost());
        assert_eq!(connecting.state(), SessionState::Connecting);

        let ready = Lifecycle::new();
        ready.mark_open();
        ready.mark_server_info();
        assert!(ready.mark_transport_lost());
        assert!(matches!(ready.check(), Err(Error::Disconnected)));
    }

    #[test]
    fn close_is_idempotent() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.mark_closed());
        assert!(!lifecycle.mark_closed());
        assert!(lifecycle.is_closed());
        assert!(!lifecycle.mark_open());
        assert!(matches!(lifecycle.check(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn waiters_wake_on_ready_and_close() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new());

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_ready().await })
        };
        tokio::task::yield_now().await;
        lifecycle.mark_server_info();
        lifecycle.mark_open();
        assert!(waiter.await.unwrap().is_ok());

        let closed = std::sync::Arc::new(Lifecycle::new());
        let waiter = {
            let closed = closed.clone();
            tokio::spawn(async move { closed.wait_ready().await })
        };
        tokio::task::yield_now().await;
        closed.mark_closed();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Closed)));
    }

    #[tokio::test]
    async fn transport_loss_before_ready_keeps_waiting() {
        let lifecycle = Lifecycle::new();
        lifecycle.mark_open();
        lifecycle.mark_transport_lost();
        let result =
            tokio::time::timeout(Duration::from_millis(50), lifecycle.wait_ready()).await;
        assert!(result.is_err(), "waiter should still be pending");
    }
}
