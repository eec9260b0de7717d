// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reference-counted protocol registrations.
//!
//! Any number of logical subscribers share one protocol subscription per
//! topic, and any number of publishers share one client advertisement. The
//! protocol-level registration is created by the first attach and torn down
//! by the last detach.

use crate::error::{Error, Result};
use crate::protocol::{Channel, ProtocolClient};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Callback receiving decoded messages.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Identifies one logical subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

enum Binding {
    /// Topic not advertised yet.
    Pending,
    Bound {
        subscription_id: u32,
        channel: Arc<Channel>,
    },
    /// Channel withdrawn while subscribers remain.
    Orphaned,
}

struct SubscriptionEntry {
    binding: Binding,
    handlers: Vec<(HandlerId, MessageHandler)>,
}

enum PublisherChannel {
    Pending,
    Bound(Arc<Channel>),
    Orphaned,
}

struct PublisherEntry {
    publisher_id: u32,
    channel: PublisherChannel,
    refcount: usize,
}

/// Outcome of a subscriber detach.
pub(crate) struct Detached {
    /// The protocol registration went away with this subscriber.
    pub last: bool,
    /// Handlers taken out of the table, for the caller to drop unlocked.
    pub released: Vec<MessageHandler>,
    /// Outcome of the unsubscribe, if one was sent.
    pub result: Result<()>,
}

impl Default for Detached {
    fn default() -> Self {
        Self {
            last: false,
            released: Vec::new(),
            result: Ok(()),
        }
    }
}

/// Outcome of an attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Attach {
    /// Registration is live.
    Bound,
    /// Waiting for the name to be advertised.
    Deferred,
}

#[derive(Default)]
pub(crate) struct Registry {
    subscriptions: HashMap<String, SubscriptionEntry>,
    by_subscription_id: HashMap<u32, String>,
    publishers: HashMap<String, PublisherEntry>,
    next_handler: u64,
}

impl Registry {
    pub fn attach_subscriber(
        &mut self,
        protocol: &mut ProtocolClient,
        topic: &str,
        channel: Option<Arc<Channel>>,
        handler: MessageHandler,
    ) -> Result<(HandlerId, Attach)> {
        let handler_id = HandlerId(self.next_handler);

        let attach = if let Some(entry) = self.subscriptions.get_mut(topic) {
            let attach = match entry.binding {
                Binding::Orphaned => return Err(Error::NoLongerAdvertised(topic.to_string())),
                Binding::Pending => Attach::Deferred,
                Binding::Bound { .. } => Attach::Bound,
            };
            entry.handlers.push((handler_id, handler));
            attach
        } else {
            let (binding, attach) = match channel {
                Some(channel) => {
                    let subscription_id = protocol.subscribe(channel.id)?;
                    self.by_subscription_id
                        .insert(subscription_id, topic.to_string());
                    (
                        Binding::Bound {
                            subscription_id,
                            channel,
                        },
                        Attach::Bound,
                    )
                }
                None => (Binding::Pending, Attach::Deferred),
            };
            self.subscriptions.insert(
                topic.to_string(),
                SubscriptionEntry {
                    binding,
                    handlers: vec![(handler_id, handler)],
                },
            );
            attach
        };

        self.next_handler += 1;
        Ok((handler_id, attach))
    }

    /// Remove one subscriber. The last one out unsubscribes.
    ///
    /// Removed handlers are handed back rather than dropped: a handler may
    /// own other handles whose release locks the session.
    pub fn detach_subscriber(
        &mut self,
        protocol: &ProtocolClient,
        topic: &str,
        handler_id: HandlerId,
    ) -> Detached {
        let mut detached = Detached::default();
        let Some(entry) = self.subscriptions.get_mut(topic) else {
            return detached;
        };
        if let Some(index) = entry.handlers.iter().position(|(id, _)| *id == handler_id) {
            detached.released.push(entry.handlers.remove(index).1);
        }
        if !entry.handlers.is_empty() {
            return detached;
        }

        // Drop the entry before the unsubscribe so nothing dispatches to it.
        let Some(entry) = self.subscriptions.remove(topic) else {
            return detached;
        };
        detached.last = true;
        if let Binding::Bound {
            subscription_id, ..
        } = entry.binding
        {
            self.by_subscription_id.remove(&subscription_id);
            detached.result = protocol.unsubscribe(subscription_id).map_err(Error::from);
        }
        detached
    }

    /// Channel and handlers for an inbound message.
    pub fn dispatch_target(
        &self,
        subscription_id: u32,
    ) -> Option<(Arc<Channel>, Vec<MessageHandler>)> {
        let topic = self.by_subscription_id.get(&subscription_id)?;
        let entry = self.subscriptions.get(topic)?;
        match &entry.binding {
            Binding::Bound {
                subscription_id: id,
                channel,
            } if *id == subscription_id => Some((
                Arc::clone(channel),
                entry.handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            )),
            _ => None,
        }
    }

    /// Attach a publisher. The first one advertises.
    ///
    /// Returns the publisher id and the server channel when already known.
    pub fn attach_publisher(
        &mut self,
        protocol: &mut ProtocolClient,
        topic: &str,
        schema_name: &str,
        encoding: &str,
        channel: Option<Arc<Channel>>,
    ) -> Result<(u32, Attach)> {
        if let Some(entry) = self.publishers.get_mut(topic) {
            let attach = match entry.channel {
                PublisherChannel::Orphaned => {
                    return Err(Error::NoLongerAdvertised(topic.to_string()))
                }
                PublisherChannel::Pending => Attach::Deferred,
                PublisherChannel::Bound(_) => Attach::Bound,
            };
            entry.refcount += 1;
            return Ok((entry.publisher_id, attach));
        }

        let publisher_id = protocol.advertise(topic, encoding, schema_name)?;
        let (channel, attach) = match channel {
            Some(channel) => (PublisherChannel::Bound(channel), Attach::Bound),
            None => (PublisherChannel::Pending, Attach::Deferred),
        };
        self.publishers.insert(
            topic.to_string(),
            PublisherEntry {
                publisher_id,
                channel,
                refcount: 1,
            },
        );
        Ok((publisher_id, attach))
    }

    /// Publisher id and server channel to publish on.
    pub fn publisher_channel(&self, topic: &str) -> Result<(u32, Arc<Channel>)> {
        match self.publishers.get(topic) {
            Some(PublisherEntry {
                publisher_id,
                channel: PublisherChannel::Bound(channel),
                ..
            }) => Ok((*publisher_id, Arc::clone(channel))),
            Some(PublisherEntry {
                channel: PublisherChannel::Orphaned,
                ..
            }) => Err(Error::NoLongerAdvertised(topic.to_string())),
            _ => Err(Error::NotAdvertised(topic.to_string())),
        }
    }

    /// Release one publisher. The last one out unadvertises.
    pub fn detach_publisher(&mut self, protocol: &ProtocolClient, topic: &str) -> Result<bool> {
        let Some(entry) = self.publishers.get_mut(topic) else {
            return Ok(false);
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return Ok(false);
        }
        let Some(entry) = self.publishers.remove(topic) else {
            return Ok(false);
        };
        protocol.unadvertise(entry.publisher_id)?;
        Ok(true)
    }

    /// Bind registrations for `channel.topic` to a newly advertised channel.
    ///
    /// Pending and orphaned subscriptions subscribe; a subscription bound to
    /// a displaced channel id moves to the new one.
    pub fn channel_advertised(
        &mut self,
        protocol: &mut ProtocolClient,
        channel: &Arc<Channel>,
    ) -> Result<()> {
        if let Some(entry) = self.publishers.get_mut(&channel.topic) {
            entry.channel = PublisherChannel::Bound(Arc::clone(channel));
        }

        let Some(entry) = self.subscriptions.get_mut(&channel.topic) else {
            return Ok(());
        };
        match &entry.binding {
            Binding::Bound {
                subscription_id,
                channel: current,
            } if current.id == channel.id => {
                entry.binding = Binding::Bound {
                    subscription_id: *subscription_id,
                    channel: Arc::clone(channel),
                };
                return Ok(());
            }
            Binding::Bound {
                subscription_id, ..
            } => {
                let stale = *subscription_id;
                debug!(
                    "Topic '{}' moved to channel {}, resubscribing",
                    channel.topic, channel.id
                );
                self.by_subscription_id.remove(&stale);
                entry.binding = Binding::Orphaned;
                if let Err(e) = protocol.unsubscribe(stale) {
                    debug!("Unsubscribe {} from '{}' failed: {}", stale, channel.topic, e);
                }
            }
            Binding::Pending | Binding::Orphaned => {}
        }

        let subscription_id = protocol.subscribe(channel.id)?;
        entry.binding = Binding::Bound {
            subscription_id,
            channel: Arc::clone(channel),
        };
        self.by_subscription_id
            .insert(subscription_id, channel.topic.clone());
        Ok(())
    }

    /// Orphan registrations bound to a withdrawn channel.
    pub fn channel_removed(&mut self, channel: &Channel) {
        if let Some(entry) = self.publishers.get_mut(&channel.topic) {
            if matches!(&entry.channel, PublisherChannel::Bound(c) if c.id == channel.id) {
                entry.channel = PublisherChannel::Orphaned;
            }
        }
        if let Some(entry) = self.subscriptions.get_mut(&channel.topic) {
            if let Binding::Bound {
                subscription_id,
                channel: current,
            } = &entry.binding
            {
                if current.id == channel.id {
                    self.by_subscription_id.remove(subscription_id);
                    entry.binding = Binding::Orphaned;
                }
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions.get(topic).map_or(0, |e| e.handlers.len())
    }

    pub fn publisher_count(&self, topic: &str) -> usize {
        self.publishers.get(topic).map_or(0, |e| e.refcount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{memory, ClientOp};

    fn channel(id: u32, topic: &str) -> Arc<Channel> {
        Arc::new(Channel {
            id,
            topic: topic.into(),
            encoding: "cdr".into(),
            schema_name: "std_msgs/String".into(),
            schema: "string data".into(),
            schema_encoding: None,
        })
    }

    fn noop() -> MessageHandler {
        Arc::new(|_| {})
    }

    fn setup() -> (Registry, ProtocolClient, memory::MemoryServer) {
        let (conn, server) = memory::pair(8);
        (Registry::default(), ProtocolClient::new(conn.transport), server)
    }

    #[test]
    fn one_subscribe_for_many_attaches() {
        let (mut reg, mut proto, server) = setup();
        let ch = channel(7, "/chatter");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let (id, attach) = reg
                .attach_subscriber(&mut proto, "/chatter", Some(ch.clone()), noop())
                .unwrap();
            assert_eq!(attach, Attach::Bound);
            ids.push(id);
        }
        assert_eq!(server.take_ops().len(), 1);
        assert_eq!(reg.subscriber_count("/chatter"), 3);

        assert!(!reg.detach_subscriber(&proto, "/chatter", ids[0]).last);
        assert!(!reg.detach_subscriber(&proto, "/chatter", ids[1]).last);
        assert!(server.ops().is_empty());
        let detached = reg.detach_subscriber(&proto, "/chatter", ids[2]);
        assert!(detached.last);
        assert!(detached.result.is_ok());
        assert_eq!(
            server.take_ops(),
            [ClientOp::Unsubscribe { subscription_id: 1 }]
        );
        assert!(reg.dispatch_target(1).is_none());
    }

    #[test]
    fn detach_hands_back_the_handler() {
        let (mut reg, mut proto, _server) = setup();
        let owned = Arc::new(());
        let handler: MessageHandler = {
            let owned = Arc::clone(&owned);
            Arc::new(move |_| {
                let _ = &owned;
            })
        };
        let ch = channel(7, "/chatter");
        let (first, _) = reg
            .attach_subscriber(&mut proto, "/chatter", Some(ch.clone()), handler)
            .unwrap();
        let (second, _) = reg
            .attach_subscriber(&mut proto, "/chatter", Some(ch), noop())
            .unwrap();

        let detached = reg.detach_subscriber(&proto, "/chatter", first);
        assert!(!detached.last);
        assert_eq!(detached.released.len(), 1);
        assert_eq!(Arc::strong_count(&owned), 2);
        drop(detached);
        assert_eq!(Arc::strong_count(&owned), 1);

        let detached = reg.detach_subscriber(&proto, "/chatter", second);
        assert!(detached.last);
        assert_eq!(detached.released.len(), 1);
    }

    #[test]
    fn deferred_subscription_binds_on_advertise() {
        let (mut reg, mut proto, server) = setup();
        let (_, attach) = reg
            .attach_subscriber(&mut proto, "/late", None, noop())
            .unwrap();
        assert_eq!(attach, Attach::Deferred);
        assert!(server.ops().is_empty());

        let ch = channel(3, "/late");
        reg.channel_advertised(&mut proto, &ch).unwrap();
        assert_eq!(
            server.take_ops(),
            [ClientOp::Subscribe {
                subscription_id: 1,
                channel_id: 3
            }]
        );
        let (bound, handlers) = reg.dispatch_target(1).unwrap();
        assert_eq!(bound.id, 3);
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn detach_while_pending_sends_nothing() {
        let (mut reg, mut proto, server) = setup();
        let (id, _) = reg
            .attach_subscriber(&mut proto, "/late", None, noop())
            .unwrap();
        assert!(reg.detach_subscriber(&proto, "/late", id).last);
        reg.channel_advertised(&mut proto, &channel(3, "/late"))
            .unwrap();
        assert!(server.ops().is_empty());
    }

    #[test]
    fn orphan_then_revive() {
        let (mut reg, mut proto, server) = setup();
        let ch = channel(3, "/a");
        let (id, _) = reg
            .attach_subscriber(&mut proto, "/a", Some(ch.clone()), noop())
            .unwrap();
        server.take_ops();

        reg.channel_removed(&ch);
        assert!(reg.dispatch_target(1).is_none());
        assert!(matches!(
            reg.attach_subscriber(&mut proto, "/a", None, noop()),
            Err(Error::NoLongerAdvertised(_))
        ));

        reg.channel_advertised(&mut proto, &channel(9, "/a")).unwrap();
        assert_eq!(
            server.take_ops(),
            [ClientOp::Subscribe {
                subscription_id: 2,
                channel_id: 9
            }]
        );
        assert_eq!(reg.dispatch_target(2).unwrap().0.id, 9);

        assert!(reg.detach_subscriber(&proto, "/a", id).last);
        assert_eq!(
            server.take_ops(),
            [ClientOp::Unsubscribe { subscription_id: 2 }]
        );
    }

    #[test]
    fn moved_topic_drops_stale_subscription() {
        let (mut reg, mut proto, server) = setup();
        let (id, _) = reg
            .attach_subscriber(&mut proto, "/a", Some(channel(3, "/a")), noop())
            .unwrap();
        server.take_ops();

        reg.channel_advertised(&mut proto, &channel(9, "/a")).unwrap();
        assert_eq!(
            server.take_ops(),
            [
                ClientOp::Unsubscribe { subscription_id: 1 },
                ClientOp::Subscribe {
                    subscription_id: 2,
                    channel_id: 9
                }
            ]
        );
        assert!(reg.dispatch_target(1).is_none());
        assert_eq!(reg.dispatch_target(2).unwrap().0.id, 9);
        assert!(reg.detach_subscriber(&proto, "/a", id).last);
    }

    #[test]
    fn orphaned_release_sends_no_unsubscribe() {
        let (mut reg, mut proto, server) = setup();
        let ch = channel(3, "/a");
        let (id, _) = reg
            .attach_subscriber(&mut proto, "/a", Some(ch.clone()), noop())
            .unwrap();
        server.take_ops();
        reg.channel_removed(&ch);
        assert!(reg.detach_subscriber(&proto, "/a", id).last);
        assert!(server.ops().is_empty());
    }

    #[test]
    fn publishers_are_refcounted() {
        let (mut reg, mut proto, server) = setup();
        let (pid, attach) = reg
            .attach_publisher(&mut proto, "/out", "std_msgs/String", "cdr", None)
            .unwrap();
        assert_eq!(attach, Attach::Deferred);
        assert!(matches!(
            reg.publisher_channel("/out"),
            Err(Error::NotAdvertised(_))
        ));

        let ch = channel(4, "/out");
        reg.channel_advertised(&mut proto, &ch).unwrap();
        let (again, attach) = reg
            .attach_publisher(&mut proto, "/out", "std_msgs/String", "cdr", Some(ch.clone()))
            .unwrap();
        assert_eq!((again, attach), (pid, Attach::Bound));
        assert_eq!(reg.publisher_count("/out"), 2);
        assert_eq!(reg.publisher_channel("/out").unwrap().0, pid);
        assert_eq!(server.take_ops().len(), 1);

        reg.channel_removed(&ch);
        assert!(matches!(
            reg.publisher_channel("/out"),
            Err(Error::NoLongerAdvertised(_))
        ));

        assert!(!reg.detach_publisher(&proto, "/out").unwrap());
        assert!(reg.detach_publisher(&proto, "/out").unwrap());
        assert_eq!(
            server.take_ops(),
            [ClientOp::Unadvertise { publisher_id: pid }]
        );
        assert!(!reg.detach_publisher(&proto, "/out").unwrap());
    }
}
