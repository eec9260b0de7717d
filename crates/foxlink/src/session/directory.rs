// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::protocol::{Channel, RemoteService};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Currently advertised channels and services.
///
/// Indexed by id and by name. Names are unique: advertising a name under a
/// new id displaces the previous entry.
#[derive(Debug, Default)]
pub(crate) struct Directory {
    channels: HashMap<u32, Arc<Channel>>,
    channel_names: BTreeMap<String, u32>,
    services: HashMap<u32, Arc<RemoteService>>,
    service_names: BTreeMap<String, u32>,
}

impl Directory {
    /// Insert or replace a channel.
    ///
    /// When the id was reused for another topic, the channel it displaced is
    /// returned alongside the new one.
    pub fn upsert_channel(&mut self, channel: Channel) -> (Arc<Channel>, Option<Arc<Channel>>) {
        let channel = Arc::new(channel);
        let mut displaced_topic = None;
        if let Some(previous) = self.channels.insert(channel.id, Arc::clone(&channel)) {
            if previous.topic != channel.topic {
                if self.channel_names.get(&previous.topic) == Some(&previous.id) {
                    self.channel_names.remove(&previous.topic);
                }
                displaced_topic = Some(previous);
            }
        }
        if let Some(displaced) = self.channel_names.insert(channel.topic.clone(), channel.id) {
            if displaced != channel.id {
                self.channels.remove(&displaced);
            }
        }
        (channel, displaced_topic)
    }

    pub fn remove_channel(&mut self, id: u32) -> Option<Arc<Channel>> {
        let channel = self.channels.remove(&id)?;
        if self.channel_names.get(&channel.topic) == Some(&id) {
            self.channel_names.remove(&channel.topic);
        }
        Some(channel)
    }

    pub fn channel_by_name(&self, topic: &str) -> Option<Arc<Channel>> {
        self.channel_names
            .get(topic)
            .and_then(|id| self.channels.get(id))
            .cloned()
    }

    /// (topic, type) pairs sorted by topic.
    pub fn topics(&self) -> Vec<(String, String)> {
        self.channel_names
            .iter()
            .filter_map(|(name, id)| {
                self.channels
                    .get(id)
                    .map(|c| (name.clone(), c.schema_name.clone()))
            })
            .collect()
    }

    pub fn upsert_service(&mut self, service: RemoteService) -> Arc<RemoteService> {
        let service = Arc::new(service);
        if let Some(previous) = self.services.insert(service.id, Arc::clone(&service)) {
            if previous.name != service.name
                && self.service_names.get(&previous.name) == Some(&previous.id)
            {
                self.service_names.remove(&previous.name);
            }
        }
        if let Some(displaced) = self.service_names.insert(service.name.clone(), service.id) {
            if displaced != service.id {
                self.services.remove(&displaced);
            }
        }
        service
    }

    pub fn remove_service(&mut self, id: u32) -> Option<Arc<RemoteService>> {
        let service = self.services.remove(&id)?;
        if self.service_names.get(&service.name) == Some(&id) {
            self.service_names.remove(&service.name);
        }
        Some(service)
    }

    pub fn service_by_name(&self, name: &str) -> Option<Arc<RemoteService>> {
        self.service_names
            .get(name)
            .and_then(|id| self.services.get(id))
            .cloned()
    }

    /// (service, type) pairs sorted by service name.
    pub fn services(&self) -> Vec<(String, String)> {
        self.service_names
            .iter()
            .filter_map(|(name, id)| {
                self.services
                    .get(id)
                    .map(|s| (name.clone(), s.service_type.clone()))
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.channel_names.clear();
        self.services.clear();
        self.service_names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: u32, topic: &str) -> Channel {
        Channel {
            id,
            topic: topic.into(),
            encoding: "cdr".into(),
            schema_name: "std_msgs/String".into(),
            schema: "string data".into(),
            schema_encoding: None,
        }
    }

    fn names(dir: &Directory) -> Vec<String> {
        dir.topics().into_iter().map(|(name, _)| name).collect()
    }

    #[test]
    fn upsert_and_remove() {
        let mut dir = Directory::default();
        dir.upsert_channel(channel(1, "/a"));
        dir.upsert_channel(channel(2, "/b"));
        assert_eq!(names(&dir), ["/a", "/b"]);
        assert_eq!(dir.channel_by_name("/b").unwrap().id, 2);

        assert_eq!(dir.remove_channel(1).unwrap().topic, "/a");
        assert!(dir.remove_channel(1).is_none());
        assert_eq!(names(&dir), ["/b"]);
    }

    #[test]
    fn names_stay_unique() {
        let mut dir = Directory::default();
        dir.upsert_channel(channel(1, "/a"));
        // Same name, new id: the old id is displaced.
        dir.upsert_channel(channel(5, "/a"));
        assert_eq!(names(&dir), ["/a"]);
        assert!(dir.remove_channel(1).is_none());

        // Same id, new name: the old name goes away.
        let (_, displaced) = dir.upsert_channel(channel(5, "/renamed"));
        assert_eq!(displaced.unwrap().topic, "/a");
        assert_eq!(names(&dir), ["/renamed"]);
        let (_, displaced) = dir.upsert_channel(channel(5, "/renamed"));
        assert!(displaced.is_none());
    }

    #[test]
    fn stale_remove_keeps_current_name() {
        let mut dir = Directory::default();
        dir.upsert_channel(channel(1, "/a"));
        dir.upsert_channel(channel(2, "/b"));
        dir.upsert_channel(channel(1, "/b"));
        // id 2 was displaced by id 1 taking "/b"
        assert!(dir.remove_channel(2).is_none());
        assert_eq!(dir.channel_by_name("/b").unwrap().id, 1);
        assert_eq!(names(&dir), ["/b"]);
    }

    #[test]
    fn services() {
        let mut dir = Directory::default();
        dir.upsert_service(RemoteService::new(1, "/add", "pkg/Add", "", ""));
        dir.upsert_service(RemoteService::new(2, "/add", "pkg/Add2", "", ""));
        assert_eq!(dir.services(), [("/add".to_string(), "pkg/Add2".to_string())]);
        assert!(dir.remove_service(1).is_none());
        assert!(dir.remove_service(2).is_some());
        assert!(dir.service_by_name("/add").is_none());

        dir.upsert_channel(channel(1, "/a"));
        dir.clear();
        assert!(dir.topics().is_empty());
    }
}
