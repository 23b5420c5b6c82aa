use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

use crate::{Bus, BusMessage, BusResult, RoomDirectory};

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Room {
    owner: Option<String>,
    members: HashSet<String>,
}

/// In-memory bus for single-process deployments and tests.
///
/// Several registries sharing one `LocalBus` behave like several server
/// processes sharing a Redis instance. TTLs are accepted but not enforced.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
    rooms: Mutex<HashMap<String, Room>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut guard = self.topics.write();
        guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Number of topics that still have local fan-out state.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn subscribe(&self, topic: &str) -> BusResult<broadcast::Receiver<BusMessage>> {
        Ok(self.sender_for(topic).subscribe())
    }

    async fn unsubscribe(&self, topic: &str) -> BusResult<()> {
        let mut guard = self.topics.write();
        if guard
            .get(topic)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            guard.remove(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        let sender = self.topics.read().get(topic).cloned();
        let Some(sender) = sender else {
            trace!(%topic, "publish on topic without subscribers");
            return Ok(());
        };
        if sender
            .send(BusMessage {
                topic: topic.to_string(),
                payload,
            })
            .is_err()
        {
            trace!(%topic, "publish found no live receivers");
        }
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for LocalBus {
    async fn claim_owner(&self, room: &str, instance: &str, _ttl: Duration) -> BusResult<bool> {
        let mut rooms = self.rooms.lock();
        let entry = rooms.entry(room.to_string()).or_default();
        match &entry.owner {
            Some(_) => Ok(false),
            None => {
                entry.owner = Some(instance.to_string());
                Ok(true)
            }
        }
    }

    async fn owner(&self, room: &str) -> BusResult<Option<String>> {
        Ok(self
            .rooms
            .lock()
            .get(room)
            .and_then(|entry| entry.owner.clone()))
    }

    async fn release_owner(&self, room: &str, instance: &str) -> BusResult<()> {
        let mut rooms = self.rooms.lock();
        let empty = match rooms.get_mut(room) {
            Some(entry) => {
                if entry.owner.as_deref() == Some(instance) {
                    entry.owner = None;
                }
                entry.owner.is_none() && entry.members.is_empty()
            }
            None => false,
        };
        if empty {
            rooms.remove(room);
        }
        Ok(())
    }

    async fn join(&self, room: &str, instance: &str, _ttl: Duration) -> BusResult<()> {
        self.rooms
            .lock()
            .entry(room.to_string())
            .or_default()
            .members
            .insert(instance.to_string());
        Ok(())
    }

    async fn leave(&self, room: &str, instance: &str) -> BusResult<()> {
        let mut rooms = self.rooms.lock();
        let empty = match rooms.get_mut(room) {
            Some(entry) => {
                entry.members.remove(instance);
                entry.owner.is_none() && entry.members.is_empty()
            }
            None => false,
        };
        if empty {
            rooms.remove(room);
        }
        Ok(())
    }

    async fn members(&self, room: &str) -> BusResult<Vec<String>> {
        let mut members: Vec<String> = self
            .rooms
            .lock()
            .get(room)
            .map(|entry| entry.members.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn touch(&self, _room: &str, _ttl: Duration) -> BusResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(30);

    #[test_timeout::tokio_timeout_test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("room:abc").await.expect("subscribe ok");
        bus.publish("room:abc", Bytes::from_static(b"ping"))
            .await
            .expect("publish ok");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "room:abc");
        assert_eq!(msg.payload, Bytes::from_static(b"ping"));
    }

    #[test_timeout::tokio_timeout_test]
    async fn every_subscriber_sees_each_publish() {
        let bus = LocalBus::new();
        let mut first = bus.subscribe("room:abc").await.unwrap();
        let mut second = bus.subscribe("room:abc").await.unwrap();
        bus.publish("room:abc", Bytes::from_static(b"offer"))
            .await
            .unwrap();
        assert_eq!(first.recv().await.unwrap().payload, "offer");
        assert_eq!(second.recv().await.unwrap().payload, "offer");
    }

    #[test_timeout::tokio_timeout_test]
    async fn unsubscribe_prunes_topics_without_receivers() {
        let bus = LocalBus::new();
        let sub = bus.subscribe("room:abc").await.unwrap();
        bus.unsubscribe("room:abc").await.unwrap();
        assert_eq!(bus.topic_count(), 1);
        drop(sub);
        bus.unsubscribe("room:abc").await.unwrap();
        assert_eq!(bus.topic_count(), 0);
        bus.publish("room:abc", Bytes::from_static(b"late"))
            .await
            .expect("publishing to an empty room is not an error");
    }

    #[test_timeout::tokio_timeout_test]
    async fn only_one_instance_can_own_a_room() {
        let bus = LocalBus::new();
        assert!(bus.claim_owner("abc", "node-a", TTL).await.unwrap());
        assert!(!bus.claim_owner("abc", "node-b", TTL).await.unwrap());
        assert_eq!(bus.owner("abc").await.unwrap().as_deref(), Some("node-a"));

        bus.release_owner("abc", "node-b").await.unwrap();
        assert_eq!(bus.owner("abc").await.unwrap().as_deref(), Some("node-a"));

        bus.release_owner("abc", "node-a").await.unwrap();
        assert_eq!(bus.owner("abc").await.unwrap(), None);
        assert!(bus.claim_owner("abc", "node-b", TTL).await.unwrap());
    }

    #[test_timeout::tokio_timeout_test]
    async fn membership_tracks_join_and_leave() {
        let bus = LocalBus::new();
        bus.join("abc", "node-b", TTL).await.unwrap();
        bus.join("abc", "node-a", TTL).await.unwrap();
        bus.join("abc", "node-a", TTL).await.unwrap();
        assert_eq!(bus.members("abc").await.unwrap(), vec!["node-a", "node-b"]);

        bus.leave("abc", "node-a").await.unwrap();
        bus.leave("abc", "node-b").await.unwrap();
        assert!(bus.members("abc").await.unwrap().is_empty());
        assert!(bus.rooms.lock().is_empty());
    }
}
