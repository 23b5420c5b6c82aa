use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::{Bus, BusMessage, BusResult, RoomDirectory};

const TOPIC_CAPACITY: usize = 256;

const RELEASE_OWNER_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

type TopicMap = Arc<RwLock<HashMap<String, broadcast::Sender<BusMessage>>>>;

/// Redis-backed coordination bus.
///
/// Each process holds a single pattern subscription on `<prefix>bus:*` and fans
/// messages out to local receivers of the topics it cares about. Ownership and
/// membership records are plain keys with a TTL so a crashed process cannot pin
/// a room forever.
pub struct RedisBus {
    redis: ConnectionManager,
    prefix: String,
    topics: TopicMap,
    pump: JoinHandle<()>,
}

impl RedisBus {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> BusResult<Self> {
        let prefix = prefix.into();
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client.clone()).await?;

        let mut pubsub = client.get_async_pubsub().await?;
        let channel_prefix = format!("{prefix}bus:");
        pubsub.psubscribe(format!("{channel_prefix}*")).await?;

        let topics: TopicMap = Arc::new(RwLock::new(HashMap::new()));
        let pump_topics = topics.clone();
        let pump = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Some(topic) = msg.get_channel_name().strip_prefix(&channel_prefix) else {
                    continue;
                };
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%topic, error = %err, "discarding undecodable bus payload");
                        continue;
                    }
                };
                let sender = pump_topics.read().get(topic).cloned();
                if let Some(sender) = sender {
                    let _ = sender.send(BusMessage {
                        topic: topic.to_string(),
                        payload: Bytes::from(payload),
                    });
                }
            }
            warn!("redis pubsub stream ended; cross-process relay is unavailable");
        });

        debug!(%prefix, "redis coordination bus connected");
        Ok(Self {
            redis,
            prefix,
            topics,
            pump,
        })
    }

    fn channel(&self, topic: &str) -> String {
        format!("{}bus:{}", self.prefix, topic)
    }

    fn owner_key(&self, room: &str) -> String {
        format!("{}room:{}:owner", self.prefix, room)
    }

    fn members_key(&self, room: &str) -> String {
        format!("{}room:{}:members", self.prefix, room)
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn subscribe(&self, topic: &str) -> BusResult<broadcast::Receiver<BusMessage>> {
        if let Some(sender) = self.topics.read().get(topic) {
            return Ok(sender.subscribe());
        }
        let mut guard = self.topics.write();
        Ok(guard
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe())
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
        let channel = self.channel(topic);
        let mut conn = self.redis.clone();
        match conn.publish::<_, _, i64>(&channel, payload.to_vec()).await {
            Ok(receivers) => {
                trace!(%topic, receivers, "published bus message");
                Ok(())
            }
            Err(err) => {
                // A lost reply may mean the first publish landed; subscribers
                // dedupe by sequence number.
                warn!(%topic, error = %err, "bus publish failed; retrying once");
                conn.publish::<_, _, i64>(&channel, payload.to_vec())
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RoomDirectory for RedisBus {
    async fn claim_owner(&self, room: &str, instance: &str, ttl: Duration) -> BusResult<bool> {
        let mut conn = self.redis.clone();
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.owner_key(room))
            .arg(instance)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(claimed.is_some())
    }

    async fn owner(&self, room: &str) -> BusResult<Option<String>> {
        let mut conn = self.redis.clone();
        let owner: Option<String> = conn.get(self.owner_key(room)).await?;
        Ok(owner)
    }

    async fn release_owner(&self, room: &str, instance: &str) -> BusResult<()> {
        let mut conn = self.redis.clone();
        let removed: i64 = redis::Script::new(RELEASE_OWNER_SCRIPT)
            .key(self.owner_key(room))
            .arg(instance)
            .invoke_async(&mut conn)
            .await?;
        if removed == 0 {
            debug!(%room, %instance, "room owner already released or taken over");
        }
        Ok(())
    }

    async fn join(&self, room: &str, instance: &str, ttl: Duration) -> BusResult<()> {
        let mut conn = self.redis.clone();
        let key = self.members_key(room);
        redis::pipe()
            .cmd("SADD")
            .arg(&key)
            .arg(instance)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl.as_millis() as u64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn leave(&self, room: &str, instance: &str) -> BusResult<()> {
        let mut conn = self.redis.clone();
        conn.srem::<_, _, ()>(self.members_key(room), instance)
            .await?;
        Ok(())
    }

    async fn members(&self, room: &str) -> BusResult<Vec<String>> {
        let mut conn = self.redis.clone();
        let mut members: Vec<String> = conn.smembers(self.members_key(room)).await?;
        members.sort();
        Ok(members)
    }

    async fn touch(&self, room: &str, ttl: Duration) -> BusResult<()> {
        let mut conn = self.redis.clone();
        let millis = ttl.as_millis() as u64;
        redis::pipe()
            .cmd("PEXPIRE")
            .arg(self.owner_key(room))
            .arg(millis)
            .ignore()
            .cmd("PEXPIRE")
            .arg(self.members_key(room))
            .arg(millis)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a live Redis; run with `cargo test -- --ignored` and REDIS_URL set.
    #[test_timeout::tokio_timeout_test]
    #[ignore]
    async fn redis_bus_fans_out_and_tracks_owner() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let bus = RedisBus::connect(&url, "rendezvous-test:").await.expect("redis");
        let room = format!("room-{}", std::process::id());

        let mut sub = bus.subscribe(&room).await.unwrap();
        // The pattern subscription is established before connect returns.
        bus.publish(&room, Bytes::from_static(b"hello")).await.unwrap();
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, Bytes::from_static(b"hello"));

        let ttl = Duration::from_secs(5);
        assert!(bus.claim_owner(&room, "node-a", ttl).await.unwrap());
        assert!(!bus.claim_owner(&room, "node-b", ttl).await.unwrap());
        bus.release_owner(&room, "node-a").await.unwrap();
        assert_eq!(bus.owner(&room).await.unwrap(), None);
    }
}
