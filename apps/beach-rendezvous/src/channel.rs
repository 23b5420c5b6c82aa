use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::signals::ServerEvent;

/// Server-assigned identity of one transport channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Back-reference from an attempt to a channel, possibly hosted by another
/// process. Holding one never keeps the channel alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub instance: String,
    pub channel: ChannelId,
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance, self.channel)
    }
}

struct LocalChannel {
    conn_id: String,
    tx: mpsc::UnboundedSender<ServerEvent>,
    last_seq: u64,
}

/// Outbound queues of the channels hosted by this process.
#[derive(Default)]
pub struct ChannelTable {
    channels: DashMap<ChannelId, LocalChannel>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: ChannelId,
        conn_id: impl Into<String>,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.channels.insert(
            id,
            LocalChannel {
                conn_id: conn_id.into(),
                tx,
                last_seq: 0,
            },
        );
    }

    pub fn remove(&self, id: &ChannelId) -> Option<String> {
        self.channels.remove(id).map(|(_, channel)| channel.conn_id)
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn conn_id_of(&self, id: &ChannelId) -> Option<String> {
        self.channels.get(id).map(|channel| channel.conn_id.clone())
    }

    /// Queue `event` for a local channel.
    ///
    /// Sequenced events at or below the last one delivered are dropped, which
    /// makes bus redelivery harmless. Unsequenced events (rejections aimed at
    /// the sender) always go through. Returns whether the event was queued.
    pub fn deliver(&self, id: &ChannelId, seq: Option<u64>, event: ServerEvent) -> bool {
        let Some(mut channel) = self.channels.get_mut(id) else {
            trace!(channel = %id, event = event.name(), "dropping event for closed channel");
            return false;
        };
        if let Some(seq) = seq {
            if seq <= channel.last_seq {
                trace!(channel = %id, seq, last_seq = channel.last_seq, "duplicate delivery");
                return false;
            }
            channel.last_seq = seq;
        }
        channel.tx.send(event).is_ok()
    }

    /// Channels on this process bound to `conn_id`.
    pub fn count_for(&self, conn_id: &str) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().conn_id == conn_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
