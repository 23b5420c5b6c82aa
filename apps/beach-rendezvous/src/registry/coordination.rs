//! Cross-process plumbing for attempts whose channels live on several
//! processes.
//!
//! Every process taking part in an attempt subscribes to the attempt's room
//! topic and runs one pump task for it. Hosts publish their channels'
//! requests as [`BusEnvelope::Inbound`]; the owner answers with
//! [`BusEnvelope::Deliver`] and announces the end with [`BusEnvelope::Closed`].

use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use rendezvous_bus::{BusMessage, BusResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, trace, warn};

use super::{RegistryInner, SessionRegistry};
use crate::channel::ChannelRef;
use crate::signals::{ClientEvent, ServerEvent, Stage};

/// A request against an attempt, as forwarded to its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Inbound {
    Attach { stage: Stage },
    Client { event: ClientEvent },
    Detach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BusEnvelope {
    /// Host to owner. `seq` increases per forwarding channel.
    Inbound {
        owner: String,
        from: ChannelRef,
        seq: u64,
        op: Inbound,
    },
    /// Owner to host. `seq` is the attempt's outbound sequence number, absent
    /// for rejections.
    Deliver {
        to: ChannelRef,
        seq: Option<u64>,
        event: ServerEvent,
    },
    Closed { owner: String },
}

impl SessionRegistry {
    /// Subscribe to the room topic and join its membership, once per process.
    pub(super) async fn ensure_room(&self, conn_id: &str) -> BusResult<()> {
        if !self.inner.rooms.contains_key(conn_id) {
            let messages = self.inner.bus.subscribe(conn_id).await?;
            let (stop_tx, stop_rx) = oneshot::channel();
            let fresh = match self.inner.rooms.entry(conn_id.to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(vacant) => {
                    vacant.insert(stop_tx);
                    true
                }
            };
            if fresh {
                tokio::spawn(room_pump(
                    Arc::downgrade(&self.inner),
                    conn_id.to_string(),
                    messages,
                    stop_rx,
                ));
            }
        }
        self.inner
            .bus
            .join(conn_id, &self.inner.instance, self.inner.settings.room_ttl)
            .await
    }

    /// Stop the room pump and leave the room's membership.
    pub(super) async fn release_room(&self, conn_id: &str) {
        let Some((_, stop)) = self.inner.rooms.remove(conn_id) else {
            return;
        };
        let _ = stop.send(());
        if let Err(err) = self.inner.bus.leave(conn_id, &self.inner.instance).await {
            warn!(%conn_id, error = %err, "failed to leave room");
        }
    }

    pub(super) async fn forward(&self, conn_id: &str, owner: &str, from: &ChannelRef, op: Inbound) {
        // Replies come back on the room topic.
        if let Err(err) = self.ensure_room(conn_id).await {
            warn!(%conn_id, error = %err, "failed to join room before forwarding");
        }
        let seq = self.inner.forward_seq.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(%conn_id, %owner, channel = %from, seq, "forwarding request to owner");
        let envelope = BusEnvelope::Inbound {
            owner: owner.to_string(),
            from: from.clone(),
            seq,
            op,
        };
        self.publish(conn_id, &envelope).await;
    }

    pub(super) async fn publish(&self, conn_id: &str, envelope: &BusEnvelope) {
        let payload = match serde_json::to_vec(envelope) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%conn_id, error = %err, "failed to encode bus envelope");
                return;
            }
        };
        if let Err(err) = self.inner.bus.publish(conn_id, Bytes::from(payload)).await {
            warn!(%conn_id, error = %err, "failed to publish to coordination bus");
        }
    }

    async fn on_bus_message(&self, conn_id: &str, payload: &[u8]) -> ControlFlow<()> {
        let envelope: BusEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%conn_id, error = %err, "discarding malformed bus envelope");
                return ControlFlow::Continue(());
            }
        };
        match envelope {
            BusEnvelope::Inbound {
                owner,
                from,
                seq,
                op,
            } => {
                if owner != self.inner.instance {
                    return ControlFlow::Continue(());
                }
                let result = match self.claimed_slot(conn_id) {
                    Some(slot) => self.apply(conn_id, slot, &from, op, Some(seq)).await,
                    None => self.missing(conn_id, &from, &op).await,
                };
                trace!(%conn_id, channel = %from, ?result, "applied forwarded request");
                ControlFlow::Continue(())
            }
            BusEnvelope::Deliver { to, seq, event } => {
                if to.instance == self.inner.instance {
                    self.inner.channels.deliver(&to.channel, seq, event);
                }
                ControlFlow::Continue(())
            }
            BusEnvelope::Closed { owner } => {
                if owner == self.inner.instance {
                    return ControlFlow::Continue(());
                }
                debug!(%conn_id, %owner, "attempt closed by its owner");
                if self.inner.rooms.remove(conn_id).is_some() {
                    if let Err(err) = self.inner.bus.leave(conn_id, &self.inner.instance).await {
                        warn!(%conn_id, error = %err, "failed to leave room");
                    }
                }
                ControlFlow::Break(())
            }
        }
    }
}

async fn room_pump(
    registry: Weak<RegistryInner>,
    conn_id: String,
    mut messages: broadcast::Receiver<BusMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = &mut stop => break,
            received = messages.recv() => received,
        };
        match received {
            Ok(message) => {
                let Some(inner) = registry.upgrade() else {
                    break;
                };
                let live = SessionRegistry { inner };
                if live
                    .on_bus_message(&conn_id, &message.payload)
                    .await
                    .is_break()
                {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%conn_id, skipped, "room pump lagged; messages lost");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    drop(messages);
    if let Some(inner) = registry.upgrade() {
        if let Err(err) = inner.bus.unsubscribe(&conn_id).await {
            debug!(%conn_id, error = %err, "failed to unsubscribe room topic");
        }
    }
    trace!(%conn_id, "room pump stopped");
}
