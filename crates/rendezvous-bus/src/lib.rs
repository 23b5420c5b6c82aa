//! Coordination bus shared by rendezvous server processes.
//!
//! Two concerns live here: topic pub/sub ([`Bus`]) used to carry relay traffic
//! between processes, and room bookkeeping ([`RoomDirectory`]) recording which
//! process owns a connection attempt and which processes host one of its
//! channels. Delivery is at-least-once and eventually consistent; consumers must
//! tolerate duplicates.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

mod local;
mod redis_bus;

pub use local::LocalBus;
pub use redis_bus::RedisBus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Transport(err.to_string())
    }
}

pub type BusResult<T> = Result<T, BusError>;

#[async_trait]
pub trait Bus: Send + Sync {
    /// Start receiving messages published on `topic`. Each call yields an
    /// independent receiver.
    async fn subscribe(&self, topic: &str) -> BusResult<broadcast::Receiver<BusMessage>>;

    /// Drop local fan-out state for `topic` once no receiver is left.
    async fn unsubscribe(&self, topic: &str) -> BusResult<()>;

    /// Publish to every subscriber of `topic`, in every process.
    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Record `instance` as the owner of `room` unless another instance already
    /// owns it. Returns whether the claim succeeded.
    async fn claim_owner(&self, room: &str, instance: &str, ttl: Duration) -> BusResult<bool>;

    async fn owner(&self, room: &str) -> BusResult<Option<String>>;

    /// Remove the ownership record, but only if `instance` still holds it.
    async fn release_owner(&self, room: &str, instance: &str) -> BusResult<()>;

    async fn join(&self, room: &str, instance: &str, ttl: Duration) -> BusResult<()>;

    async fn leave(&self, room: &str, instance: &str) -> BusResult<()>;

    async fn members(&self, room: &str) -> BusResult<Vec<String>>;

    /// Extend the lifetime of the room's ownership and membership records.
    async fn touch(&self, room: &str, ttl: Duration) -> BusResult<()>;
}

/// Everything a rendezvous process needs from its coordination backend.
pub trait Coordination: Bus + RoomDirectory {}

impl<T: Bus + RoomDirectory + ?Sized> Coordination for T {}
