use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::AbortHandle;

use crate::channel::{ChannelId, ChannelRef};
use crate::crypto::keys::CHALLENGE_LEN;
use crate::signals::{EncryptedEnvelope, Stage};

/// Handshake progress. Variants are declared in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    AwaitingReceiver,
    ChallengeIssued,
    Confirmed,
    OfferRelayed,
    AnswerRelayed,
    Connected,
    Closed,
}

/// Outbound numbering for events an attempt emits, plus the highest inbound
/// number applied per forwarding channel.
#[derive(Debug, Default)]
pub struct SequenceGuard {
    next_outbound: u64,
    inbound: HashMap<ChannelId, u64>,
}

impl SequenceGuard {
    pub fn next(&mut self) -> u64 {
        self.next_outbound += 1;
        self.next_outbound
    }

    /// Records `seq` from `channel`; false if it was already applied.
    pub fn accept_inbound(&mut self, channel: ChannelId, seq: u64) -> bool {
        let last = self.inbound.entry(channel).or_insert(0);
        if seq <= *last {
            return false;
        }
        *last = seq;
        true
    }
}

#[derive(Debug)]
pub struct ConnectionAttempt {
    pub conn_id: String,
    pub state: AttemptState,
    pub initiator: Option<ChannelRef>,
    pub receiver: Option<ChannelRef>,
    /// Hex public key the connection id derives from.
    pub initiator_key: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub pending_challenge: Option<[u8; CHALLENGE_LEN]>,
    pub negotiated_version: Option<EncryptedEnvelope>,
    pub sequence: SequenceGuard,
    pub(crate) deadline: Option<AbortHandle>,
    pub(crate) generation: u64,
}

impl ConnectionAttempt {
    pub fn new(conn_id: impl Into<String>, initiator: ChannelRef, initiator_key: String) -> Self {
        let now = Utc::now();
        Self {
            conn_id: conn_id.into(),
            state: AttemptState::AwaitingReceiver,
            initiator: Some(initiator),
            receiver: None,
            initiator_key,
            created_at: now,
            last_activity_at: now,
            pending_challenge: None,
            negotiated_version: None,
            sequence: SequenceGuard::default(),
            deadline: None,
            generation: 0,
        }
    }

    /// Moves forward to `next`. Never moves backward.
    pub fn advance(&mut self, next: AttemptState) {
        if next > self.state {
            self.state = next;
        }
        self.last_activity_at = Utc::now();
    }

    pub fn role_of(&self, channel: &ChannelRef) -> Option<Stage> {
        if self.initiator.as_ref() == Some(channel) {
            Some(Stage::Initiator)
        } else if self.receiver.as_ref() == Some(channel) {
            Some(Stage::Receiver)
        } else {
            None
        }
    }

    pub fn channel_for(&self, stage: Stage) -> Option<&ChannelRef> {
        match stage {
            Stage::Initiator => self.initiator.as_ref(),
            Stage::Receiver => self.receiver.as_ref(),
        }
    }

    pub fn peer_of(&self, stage: Stage) -> Option<&ChannelRef> {
        self.channel_for(stage.opposite())
    }

    pub fn participants(&self) -> impl Iterator<Item = (Stage, &ChannelRef)> {
        self.initiator
            .iter()
            .map(|channel| (Stage::Initiator, channel))
            .chain(self.receiver.iter().map(|channel| (Stage::Receiver, channel)))
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            conn_id: self.conn_id.clone(),
            state: self.state,
            initiator: self.initiator.clone(),
            receiver: self.receiver.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            confirmed: self.negotiated_version.is_some(),
        }
    }
}

/// Read-only view of an attempt for logs, health output and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptSnapshot {
    pub conn_id: String,
    pub state: AttemptState,
    pub initiator: Option<ChannelRef>,
    pub receiver: Option<ChannelRef>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub confirmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(instance: &str) -> ChannelRef {
        ChannelRef {
            instance: instance.into(),
            channel: ChannelId::new(),
        }
    }

    #[test_timeout::timeout]
    fn state_never_moves_backward() {
        let mut attempt = ConnectionAttempt::new("abc", channel("a"), "key".into());
        attempt.advance(AttemptState::Confirmed);
        attempt.advance(AttemptState::ChallengeIssued);
        assert_eq!(attempt.state, AttemptState::Confirmed);
    }

    #[test_timeout::timeout]
    fn roles_resolve_by_channel_identity() {
        let initiator = channel("a");
        let receiver = channel("b");
        let mut attempt = ConnectionAttempt::new("abc", initiator.clone(), "key".into());
        attempt.receiver = Some(receiver.clone());

        assert_eq!(attempt.role_of(&initiator), Some(Stage::Initiator));
        assert_eq!(attempt.role_of(&receiver), Some(Stage::Receiver));
        assert_eq!(attempt.role_of(&channel("a")), None);
        assert_eq!(attempt.peer_of(Stage::Initiator), Some(&receiver));
        assert_eq!(attempt.participants().count(), 2);
    }

    #[test_timeout::timeout]
    fn inbound_sequence_is_tracked_per_channel() {
        let mut guard = SequenceGuard::default();
        let first = ChannelId::new();
        let second = ChannelId::new();
        assert!(guard.accept_inbound(first, 3));
        assert!(!guard.accept_inbound(first, 3));
        assert!(!guard.accept_inbound(first, 2));
        assert!(guard.accept_inbound(second, 1));
        assert_eq!(guard.next(), 1);
        assert_eq!(guard.next(), 2);
    }
}
