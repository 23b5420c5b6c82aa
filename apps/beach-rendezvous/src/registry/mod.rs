//! The table of live connection attempts and the per-attempt state machine.
//!
//! Each attempt sits behind its own async mutex, so requests for one `connId`
//! are applied one at a time while different attempts proceed in parallel.
//! The process that accepted the initiator owns the attempt; channels hosted
//! elsewhere reach it through the coordination bus (see [`coordination`]).

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rendezvous_bus::Coordination;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::channel::{ChannelId, ChannelRef, ChannelTable};
use crate::crypto::{
    derive_conn_id, generate_challenge, is_valid_conn_id, parse_public_key, CryptoVerifier,
};
use crate::metrics;
use crate::signals::{
    AnswerPayload, ClientEvent, ConnIdPayload, ConnectQuery, DisconnectCause, OfferPayload,
    ServerEvent, SignaturePayload, Stage,
};
use crate::turn::TurnIssuer;

mod attempt;
mod coordination;
mod error;
mod protocol;

pub use attempt::{AttemptSnapshot, AttemptState, ConnectionAttempt, SequenceGuard};
pub use coordination::{BusEnvelope, Inbound};
pub use error::{Outcome, Rejection};
pub use protocol::Step;

type Slot = Arc<Mutex<Option<ConnectionAttempt>>>;

const SIGNATURE_HEX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Longest an attempt may wait for its next step.
    pub inactivity_timeout: Duration,
    /// How long a connected attempt is kept before it is closed as completed.
    pub grace_period: Duration,
    /// Lifetime of bus ownership and membership records, refreshed on activity.
    pub room_ttl: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(10),
            room_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    instance: String,
    attempts: DashMap<String, Slot>,
    /// Initiators whose ownership claim is still in flight. Only `create`
    /// and owner-local routing look here.
    pending: DashMap<String, Slot>,
    channels: ChannelTable,
    bus: Arc<dyn Coordination>,
    verifier: Arc<dyn CryptoVerifier>,
    turn: TurnIssuer,
    settings: RegistrySettings,
    /// Stop signals for the bus pumps of rooms this process takes part in.
    rooms: DashMap<String, oneshot::Sender<()>>,
    forward_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        instance: impl Into<String>,
        bus: Arc<dyn Coordination>,
        verifier: Arc<dyn CryptoVerifier>,
        turn: TurnIssuer,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                instance: instance.into(),
                attempts: DashMap::new(),
                pending: DashMap::new(),
                channels: ChannelTable::new(),
                bus,
                verifier,
                turn,
                settings,
                rooms: DashMap::new(),
                forward_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn instance(&self) -> &str {
        &self.inner.instance
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    /// Attempts owned by this process.
    pub fn active_attempts(&self) -> usize {
        self.inner.attempts.len()
    }

    /// Channels hosted by this process.
    pub fn open_channels(&self) -> usize {
        self.inner.channels.len()
    }

    pub async fn snapshot(&self, conn_id: &str) -> Option<AttemptSnapshot> {
        let slot = self.slot(conn_id)?;
        let guard = slot.lock().await;
        guard.as_ref().map(ConnectionAttempt::snapshot)
    }

    /// Register a transport channel bound to `conn_id`. Everything the server
    /// sends to it arrives on the returned receiver.
    pub fn open_channel(
        &self,
        conn_id: &str,
    ) -> (ChannelRef, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ChannelId::new();
        self.inner.channels.register(id, conn_id, tx);
        let channel = ChannelRef {
            instance: self.inner.instance.clone(),
            channel: id,
        };
        debug!(%conn_id, channel = %channel, "channel opened");
        (channel, rx)
    }

    /// The transport reported the channel gone. A participant leaving tears
    /// the attempt down.
    pub async fn close_channel(&self, channel: &ChannelRef) {
        let Some(conn_id) = self.inner.channels.remove(&channel.channel) else {
            return;
        };
        debug!(%conn_id, channel = %channel, "channel closed");
        if !is_valid_conn_id(&conn_id) {
            return;
        }
        let routed = matches!(
            self.route(&conn_id, channel, Inbound::Detach).await,
            Ok(Outcome::Routed)
        );
        if routed && self.inner.channels.count_for(&conn_id) == 0 {
            self.release_room(&conn_id).await;
        }
    }

    /// Handle the `connect` of a freshly opened channel.
    pub async fn attach(
        &self,
        from: &ChannelRef,
        query: &ConnectQuery,
    ) -> Result<Outcome, Rejection> {
        let conn_id = query.conn_id.as_deref().unwrap_or_default();
        let stage = query.stage.as_deref().map(str::parse::<Stage>);
        let (Some(Ok(stage)), true) = (stage, is_valid_conn_id(conn_id)) else {
            return self.reject(conn_id, from, Rejection::InvalidConnection).await;
        };
        match stage {
            Stage::Initiator => self.create(from, conn_id, query).await,
            Stage::Receiver => self.route(conn_id, from, Inbound::Attach { stage }).await,
        }
    }

    /// Apply a client event sent on `from`. The event must name the
    /// connection the channel was opened for.
    pub async fn handle_event(
        &self,
        from: &ChannelRef,
        event: ClientEvent,
    ) -> Result<Outcome, Rejection> {
        let Some(conn_id) = self.inner.channels.conn_id_of(&from.channel) else {
            return Ok(Outcome::Ignored);
        };
        if event.conn_id() != conn_id || !is_valid_conn_id(&conn_id) {
            return self.reject(&conn_id, from, Rejection::InvalidConnection).await;
        }
        self.route(&conn_id, from, Inbound::Client { event }).await
    }

    /// A frame on `channel` was not a client event.
    pub fn reject_frame(&self, channel: &ChannelRef) {
        metrics::rejection(Rejection::InvalidConnection);
        self.inner
            .channels
            .deliver(&channel.channel, None, ServerEvent::InvalidConnection);
    }

    pub async fn submit_signature(
        &self,
        from: &ChannelRef,
        payload: SignaturePayload,
    ) -> Result<Outcome, Rejection> {
        self.handle_event(from, ClientEvent::Signature(payload)).await
    }

    pub async fn relay_offer(
        &self,
        from: &ChannelRef,
        payload: OfferPayload,
    ) -> Result<Outcome, Rejection> {
        self.handle_event(from, ClientEvent::OfferSignal(payload)).await
    }

    pub async fn relay_answer(
        &self,
        from: &ChannelRef,
        payload: AnswerPayload,
    ) -> Result<Outcome, Rejection> {
        self.handle_event(from, ClientEvent::AnswerSignal(payload)).await
    }

    pub async fn report_connected(&self, from: &ChannelRef) -> Result<Outcome, Rejection> {
        let conn_id = self.inner.channels.conn_id_of(&from.channel).unwrap_or_default();
        self.handle_event(from, ClientEvent::RtcConnected(ConnIdPayload { conn_id }))
            .await
    }

    pub async fn request_turn(&self, from: &ChannelRef) -> Result<Outcome, Rejection> {
        let conn_id = self.inner.channels.conn_id_of(&from.channel).unwrap_or_default();
        self.handle_event(from, ClientEvent::TryTurn(ConnIdPayload { conn_id }))
            .await
    }

    /// Close an attempt owned by this process, notifying every participant
    /// with `cause`. Returns false if there was nothing to close here.
    pub async fn teardown(&self, conn_id: &str, cause: DisconnectCause) -> bool {
        let Some(slot) = self.slot(conn_id) else {
            return false;
        };
        let mut guard = slot.lock().await;
        if guard.is_none() {
            return false;
        }
        self.close(conn_id, &slot, &mut guard, cause, None).await;
        true
    }

    /// Close every attempt with `serverShutdown` and leave all rooms.
    pub async fn shutdown(&self) {
        let conn_ids: Vec<String> = self
            .inner
            .attempts
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        info!(attempts = conn_ids.len(), "closing attempts for shutdown");
        for conn_id in conn_ids {
            self.teardown(&conn_id, DisconnectCause::ServerShutdown).await;
        }
        let rooms: Vec<String> = self
            .inner
            .rooms
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for room in rooms {
            self.release_room(&room).await;
        }
    }

    fn slot(&self, conn_id: &str) -> Option<Slot> {
        self.inner
            .attempts
            .get(conn_id)
            .map(|entry| entry.value().clone())
    }

    fn forget(&self, conn_id: &str, slot: &Slot) {
        self.inner
            .attempts
            .remove_if(conn_id, |_, existing| Arc::ptr_eq(existing, slot));
    }

    /// The attempt this process owns, including one whose initiator is still
    /// being set up after a successful claim.
    fn claimed_slot(&self, conn_id: &str) -> Option<Slot> {
        self.slot(conn_id).or_else(|| {
            self.inner
                .pending
                .get(conn_id)
                .map(|entry| entry.value().clone())
        })
    }

    fn unreserve(&self, conn_id: &str, slot: &Slot) {
        self.inner
            .pending
            .remove_if(conn_id, |_, existing| Arc::ptr_eq(existing, slot));
    }

    /// Apply locally when this process owns the attempt, otherwise hand the
    /// request to the owner.
    async fn route(
        &self,
        conn_id: &str,
        from: &ChannelRef,
        op: Inbound,
    ) -> Result<Outcome, Rejection> {
        if let Some(slot) = self.slot(conn_id) {
            return self.apply(conn_id, slot, from, op, None).await;
        }
        match self.inner.bus.owner(conn_id).await {
            Ok(Some(owner)) if owner != self.inner.instance => {
                self.forward(conn_id, &owner, from, op).await;
                Ok(Outcome::Routed)
            }
            Ok(Some(_)) => match self.claimed_slot(conn_id) {
                Some(slot) => self.apply(conn_id, slot, from, op, None).await,
                None => self.missing(conn_id, from, &op).await,
            },
            Ok(None) => self.missing(conn_id, from, &op).await,
            Err(err) => {
                warn!(%conn_id, error = %err, "owner lookup failed");
                self.missing(conn_id, from, &op).await
            }
        }
    }

    async fn missing(
        &self,
        conn_id: &str,
        from: &ChannelRef,
        op: &Inbound,
    ) -> Result<Outcome, Rejection> {
        if matches!(op, Inbound::Detach) {
            return Ok(Outcome::Ignored);
        }
        self.reject(conn_id, from, Rejection::InvalidConnection).await
    }

    async fn reject(
        &self,
        conn_id: &str,
        to: &ChannelRef,
        rejection: Rejection,
    ) -> Result<Outcome, Rejection> {
        self.notify_rejection(conn_id, to, rejection).await;
        Err(rejection)
    }

    async fn notify_rejection(&self, conn_id: &str, to: &ChannelRef, rejection: Rejection) {
        debug!(%conn_id, channel = %to, reason = rejection.as_str(), "request rejected");
        metrics::rejection(rejection);
        self.dispatch(conn_id, to, None, rejection.signal()).await;
    }

    async fn create(
        &self,
        from: &ChannelRef,
        conn_id: &str,
        query: &ConnectQuery,
    ) -> Result<Outcome, Rejection> {
        let (Some(key), Some(message), Some(signed)) = (
            query.key.as_deref(),
            query.message.as_deref(),
            query.signed.as_deref(),
        ) else {
            return self.reject(conn_id, from, Rejection::InvalidConnection).await;
        };
        let public_key = match parse_public_key(key) {
            Ok(public_key) if is_signature_shape(signed) => public_key,
            _ => return self.reject(conn_id, from, Rejection::InvalidConnection).await,
        };
        if derive_conn_id(&public_key) != conn_id
            || !self
                .inner
                .verifier
                .verify_signature(message.as_bytes(), signed, key)
                .await
        {
            return self.reject(conn_id, from, Rejection::ConfirmationFailed).await;
        }

        // Reserved before the claim so local initiators race here, not on
        // the bus. Routing only sees the slot once the claim succeeded.
        let slot: Slot = Arc::new(Mutex::new(None));
        let mut guard = slot.lock().await;
        let reserved = match self.inner.pending.entry(conn_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(slot.clone());
                true
            }
        };
        if !reserved || self.inner.attempts.contains_key(conn_id) {
            if reserved {
                self.unreserve(conn_id, &slot);
            }
            drop(guard);
            return self
                .reject(conn_id, from, Rejection::ConfirmationFailedBusy)
                .await;
        }

        let claim = self
            .inner
            .bus
            .claim_owner(conn_id, &self.inner.instance, self.inner.settings.room_ttl)
            .await;
        let rejection = match claim {
            Ok(true) => None,
            Ok(false) => Some(Rejection::ConfirmationFailedBusy),
            Err(err) => {
                warn!(%conn_id, error = %err, "failed to claim room ownership");
                Some(Rejection::InvalidConnection)
            }
        };
        if let Some(rejection) = rejection {
            self.unreserve(conn_id, &slot);
            drop(guard);
            return self.reject(conn_id, from, rejection).await;
        }

        if let Err(err) = self.ensure_room(conn_id).await {
            warn!(%conn_id, error = %err, "failed to join room on coordination bus");
        }

        let mut attempt = ConnectionAttempt::new(conn_id, from.clone(), key.to_string());
        let seq = attempt.sequence.next();
        self.dispatch(
            conn_id,
            from,
            Some(seq),
            ServerEvent::Initiated {
                conn_id: conn_id.to_string(),
            },
        )
        .await;
        self.arm_deadline(&slot, &mut attempt);
        *guard = Some(attempt);
        self.inner.attempts.insert(conn_id.to_string(), slot.clone());
        self.unreserve(conn_id, &slot);
        drop(guard);

        metrics::attempt("created");
        metrics::active_attempts(self.inner.attempts.len());
        info!(%conn_id, channel = %from, instance = %self.inner.instance, "connection attempt registered");
        Ok(Outcome::Registered)
    }

    /// Run one request against the attempt in `slot`. `forwarded` carries the
    /// bus sequence number when the request came from another process.
    async fn apply(
        &self,
        conn_id: &str,
        slot: Slot,
        from: &ChannelRef,
        op: Inbound,
        forwarded: Option<u64>,
    ) -> Result<Outcome, Rejection> {
        let mut guard = slot.lock().await;
        let Some(attempt) = guard.as_mut() else {
            return self.missing(conn_id, from, &op).await;
        };
        if let Some(seq) = forwarded {
            if !attempt.sequence.accept_inbound(from.channel, seq) {
                debug!(%conn_id, channel = %from, seq, "duplicate bus request ignored");
                metrics::bus_duplicate();
                return Ok(Outcome::Duplicate);
            }
        }

        let result = match op {
            Inbound::Attach { stage } => self.attach_peer(&slot, attempt, from, stage).await,
            Inbound::Client { event } => self.step(&slot, attempt, from, event).await,
            Inbound::Detach => {
                if attempt.role_of(from).is_none() {
                    return Ok(Outcome::Ignored);
                }
                self.close(
                    conn_id,
                    &slot,
                    &mut guard,
                    DisconnectCause::PeerDisconnected,
                    Some(from),
                )
                .await;
                return Ok(Outcome::Detached);
            }
        };

        if let Err(rejection) = result {
            self.notify_rejection(conn_id, from, rejection).await;
            if rejection.is_terminal() {
                self.close(
                    conn_id,
                    &slot,
                    &mut guard,
                    DisconnectCause::ConfirmationFailed,
                    Some(from),
                )
                .await;
            }
        }
        result
    }

    async fn attach_peer(
        &self,
        slot: &Slot,
        attempt: &mut ConnectionAttempt,
        from: &ChannelRef,
        stage: Stage,
    ) -> Result<Outcome, Rejection> {
        let next = protocol::transition(
            Step::Attach(stage),
            attempt.state,
            attempt.role_of(from),
            attempt.receiver.is_some(),
        )?;
        let challenge = generate_challenge();
        attempt.receiver = Some(from.clone());
        attempt.pending_challenge = Some(challenge);
        attempt.advance(next);
        self.send_to(
            attempt,
            Stage::Receiver,
            ServerEvent::Handshake {
                to_sign: hex::encode(challenge),
            },
        )
        .await;
        self.progressed(slot, attempt).await;
        info!(conn_id = %attempt.conn_id, channel = %from, "receiver attached; challenge issued");
        Ok(Outcome::Registered)
    }

    async fn step(
        &self,
        slot: &Slot,
        attempt: &mut ConnectionAttempt,
        from: &ChannelRef,
        event: ClientEvent,
    ) -> Result<Outcome, Rejection> {
        let sender = attempt.role_of(from);
        let next = protocol::transition(
            Step::from(&event),
            attempt.state,
            sender,
            attempt.receiver.is_some(),
        )?;
        let conn_id = attempt.conn_id.clone();

        let outcome = match event {
            ClientEvent::Signature(payload) => {
                if !payload.version.is_well_formed() {
                    return Err(Rejection::InvalidConnection);
                }
                let Some(challenge) = attempt.pending_challenge else {
                    return Err(Rejection::InvalidConnection);
                };
                let verified = self
                    .inner
                    .verifier
                    .verify_signature(&challenge, &payload.signed, &attempt.initiator_key)
                    .await;
                if !verified {
                    info!(%conn_id, channel = %from, "receiver signature rejected");
                    return Err(Rejection::ConfirmationFailed);
                }
                attempt.pending_challenge = None;
                attempt.negotiated_version = Some(payload.version.clone());
                attempt.advance(next);
                self.send_to(
                    attempt,
                    Stage::Initiator,
                    ServerEvent::Confirmation {
                        conn_id,
                        version: payload.version,
                    },
                )
                .await;
                metrics::attempt("confirmed");
                metrics::relayed("confirmation");
                Outcome::Confirmed
            }
            ClientEvent::OfferSignal(payload) => {
                if !payload.data.is_well_formed() {
                    return Err(Rejection::InvalidConnection);
                }
                if let Some(options) = &payload.options {
                    debug!(%conn_id, %options, "offer options");
                }
                attempt.advance(next);
                self.send_to(attempt, Stage::Receiver, ServerEvent::Offer { data: payload.data })
                    .await;
                metrics::relayed("offer");
                Outcome::Forwarded
            }
            ClientEvent::AnswerSignal(payload) => {
                if !payload.data.is_well_formed() {
                    return Err(Rejection::InvalidConnection);
                }
                attempt.advance(next);
                self.send_to(attempt, Stage::Initiator, ServerEvent::Answer { data: payload.data })
                    .await;
                metrics::relayed("answer");
                Outcome::Forwarded
            }
            ClientEvent::RtcConnected(_) => {
                attempt.advance(next);
                for stage in [Stage::Initiator, Stage::Receiver] {
                    self.send_to(
                        attempt,
                        stage,
                        ServerEvent::RtcConnected {
                            conn_id: conn_id.clone(),
                        },
                    )
                    .await;
                }
                metrics::attempt("connected");
                info!(%conn_id, "peers report a direct connection");
                Outcome::Connected
            }
            ClientEvent::TryTurn(_) => {
                let Some(requester) = sender else {
                    return Err(Rejection::InvalidConnection);
                };
                attempt.advance(next);
                self.send_to(
                    attempt,
                    requester.opposite(),
                    ServerEvent::AttemptingTurn {
                        conn_id: conn_id.clone(),
                    },
                )
                .await;
                let servers = self.inner.turn.ice_servers(&conn_id);
                self.send_to(attempt, requester, ServerEvent::TurnToken { data: servers })
                    .await;
                debug!(%conn_id, stage = %requester, "turn credentials issued");
                Outcome::TurnIssued
            }
        };

        self.progressed(slot, attempt).await;
        Ok(outcome)
    }

    /// Restart the attempt's window and keep its bus records alive.
    async fn progressed(&self, slot: &Slot, attempt: &mut ConnectionAttempt) {
        self.arm_deadline(slot, attempt);
        if let Err(err) = self
            .inner
            .bus
            .touch(&attempt.conn_id, self.inner.settings.room_ttl)
            .await
        {
            debug!(conn_id = %attempt.conn_id, error = %err, "failed to refresh room ttl");
        }
    }

    async fn send_to(&self, attempt: &mut ConnectionAttempt, stage: Stage, event: ServerEvent) {
        let Some(to) = attempt.channel_for(stage).cloned() else {
            return;
        };
        let seq = attempt.sequence.next();
        self.dispatch(&attempt.conn_id, &to, Some(seq), event).await;
    }

    /// Deliver to a channel on this process, or publish for its host.
    async fn dispatch(&self, conn_id: &str, to: &ChannelRef, seq: Option<u64>, event: ServerEvent) {
        if to.instance == self.inner.instance {
            self.inner.channels.deliver(&to.channel, seq, event);
            return;
        }
        let envelope = BusEnvelope::Deliver {
            to: to.clone(),
            seq,
            event,
        };
        self.publish(conn_id, &envelope).await;
    }

    fn arm_deadline(&self, slot: &Slot, attempt: &mut ConnectionAttempt) {
        if let Some(previous) = attempt.deadline.take() {
            previous.abort();
        }
        attempt.generation += 1;
        let generation = attempt.generation;
        let window = protocol::window(attempt.state, &self.inner.settings);
        let registry = Arc::downgrade(&self.inner);
        let slot = Arc::downgrade(slot);
        let conn_id = attempt.conn_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let (Some(inner), Some(slot)) = (registry.upgrade(), slot.upgrade()) else {
                return;
            };
            SessionRegistry { inner }
                .expire(&conn_id, slot, generation)
                .await;
        });
        attempt.deadline = Some(timer.abort_handle());
    }

    async fn expire(&self, conn_id: &str, slot: Slot, generation: u64) {
        let mut guard = slot.lock().await;
        let cause = match guard.as_mut() {
            Some(attempt) if attempt.generation == generation => {
                // This task; closing must not abort it.
                attempt.deadline = None;
                if attempt.state == AttemptState::Connected {
                    DisconnectCause::Completed
                } else {
                    DisconnectCause::SocketTimeout
                }
            }
            _ => return,
        };
        self.close(conn_id, &slot, &mut guard, cause, None).await;
    }

    /// Tear the attempt down and tell every participant except `spare` why.
    async fn close(
        &self,
        conn_id: &str,
        slot: &Slot,
        entry: &mut Option<ConnectionAttempt>,
        cause: DisconnectCause,
        spare: Option<&ChannelRef>,
    ) {
        let Some(mut attempt) = entry.take() else {
            return;
        };
        if let Some(deadline) = attempt.deadline.take() {
            deadline.abort();
        }
        let previous = attempt.state;
        let stalled = match cause {
            DisconnectCause::SocketTimeout => protocol::stalled_party(previous),
            _ => None,
        };
        attempt.state = AttemptState::Closed;

        let targets: Vec<(Stage, ChannelRef)> = attempt
            .participants()
            .filter(|(_, channel)| Some(*channel) != spare)
            .map(|(stage, channel)| (stage, channel.clone()))
            .collect();
        for (stage, channel) in targets {
            let event = if Some(stage) == stalled {
                ServerEvent::SocketTimeout
            } else {
                ServerEvent::Disconnect { cause }
            };
            let seq = attempt.sequence.next();
            self.dispatch(conn_id, &channel, Some(seq), event).await;
        }

        self.forget(conn_id, slot);
        self.publish(
            conn_id,
            &BusEnvelope::Closed {
                owner: self.inner.instance.clone(),
            },
        )
        .await;
        self.release_room(conn_id).await;
        if let Err(err) = self
            .inner
            .bus
            .release_owner(conn_id, &self.inner.instance)
            .await
        {
            warn!(%conn_id, error = %err, "failed to release room ownership");
        }

        metrics::teardown(cause);
        metrics::active_attempts(self.inner.attempts.len());
        info!(
            %conn_id,
            cause = cause.as_str(),
            state = ?previous,
            "connection attempt closed"
        );
    }
}

fn is_signature_shape(value: &str) -> bool {
    value.len() == SIGNATURE_HEX_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}
