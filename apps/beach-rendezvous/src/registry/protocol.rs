//! Which request is accepted in which state, and from whom.

use std::time::Duration;

use super::attempt::AttemptState;
use super::error::Rejection;
use super::RegistrySettings;
use crate::signals::{ClientEvent, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Attach(Stage),
    Signature,
    Offer,
    Answer,
    RtcConnected,
    TryTurn,
}

impl From<&ClientEvent> for Step {
    fn from(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::Signature(_) => Step::Signature,
            ClientEvent::OfferSignal(_) => Step::Offer,
            ClientEvent::AnswerSignal(_) => Step::Answer,
            ClientEvent::RtcConnected(_) => Step::RtcConnected,
            ClientEvent::TryTurn(_) => Step::TryTurn,
        }
    }
}

/// State after applying `step` sent by a channel holding `sender` (`None` for
/// channels without a role), or the rejection for it. Never mutates anything.
pub fn transition(
    step: Step,
    state: AttemptState,
    sender: Option<Stage>,
    receiver_attached: bool,
) -> Result<AttemptState, Rejection> {
    use AttemptState::*;

    match step {
        // The initiator slot is filled for the whole life of an attempt.
        Step::Attach(Stage::Initiator) => Err(Rejection::ConfirmationFailedBusy),
        Step::Attach(Stage::Receiver) if receiver_attached => Err(Rejection::ConfirmationFailedBusy),
        Step::Attach(Stage::Receiver) => match state {
            AwaitingReceiver => Ok(ChallengeIssued),
            _ => Err(Rejection::InvalidConnection),
        },
        Step::Signature => match (state, sender) {
            (ChallengeIssued, Some(Stage::Receiver)) => Ok(Confirmed),
            _ => Err(Rejection::InvalidConnection),
        },
        Step::Offer => match (state, sender) {
            (Confirmed, Some(Stage::Initiator)) => Ok(OfferRelayed),
            _ => Err(Rejection::InvalidConnection),
        },
        Step::Answer => match (state, sender) {
            (OfferRelayed, Some(Stage::Receiver)) => Ok(AnswerRelayed),
            _ => Err(Rejection::InvalidConnection),
        },
        Step::RtcConnected => match (state, sender) {
            (OfferRelayed | AnswerRelayed, Some(_)) => Ok(Connected),
            _ => Err(Rejection::InvalidConnection),
        },
        Step::TryTurn => match (state, sender) {
            (Confirmed | OfferRelayed | AnswerRelayed, Some(_)) => Ok(state),
            _ => Err(Rejection::InvalidConnection),
        },
    }
}

/// The participant whose move the attempt is waiting on, if only one can
/// make progress.
pub fn stalled_party(state: AttemptState) -> Option<Stage> {
    match state {
        AttemptState::ChallengeIssued | AttemptState::OfferRelayed => Some(Stage::Receiver),
        AttemptState::Confirmed => Some(Stage::Initiator),
        _ => None,
    }
}

/// How long an attempt may sit in `state` before it is closed.
pub fn window(state: AttemptState, settings: &RegistrySettings) -> Duration {
    match state {
        AttemptState::Connected => settings.grace_period,
        _ => settings.inactivity_timeout,
    }
}
