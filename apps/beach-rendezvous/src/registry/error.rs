use thiserror::Error;

use crate::signals::ServerEvent;

/// Why the registry refused a client request. Each maps to one error signal
/// sent back to the client that made the request.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("unknown connection, unexpected event or malformed proof")]
    InvalidConnection,
    #[error("role already taken for this connection")]
    ConfirmationFailedBusy,
    #[error("proof failed verification")]
    ConfirmationFailed,
}

impl Rejection {
    pub fn signal(self) -> ServerEvent {
        match self {
            Rejection::InvalidConnection => ServerEvent::InvalidConnection,
            Rejection::ConfirmationFailedBusy => ServerEvent::ConfirmationFailedBusy,
            Rejection::ConfirmationFailed => ServerEvent::ConfirmationFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::InvalidConnection => "invalid_connection",
            Rejection::ConfirmationFailedBusy => "busy",
            Rejection::ConfirmationFailed => "confirmation_failed",
        }
    }

    /// Whether the attempt must be torn down after this rejection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Rejection::ConfirmationFailed)
    }
}

/// What an accepted request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A channel took a role in an attempt.
    Registered,
    Confirmed,
    /// An opaque payload went to the peer.
    Forwarded,
    Connected,
    TurnIssued,
    /// A participant left and the attempt was torn down.
    Detached,
    /// Sent to the owning process; any reply arrives on the channel.
    Routed,
    /// Redelivered bus message, already applied.
    Duplicate,
    /// Nothing to do, e.g. a non-participant channel closing.
    Ignored,
}
