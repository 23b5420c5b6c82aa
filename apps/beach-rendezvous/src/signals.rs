//! Wire vocabulary exchanged with clients over the channel transport.
//!
//! Frames are JSON objects of the form `{"event": <name>, "data": <payload>}`.
//! Event names are fixed by existing clients and must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::turn::IceServer;

/// Role a channel declares when it connects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initiator,
    Receiver,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initiator => "initiator",
            Stage::Receiver => "receiver",
        }
    }

    pub fn opposite(self) -> Stage {
        match self {
            Stage::Initiator => Stage::Receiver,
            Stage::Receiver => Stage::Initiator,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "initiator" => Ok(Stage::Initiator),
            "receiver" => Ok(Stage::Receiver),
            _ => Err(()),
        }
    }
}

/// Query parameters of the transport upgrade request (the `connect` signal).
///
/// Everything is optional at the parsing layer so a malformed request can be
/// answered with `InvalidConnection` on the socket instead of an HTTP error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub conn_id: Option<String>,
    #[serde(default)]
    pub signed: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

impl ConnectQuery {
    /// Build from raw query pairs. The first occurrence of a parameter wins
    /// and unknown parameters are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = Self::default();
        for (name, value) in pairs {
            let field = match name.as_ref() {
                "stage" => &mut query.stage,
                "connId" => &mut query.conn_id,
                "signed" => &mut query.signed,
                "message" => &mut query.message,
                "key" => &mut query.key,
                _ => continue,
            };
            if field.is_none() {
                *field = Some(value.into());
            }
        }
        query
    }
}

/// Authenticated-encryption envelope addressed to the pairing key.
///
/// Opaque to the server beyond a shape check; every field is hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub ephem_public_key: String,
    pub iv: String,
    pub mac: String,
}

impl EncryptedEnvelope {
    pub fn is_well_formed(&self) -> bool {
        [&self.ciphertext, &self.ephem_public_key, &self.iv, &self.mac]
            .iter()
            .all(|field| is_hex(field))
    }
}

fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.len() % 2 == 0 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePayload {
    pub signed: String,
    pub conn_id: String,
    pub version: EncryptedEnvelope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub data: EncryptedEnvelope,
    pub conn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub data: EncryptedEnvelope,
    pub conn_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnIdPayload {
    pub conn_id: String,
}

/// Events a client may send after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "signature")]
    Signature(SignaturePayload),
    #[serde(rename = "offerSignal")]
    OfferSignal(OfferPayload),
    #[serde(rename = "answerSignal")]
    AnswerSignal(AnswerPayload),
    #[serde(rename = "rtcConnected")]
    RtcConnected(ConnIdPayload),
    #[serde(rename = "tryTurn")]
    TryTurn(ConnIdPayload),
}

impl ClientEvent {
    pub fn conn_id(&self) -> &str {
        match self {
            ClientEvent::Signature(payload) => &payload.conn_id,
            ClientEvent::OfferSignal(payload) => &payload.conn_id,
            ClientEvent::AnswerSignal(payload) => &payload.conn_id,
            ClientEvent::RtcConnected(payload) | ClientEvent::TryTurn(payload) => {
                &payload.conn_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Signature(_) => "signature",
            ClientEvent::OfferSignal(_) => "offerSignal",
            ClientEvent::AnswerSignal(_) => "answerSignal",
            ClientEvent::RtcConnected(_) => "rtcConnected",
            ClientEvent::TryTurn(_) => "tryTurn",
        }
    }
}

/// Why an attempt ended, as reported in `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectCause {
    PeerDisconnected,
    SocketTimeout,
    ConfirmationFailed,
    Completed,
    ServerShutdown,
}

impl DisconnectCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectCause::PeerDisconnected => "peerDisconnected",
            DisconnectCause::SocketTimeout => "socketTimeout",
            DisconnectCause::ConfirmationFailed => "confirmationFailed",
            DisconnectCause::Completed => "completed",
            DisconnectCause::ServerShutdown => "serverShutdown",
        }
    }
}

/// Events the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "initiated")]
    Initiated {
        #[serde(rename = "connId")]
        conn_id: String,
    },
    #[serde(rename = "handshake")]
    Handshake {
        #[serde(rename = "toSign")]
        to_sign: String,
    },
    #[serde(rename = "confirmation")]
    Confirmation {
        #[serde(rename = "connId")]
        conn_id: String,
        version: EncryptedEnvelope,
    },
    #[serde(rename = "offer")]
    Offer { data: EncryptedEnvelope },
    #[serde(rename = "answer")]
    Answer { data: EncryptedEnvelope },
    #[serde(rename = "rtcConnected")]
    RtcConnected {
        #[serde(rename = "connId")]
        conn_id: String,
    },
    #[serde(rename = "attemptingTurn")]
    AttemptingTurn {
        #[serde(rename = "connId")]
        conn_id: String,
    },
    #[serde(rename = "turnToken")]
    TurnToken { data: Vec<IceServer> },
    #[serde(rename = "disconnect")]
    Disconnect { cause: DisconnectCause },
    #[serde(rename = "socketTimeout")]
    SocketTimeout,
    #[serde(rename = "InvalidConnection")]
    InvalidConnection,
    #[serde(rename = "confirmationFailedBusy")]
    ConfirmationFailedBusy,
    #[serde(rename = "confirmationFailed")]
    ConfirmationFailed,
}

impl ServerEvent {
    /// Whether the server is done with the channel once this is sent.
    pub fn ends_channel(&self) -> bool {
        matches!(
            self,
            ServerEvent::Disconnect { .. }
                | ServerEvent::SocketTimeout
                | ServerEvent::ConfirmationFailedBusy
                | ServerEvent::ConfirmationFailed
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Initiated { .. } => "initiated",
            ServerEvent::Handshake { .. } => "handshake",
            ServerEvent::Confirmation { .. } => "confirmation",
            ServerEvent::Offer { .. } => "offer",
            ServerEvent::Answer { .. } => "answer",
            ServerEvent::RtcConnected { .. } => "rtcConnected",
            ServerEvent::AttemptingTurn { .. } => "attemptingTurn",
            ServerEvent::TurnToken { .. } => "turnToken",
            ServerEvent::Disconnect { .. } => "disconnect",
            ServerEvent::SocketTimeout => "socketTimeout",
            ServerEvent::InvalidConnection => "InvalidConnection",
            ServerEvent::ConfirmationFailedBusy => "confirmationFailedBusy",
            ServerEvent::ConfirmationFailed => "confirmationFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: "deadbeef".into(),
            ephem_public_key: "aa".repeat(32),
            iv: "00".repeat(12),
            mac: "11".repeat(16),
        }
    }

    #[test_timeout::timeout]
    fn parses_signature_frame_from_client() {
        let frame = json!({
            "event": "signature",
            "data": {
                "signed": "abcd",
                "connId": "0123",
                "version": {
                    "ciphertext": "deadbeef",
                    "ephemPublicKey": "aa".repeat(32),
                    "iv": "00".repeat(12),
                    "mac": "11".repeat(16),
                }
            }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert_eq!(event.name(), "signature");
        assert_eq!(event.conn_id(), "0123");
        match event {
            ClientEvent::Signature(payload) => assert_eq!(payload.version, envelope()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test_timeout::timeout]
    fn offer_options_are_optional() {
        let frame = json!({
            "event": "offerSignal",
            "data": { "data": envelope(), "connId": "0123" }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        assert!(matches!(event, ClientEvent::OfferSignal(OfferPayload { options: None, .. })));
    }

    #[test_timeout::timeout]
    fn error_signals_carry_no_payload() {
        let value = serde_json::to_value(ServerEvent::InvalidConnection).unwrap();
        assert_eq!(value, json!({ "event": "InvalidConnection" }));
        let value = serde_json::to_value(ServerEvent::ConfirmationFailedBusy).unwrap();
        assert_eq!(value, json!({ "event": "confirmationFailedBusy" }));
    }

    #[test_timeout::timeout]
    fn server_payload_fields_are_camel_case() {
        let value = serde_json::to_value(ServerEvent::Handshake {
            to_sign: "cafe".into(),
        })
        .unwrap();
        assert_eq!(value, json!({ "event": "handshake", "data": { "toSign": "cafe" } }));

        let value = serde_json::to_value(ServerEvent::Disconnect {
            cause: DisconnectCause::SocketTimeout,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "event": "disconnect", "data": { "cause": "socketTimeout" } })
        );
    }

    #[test_timeout::timeout]
    fn envelope_shape_check_requires_hex_fields() {
        assert!(envelope().is_well_formed());
        let mut missing_mac = envelope();
        missing_mac.mac.clear();
        assert!(!missing_mac.is_well_formed());
        let mut not_hex = envelope();
        not_hex.iv = "zz".into();
        assert!(!not_hex.is_well_formed());
    }

    #[test_timeout::timeout]
    fn connect_query_reads_camel_case_params() {
        let query: ConnectQuery =
            serde_json::from_value(json!({ "stage": "receiver", "connId": "0123" })).unwrap();
        assert_eq!(query.stage.as_deref(), Some("receiver"));
        assert_eq!(query.conn_id.as_deref(), Some("0123"));
        assert_eq!("receiver".parse::<Stage>(), Ok(Stage::Receiver));
        assert!("observer".parse::<Stage>().is_err());
    }

    #[test_timeout::timeout]
    fn repeated_query_params_keep_the_first_value() {
        let query = ConnectQuery::from_pairs([
            ("connId", "first"),
            ("stage", "receiver"),
            ("connId", "second"),
            ("utm_source", "ignored"),
        ]);
        assert_eq!(query.conn_id.as_deref(), Some("first"));
        assert_eq!(query.stage.as_deref(), Some("receiver"));
        assert!(query.key.is_none());
    }
}
