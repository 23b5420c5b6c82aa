use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::envelope;
use super::CryptoError;
use crate::signals::EncryptedEnvelope;

pub const CONN_ID_LEN: usize = 32;
pub const CHALLENGE_LEN: usize = 32;

/// `connId` for a public key: the first 32 hex chars of its SHA-256 digest.
pub fn derive_conn_id(public_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(public_key.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(CONN_ID_LEN);
    id
}

pub fn is_valid_conn_id(value: &str) -> bool {
    value.len() == CONN_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Fresh random challenge for a receiver to sign. Sent hex encoded as
/// `toSign`; the signature covers the raw bytes.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut bytes = [0u8; CHALLENGE_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes: [u8; 32] = decode_fixed(public_key_hex).ok_or(CryptoError::MalformedKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| CryptoError::MalformedKey)
}

pub(crate) fn decode_fixed<const N: usize>(value: &str) -> Option<[u8; N]> {
    hex::decode(value).ok()?.try_into().ok()
}

/// Pairing keypair held by both clients of an attempt.
///
/// The initiator generates it and hands the secret to the receiver out of
/// band; the server only ever sees the public half.
#[derive(Clone)]
pub struct ConnectionKeys {
    signing: SigningKey,
}

impl ConnectionKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = decode_fixed(secret_hex).ok_or(CryptoError::MalformedKey)?;
        Ok(Self {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    pub fn conn_id(&self) -> String {
        derive_conn_id(&self.signing.verifying_key())
    }

    /// Hex signature over `message`.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }

    /// Encrypt `plaintext` to the pairing key.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
        envelope::seal(&self.signing.verifying_key(), plaintext)
    }

    pub fn open(&self, sealed: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
        envelope::open(&self.signing, sealed)
    }
}

impl std::fmt::Debug for ConnectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionKeys")
            .field("conn_id", &self.conn_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn conn_id_is_stable_and_well_formed() {
        let keys = ConnectionKeys::generate();
        let restored = ConnectionKeys::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(keys.conn_id(), restored.conn_id());
        assert!(is_valid_conn_id(&keys.conn_id()));

        let public = parse_public_key(&keys.public_hex()).unwrap();
        assert_eq!(derive_conn_id(&public), keys.conn_id());
    }

    #[test_timeout::timeout]
    fn conn_id_shape_is_strict() {
        assert!(!is_valid_conn_id(""));
        assert!(!is_valid_conn_id(&"A".repeat(CONN_ID_LEN)));
        assert!(!is_valid_conn_id(&"a".repeat(CONN_ID_LEN + 1)));
        assert!(is_valid_conn_id(&"0f".repeat(CONN_ID_LEN / 2)));
    }

    #[test_timeout::timeout]
    fn challenges_are_not_reused() {
        let first = generate_challenge();
        assert_ne!(first, [0u8; CHALLENGE_LEN]);
        assert_ne!(first, generate_challenge());
    }

    #[test_timeout::timeout]
    fn malformed_keys_are_rejected() {
        assert!(parse_public_key("zz").is_err());
        assert!(parse_public_key(&"00".repeat(31)).is_err());
        assert!(ConnectionKeys::from_secret_hex("abcd").is_err());
    }
}
