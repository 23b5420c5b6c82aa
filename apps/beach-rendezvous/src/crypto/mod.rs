//! Signature verification and envelope handling for pairing keys.

use async_trait::async_trait;
use ed25519_dalek::{Signature, SigningKey};
use thiserror::Error;

use crate::signals::EncryptedEnvelope;

pub mod envelope;
pub mod keys;

pub use keys::{derive_conn_id, generate_challenge, is_valid_conn_id, parse_public_key, ConnectionKeys};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("malformed key")]
    MalformedKey,
    #[error("malformed envelope")]
    MalformedEnvelope,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("failed to seal envelope")]
    Seal,
    #[error("envelope authentication failed")]
    Open,
}

/// Cryptographic checks the registry delegates.
///
/// Async so an implementation may move work off the runtime or call out to a
/// remote signer without changing the registry.
#[async_trait]
pub trait CryptoVerifier: Send + Sync {
    /// Whether `signature_hex` is a valid signature over `message` by
    /// `public_key_hex`. Malformed inputs are simply invalid.
    async fn verify_signature(&self, message: &[u8], signature_hex: &str, public_key_hex: &str)
        -> bool;

    /// Open an envelope with the recipient's 32-byte secret key.
    async fn decrypt_envelope(
        &self,
        envelope: &EncryptedEnvelope,
        private_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

#[async_trait]
impl CryptoVerifier for Ed25519Verifier {
    async fn verify_signature(
        &self,
        message: &[u8],
        signature_hex: &str,
        public_key_hex: &str,
    ) -> bool {
        let Ok(public_key) = parse_public_key(public_key_hex) else {
            return false;
        };
        let Some(signature) = keys::decode_fixed::<64>(signature_hex) else {
            return false;
        };
        public_key
            .verify_strict(message, &Signature::from_bytes(&signature))
            .is_ok()
    }

    async fn decrypt_envelope(
        &self,
        sealed: &EncryptedEnvelope,
        private_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let secret: [u8; 32] = private_key
            .try_into()
            .map_err(|_| CryptoError::MalformedKey)?;
        envelope::open(&SigningKey::from_bytes(&secret), sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test]
    async fn verifies_signatures_from_the_pairing_key() {
        let keys = ConnectionKeys::generate();
        let verifier = Ed25519Verifier;
        let signed = keys.sign(b"challenge");
        assert!(
            verifier
                .verify_signature(b"challenge", &signed, &keys.public_hex())
                .await
        );
        assert!(
            !verifier
                .verify_signature(b"other", &signed, &keys.public_hex())
                .await
        );
        let stranger = ConnectionKeys::generate();
        assert!(
            !verifier
                .verify_signature(b"challenge", &signed, &stranger.public_hex())
                .await
        );
        assert!(
            !verifier
                .verify_signature(b"challenge", "not-hex", &keys.public_hex())
                .await
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn decrypts_envelopes_with_the_secret_key() {
        let keys = ConnectionKeys::generate();
        let sealed = keys.seal(b"v2").unwrap();
        let secret = hex::decode(keys.secret_hex()).unwrap();
        let verifier = Ed25519Verifier;
        assert_eq!(verifier.decrypt_envelope(&sealed, &secret).await.unwrap(), b"v2");
        assert_eq!(
            verifier.decrypt_envelope(&sealed, &secret[..8]).await,
            Err(CryptoError::MalformedKey)
        );
    }
}
