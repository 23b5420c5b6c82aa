//! Sealed envelopes addressed to an Ed25519 pairing key.
//!
//! The recipient key is mapped to its X25519 (Montgomery) form; an ephemeral
//! X25519 secret supplies the shared point, HKDF-SHA256 turns it into a
//! ChaCha20-Poly1305 key. The tag travels separately as `mac`.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use ed25519_dalek::{SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use super::keys::decode_fixed;
use super::CryptoError;
use crate::signals::EncryptedEnvelope;

const INFO: &[u8] = b"beach-rendezvous/envelope/v1";
const NONCE_LEN: usize = 12;

fn derive_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<Key, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);
    let hkdf = Hkdf::<Sha256>::new(Some(&salt[..]), shared);
    let mut okm = [0u8; 32];
    hkdf.expand(INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(*Key::from_slice(&okm))
}

pub fn seal(recipient: &VerifyingKey, plaintext: &[u8]) -> Result<EncryptedEnvelope, CryptoError> {
    let recipient_point = recipient.to_montgomery().to_bytes();
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient_point));

    let key = derive_key(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient_point)?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buffer = plaintext.to_vec();
    let tag = ChaCha20Poly1305::new(&key)
        .encrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            ephemeral_public.as_bytes(),
            &mut buffer,
        )
        .map_err(|_| CryptoError::Seal)?;

    Ok(EncryptedEnvelope {
        ciphertext: hex::encode(buffer),
        ephem_public_key: hex::encode(ephemeral_public.as_bytes()),
        iv: hex::encode(nonce),
        mac: hex::encode(tag),
    })
}

pub fn open(recipient: &SigningKey, sealed: &EncryptedEnvelope) -> Result<Vec<u8>, CryptoError> {
    let ephemeral: [u8; 32] =
        decode_fixed(&sealed.ephem_public_key).ok_or(CryptoError::MalformedEnvelope)?;
    let nonce: [u8; NONCE_LEN] = decode_fixed(&sealed.iv).ok_or(CryptoError::MalformedEnvelope)?;
    let tag: [u8; 16] = decode_fixed(&sealed.mac).ok_or(CryptoError::MalformedEnvelope)?;
    let mut buffer = hex::decode(&sealed.ciphertext).map_err(|_| CryptoError::MalformedEnvelope)?;

    let secret = StaticSecret::from(recipient.to_scalar_bytes());
    let recipient_point = recipient.verifying_key().to_montgomery().to_bytes();
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral));

    let key = derive_key(shared.as_bytes(), &ephemeral, &recipient_point)?;
    ChaCha20Poly1305::new(&key)
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            &ephemeral,
            &mut buffer,
            Tag::from_slice(&tag),
        )
        .map_err(|_| CryptoError::Open)?;
    Ok(buffer)
}
