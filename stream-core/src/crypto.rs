//! Cryptographic operations for STREAM
//!
//! This module provides:
//! - Shared secret generation
//! - Fulfillment/condition derivation bound to the encrypted packet bytes
//! - AES-256-GCM payload encryption keyed from the shared secret
//!
//! Only the holders of the shared secret can produce the fulfillment for a
//! packet, so a connector on the path cannot claim delivery it did not make.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const FULFILLMENT_GENERATION_STRING: &[u8] = b"ilp_stream_fulfillment";
const ENCRYPTION_KEY_STRING: &[u8] = b"ilp_stream_encryption";
const NONCE_LENGTH: usize = 12;
const AUTH_TAG_LENGTH: usize = 16;

/// Condition nobody knows a preimage for.
///
/// Used on rate probes and on the forced close packet: such a packet can
/// never be fulfilled, so it can never move money.
pub const UNFULFILLABLE_CONDITION: [u8; 32] = [0u8; 32];

/// 32-byte secret shared by sender and receiver of one connection
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Generate a new random secret
    pub fn generate() -> Self {
        Self(rand::random::<[u8; 32]>())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes (USE WITH CAUTION)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fingerprint only, never the secret itself
        let fingerprint = hash_bytes(&self.0);
        write!(f, "SharedSecret({}..)", hex::encode(&fingerprint[..4]))
    }
}

/// HMAC-SHA256
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Fulfillment for an encrypted STREAM packet
pub fn generate_fulfillment(secret: &SharedSecret, encrypted_data: &[u8]) -> [u8; 32] {
    let fulfillment_key = hmac_sha256(secret.as_bytes(), FULFILLMENT_GENERATION_STRING);
    hmac_sha256(&fulfillment_key, encrypted_data)
}

/// Condition committing to a fulfillment
pub fn generate_condition(fulfillment: &[u8; 32]) -> [u8; 32] {
    hash_bytes(fulfillment)
}

/// (fulfillment, condition) for an encrypted STREAM packet
pub fn fulfillment_and_condition(
    secret: &SharedSecret,
    encrypted_data: &[u8],
) -> ([u8; 32], [u8; 32]) {
    let fulfillment = generate_fulfillment(secret, encrypted_data);
    let condition = generate_condition(&fulfillment);
    (fulfillment, condition)
}

/// Does the fulfillment hash to the condition
pub fn verify_fulfillment(fulfillment: &[u8; 32], condition: &[u8; 32]) -> bool {
    &generate_condition(fulfillment) == condition
}

/// Encrypts and decrypts STREAM payloads under a connection secret
pub trait StreamEncryptor: Send + Sync {
    /// Plaintext → ciphertext
    fn encrypt(&self, secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Ciphertext → plaintext
    fn decrypt(&self, secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM with a random nonce; output is `nonce || ciphertext || tag`
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmEncryptor;

impl AesGcmEncryptor {
    fn cipher(secret: &SharedSecret) -> Aes256Gcm {
        let key_bytes = hmac_sha256(secret.as_bytes(), ENCRYPTION_KEY_STRING);
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Aes256Gcm::new(key)
    }
}

impl StreamEncryptor for AesGcmEncryptor {
    fn encrypt(&self, secret: &SharedSecret, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let encrypted = Self::cipher(secret)
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut data = Vec::with_capacity(NONCE_LENGTH + encrypted.len());
        data.extend_from_slice(&nonce);
        data.extend_from_slice(&encrypted);
        Ok(data)
    }

    fn decrypt(&self, secret: &SharedSecret, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LENGTH + AUTH_TAG_LENGTH {
            return Err(Error::Decryption("Ciphertext too short".to_string()));
        }

        let (nonce, encrypted) = ciphertext.split_at(NONCE_LENGTH);
        Self::cipher(secret)
            .decrypt(Nonce::from_slice(nonce), encrypted)
            .map_err(|e| Error::Decryption(e.to_string()))
    }
}
