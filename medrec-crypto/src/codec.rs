//! Sealing and opening record content.

use crate::error::{CodecError, CodecResult};
use crate::key::KeyHandle;
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use medrec_types::FieldMap;
use rand::RngCore;

/// AEAD nonce length in bytes (96-bit, per ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Translates between encrypted payloads and plaintext field maps.
///
/// Round-trip determinism is part of the contract: for every supported
/// field map `m`, `decrypt(encrypt(m, k), k) == m`.
#[async_trait]
pub trait RecordCodec: Send + Sync {
    /// Decrypts an encrypted record payload into a field map.
    async fn decrypt(&self, payload: &[u8], key: &KeyHandle) -> CodecResult<FieldMap>;

    /// Re-encrypts a field map into a payload suitable for storage.
    async fn encrypt(&self, fields: &FieldMap, key: &KeyHandle) -> CodecResult<Vec<u8>>;
}

/// The production codec: serde_json plaintext sealed with ChaCha20-Poly1305.
///
/// Payload layout: `nonce (12 bytes) || ciphertext+tag`. A fresh random
/// nonce is drawn per encryption, so equal plaintexts produce different
/// payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedRecordCodec;

impl SealedRecordCodec {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous seal; the trait impl delegates here.
    pub fn seal(&self, fields: &FieldMap, key: &KeyHandle) -> CodecResult<Vec<u8>> {
        let plaintext = serde_json::to_vec(fields)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| CodecError::Encryption(format!("AEAD seal failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Synchronous open; the trait impl delegates here.
    pub fn open(&self, payload: &[u8], key: &KeyHandle) -> CodecResult<FieldMap> {
        if payload.len() <= NONCE_SIZE {
            return Err(CodecError::Malformed(format!(
                "payload too short: {} bytes",
                payload.len()
            )));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CodecError::Decryption)?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[async_trait]
impl RecordCodec for SealedRecordCodec {
    async fn decrypt(&self, payload: &[u8], key: &KeyHandle) -> CodecResult<FieldMap> {
        self.open(payload, key)
    }

    async fn encrypt(&self, fields: &FieldMap, key: &KeyHandle) -> CodecResult<Vec<u8>> {
        self.seal(fields, key)
    }
}

/// Stores field maps as plaintext JSON. For tests and pre-unlock flows;
/// ignores the key handle entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

#[async_trait]
impl RecordCodec for PassthroughCodec {
    async fn decrypt(&self, payload: &[u8], _key: &KeyHandle) -> CodecResult<FieldMap> {
        Ok(serde_json::from_slice(payload)?)
    }

    async fn encrypt(&self, fields: &FieldMap, _key: &KeyHandle) -> CodecResult<Vec<u8>> {
        Ok(serde_json::to_vec(fields)?)
    }
}
