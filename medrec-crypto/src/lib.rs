//! Record content codec for medrec.
//!
//! Translates between encrypted record payloads at rest and plaintext
//! field maps in memory, using ChaCha20-Poly1305 with a per-member
//! symmetric key.
//!
//! # Architecture
//!
//! The key hierarchy that produces per-member keys lives outside this
//! workspace; callers hand the codec an opaque [`KeyHandle`] borrowed for
//! the duration of one operation. The handle's key material is zeroized
//! on drop and never appears in logs.
//!
//! Two codec implementations are provided:
//!
//! - [`SealedRecordCodec`]: the real AEAD codec (random 96-bit nonce
//!   prepended to the ciphertext).
//! - [`PassthroughCodec`]: plaintext JSON, for tests and pre-unlock flows.

mod codec;
mod error;
mod key;

pub use codec::{PassthroughCodec, RecordCodec, SealedRecordCodec, NONCE_SIZE};
pub use error::{CodecError, CodecResult};
pub use key::{KeyHandle, KEY_SIZE};
