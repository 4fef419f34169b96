//! Opaque per-member key handles.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Opaque handle to one member's symmetric record key.
///
/// The engine borrows a handle for the duration of one migration call and
/// never persists it. Key material is zeroized on drop and redacted from
/// `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyHandle([u8; KEY_SIZE]);

impl KeyHandle {
    /// Wraps raw key bytes produced by the external key hierarchy.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random key. Primarily for tests; production keys
    /// come from the key-derivation hierarchy outside this workspace.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyHandle(<redacted>)")
    }
}
