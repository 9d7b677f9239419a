//! At-rest encryption of the text column
//!
//! AES-256-GCM with a random 96-bit nonce per value. The nonce is prepended
//! to the ciphertext and the whole payload is base64-encoded so it survives
//! the pipe-delimited table format. The key is 32 bytes, base64, provided
//! through the environment.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use crate::StoreError;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for one text column
pub struct TextCipher {
    cipher: Aes256Gcm,
}

impl TextCipher {
    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64(key_b64: &str) -> Result<Self, StoreError> {
        let key_bytes = BASE64
            .decode(key_b64.trim())
            .map_err(|e| StoreError::Key(e.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(StoreError::Key(format!(
                "expected 32 bytes of key material, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from the named environment variable. `Ok(None)` when the
    /// variable is unset or empty, i.e. encryption is disabled.
    pub fn from_env(var: &str) -> Result<Option<Self>, StoreError> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Self::from_base64(&value).map(Some),
            _ => Ok(None),
        }
    }

    /// Encrypt one value: base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt a value produced by `encrypt`.
    pub fn decrypt(&self, payload_b64: &str) -> Result<String, StoreError> {
        let payload = BASE64
            .decode(payload_b64.trim())
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        if payload.len() < NONCE_LEN {
            return Err(StoreError::Encryption("payload too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| StoreError::Encryption(e.to_string()))
    }
}
