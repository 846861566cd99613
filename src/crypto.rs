//! Secrets-at-rest encryption for config values (NAS password, HTTP token,
//! admin password). A key file is generated beside the config on first run.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand::RngCore;
use std::path::Path;

use crate::error::ConfigError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Load the key file at `path`, generating a fresh one if it doesn't exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        let key_bytes = if path.exists() {
            let raw = std::fs::read(path)?;
            base64::engine::general_purpose::STANDARD
                .decode(&raw)
                .map_err(|e| ConfigError::Decrypt(e.to_string()))?
        } else {
            let mut key = [0u8; KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            let encoded = base64::engine::general_purpose::STANDARD.encode(key);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, encoded)?;
            key.to_vec()
        };
        if key_bytes.len() != KEY_LEN {
            return Err(ConfigError::Decrypt("encryption key has unexpected length".into()));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Encrypt plaintext, returning `base64(nonce || ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ConfigError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| ConfigError::Decrypt(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(out))
    }

    /// Decrypt a value produced by [`Self::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, ConfigError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ConfigError::Decrypt(e.to_string()))?;
        if raw.len() < NONCE_LEN {
            return Err(ConfigError::Decrypt("ciphertext too short".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| ConfigError::Decrypt(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| ConfigError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join(".encryption_key");
        let secret_box = SecretBox::load_or_create(&key_path).unwrap();
        let enc = secret_box.encrypt("s3cret").unwrap();
        assert_ne!(enc, "s3cret");
        assert_eq!(secret_box.decrypt(&enc).unwrap(), "s3cret");
    }

    #[test]
    fn reuses_key_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join(".encryption_key");
        let a = SecretBox::load_or_create(&key_path).unwrap();
        let enc = a.encrypt("hello").unwrap();
        let b = SecretBox::load_or_create(&key_path).unwrap();
        assert_eq!(b.decrypt(&enc).unwrap(), "hello");
    }
}
