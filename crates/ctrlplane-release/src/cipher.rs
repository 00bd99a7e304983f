//! Encryption of sensitive variable values
//!
//! Values are serialized to JSON and sealed with ChaCha20-Poly1305. The
//! stored form is `base64url(nonce || ciphertext)` without padding.

use crate::error::{ReleaseError, Result};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::{aead::Aead, aead::KeyInit, ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use std::fmt;

const NONCE_LEN: usize = 12;

/// Symmetric cipher for sensitive variables
#[derive(Clone)]
pub struct VariableCipher {
    key: [u8; 32],
}

impl fmt::Debug for VariableCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableCipher").finish_non_exhaustive()
    }
}

impl VariableCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Parse a 32-byte key given as 64 hex digits or base64 (url-safe or standard)
    pub fn from_key_material(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();

        let decoded = if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(trimmed).ok()
        } else {
            general_purpose::URL_SAFE_NO_PAD
                .decode(trimmed)
                .or_else(|_| general_purpose::STANDARD.decode(trimmed))
                .ok()
        };

        let bytes = decoded.ok_or_else(|| {
            ReleaseError::InvalidKey("expected 64 hex digits or base64".to_string())
        })?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ReleaseError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, value: &serde_json::Value) -> Result<String> {
        let plaintext = serde_json::to_vec(value).map_err(|e| ReleaseError::Cipher(e.to_string()))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| ReleaseError::Cipher("encryption failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(general_purpose::URL_SAFE_NO_PAD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<serde_json::Value> {
        let payload = general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| ReleaseError::Cipher("invalid ciphertext".to_string()))?;

        if payload.len() <= NONCE_LEN {
            return Err(ReleaseError::Cipher("invalid ciphertext".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ReleaseError::Cipher("decryption failed".to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|e| ReleaseError::Cipher(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> VariableCipher {
        VariableCipher::new([7u8; 32])
    }

    #[test]
    fn test_encrypt_decrypt() {
        let value = json!({"password": "hunter2", "port": 5432});
        let sealed = cipher().encrypt(&value).unwrap();
        assert!(!sealed.contains("hunter2"));
        assert_eq!(cipher().decrypt(&sealed).unwrap(), value);
    }

    #[test]
    fn test_nonce_is_random() {
        let value = json!("secret");
        assert_ne!(cipher().encrypt(&value).unwrap(), cipher().encrypt(&value).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt(&json!("secret")).unwrap();
        let other = VariableCipher::new([9u8; 32]);
        assert!(matches!(other.decrypt(&sealed), Err(ReleaseError::Cipher(_))));
        assert!(cipher().decrypt("AAAA").is_err());
    }

    #[test]
    fn test_key_material_formats() {
        let hex_key = "00".repeat(32);
        assert!(VariableCipher::from_key_material(&hex_key).is_ok());

        let b64 = general_purpose::STANDARD.encode([1u8; 32]);
        assert!(VariableCipher::from_key_material(&b64).is_ok());

        assert!(matches!(
            VariableCipher::from_key_material("too-short"),
            Err(ReleaseError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        assert_eq!(format!("{:?}", cipher()), "VariableCipher { .. }");
    }
}
