//! Encryption of seller secrets at rest.
//!
//! Format: `base64(nonce_12bytes || ciphertext || tag_16bytes)`.

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Errors from encrypting or decrypting a stored secret.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes of base64")]
    InvalidKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("ciphertext is malformed")]
    Malformed,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
}

/// Reversible encryption for secrets persisted in the credential table.
pub trait SecretCipher: Send + Sync {
    /// Encrypt a plaintext secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encrypt`] if the cipher rejects the input.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a value produced by [`SecretCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is malformed or was encrypted with another key.
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM with a random nonce per value.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the key does not decode to 32 bytes.
    pub fn from_base64_key(key: &SecretString) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(key.expose_secret().trim())
            .map_err(|_| CryptoError::InvalidKey)?;
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(&blob))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let data = STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::Malformed)?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }

        let (nonce, body) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecretString {
        SecretString::from(STANDARD.encode([byte; KEY_LEN]))
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = AesGcmCipher::from_base64_key(&key(7)).expect("valid key");
        let sealed = cipher.encrypt("pk_live_abcdef").expect("encrypt");

        assert!(!sealed.contains("pk_live_abcdef"));
        assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), "pk_live_abcdef");
    }

    #[test]
    fn test_nonce_is_random() {
        let cipher = AesGcmCipher::from_base64_key(&key(7)).expect("valid key");
        let a = cipher.encrypt("same").expect("encrypt");
        let b = cipher.encrypt("same").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = AesGcmCipher::from_base64_key(&key(1))
            .expect("valid key")
            .encrypt("secret")
            .expect("encrypt");
        let other = AesGcmCipher::from_base64_key(&key(2)).expect("valid key");
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_rejects_bad_keys_and_blobs() {
        assert!(matches!(
            AesGcmCipher::from_base64_key(&SecretString::from("c2hvcnQ=")),
            Err(CryptoError::InvalidKey)
        ));
        let cipher = AesGcmCipher::from_base64_key(&key(3)).expect("valid key");
        assert!(matches!(cipher.decrypt("not base64!"), Err(CryptoError::Malformed)));
        assert!(matches!(cipher.decrypt("AAAA"), Err(CryptoError::Malformed)));
    }
}
