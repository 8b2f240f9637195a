//! Field-level encryption and key generation.
//!
//! Personal data (user full names) is encrypted before it reaches Postgres using AES-256-GCM.
//! Each value gets a fresh random 96-bit nonce; the stored form is base64(nonce || ciphertext).
//!
//! Keys are 32 random bytes encoded as URL-safe base64, the same shape as a Fernet key, and are
//! supplied through `ENCRYPTION_KEY`. Standard base64 keys are accepted as well.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use rand::{Rng, thread_rng};
use std::fmt;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key is not valid base64")]
    KeyEncoding,

    #[error("key must be 32 bytes (256 bits), got {0} bytes")]
    KeyLength(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("encrypted value is malformed")]
    Malformed,

    #[error("decryption failed: wrong key or corrupted value")]
    Decrypt,
}

/// Generates a new encryption key: 32 random bytes, URL-safe base64 with padding.
pub fn generate_encryption_key() -> String {
    general_purpose::URL_SAFE.encode(random_bytes::<KEY_LEN>())
}

/// Generates an application secret with 256 bits of entropy.
pub fn generate_secret_key() -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(random_bytes::<KEY_LEN>())
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    thread_rng().fill(&mut bytes[..]);
    bytes
}

fn decode_key(key: &str) -> Result<Vec<u8>, CryptoError> {
    let key = key.trim();
    [
        general_purpose::URL_SAFE,
        general_purpose::STANDARD,
        general_purpose::URL_SAFE_NO_PAD,
        general_purpose::STANDARD_NO_PAD,
    ]
    .iter()
    .find_map(|engine| engine.decode(key).ok())
    .ok_or(CryptoError::KeyEncoding)
}

/// AES-256-GCM cipher for single text fields.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Build a cipher from a base64 encoded 32 byte key.
    pub fn from_key(key: &str) -> Result<Self, CryptoError> {
        let key_bytes = decode_key(key)?;
        if key_bytes.len() != KEY_LEN {
            return Err(CryptoError::KeyLength(key_bytes.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| CryptoError::KeyLength(key_bytes.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypt `plaintext`, returning base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce_bytes = random_bytes::<NONCE_LEN>();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(out))
    }

    /// Decrypt a value produced by [`FieldCipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = general_purpose::STANDARD.decode(encoded).map_err(|_| CryptoError::Malformed)?;
        if data.len() <= NONCE_LEN {
            return Err(CryptoError::Malformed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed)
    }
}
