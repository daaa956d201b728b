//! Symmetric encryption and password key derivation.
//!
//! Ciphertext wire format (before base64, URL-safe alphabet, no padding):
//!   [ nonce (24 bytes) | ciphertext + tag (16 bytes) ]

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose, Engine as _};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 16;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 64 * 1024; // 64 MiB
pub const KDF_PARALLELISM: u32 = 4;
pub const KDF_MIN_TIME_COST: u32 = 2;

const AAD: &[u8] = b"coffer-v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("AEAD encryption failed")]
    Encrypt,

    #[error("AEAD decryption failed (wrong key or tampered data)")]
    Decrypt,

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Authenticated encryption under a caller-held key.
///
/// `encrypt` returns armored (base64) text so the result can be stored as-is
/// in the byte store or embedded in JSON.
pub trait Cipher: Send + Sync {
    fn key_len(&self) -> usize;

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError>;

    fn decrypt(&self, key: &[u8], ciphertext: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// XChaCha20-Poly1305 with a random 192-bit nonce per message.
#[derive(Debug, Clone, Copy, Default)]
pub struct XChaChaCipher;

impl XChaChaCipher {
    pub fn new() -> Self {
        Self
    }

    fn build(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: key.len(),
            });
        }
        XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        })
    }
}

impl Cipher for XChaChaCipher {
    fn key_len(&self) -> usize {
        KEY_LEN
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Self::build(key)?;
        let nonce = XChaCha20Poly1305::generate_nonce(&mut AeadOsRng);
        let ciphertext = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: AAD })
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(out))
    }

    fn decrypt(&self, key: &[u8], ciphertext: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let cipher = Self::build(key)?;
        let data = general_purpose::URL_SAFE_NO_PAD
            .decode(ciphertext.trim())
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed("ciphertext too short".into()));
        }
        let (nonce, body) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: body, aad: AAD })
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// Argon2id cost parameters. Persisted next to the salt so unlock reproduces
/// the derivation the vault was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub time_cost: u32,
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: KDF_TIME_COST,
            memory_kib: KDF_MEMORY_COST,
            parallelism: KDF_PARALLELISM,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, CryptoError> {
        if self.time_cost < KDF_MIN_TIME_COST {
            return Err(CryptoError::KeyDerivation(format!(
                "time cost must be at least {KDF_MIN_TIME_COST}"
            )));
        }
        Params::new(
            self.memory_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 params: {e}")))
    }
}

/// Derive the 32-byte vault key from a password with the default parameters.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    derive_key_with(password, salt, &KdfParams::default())
}

pub fn derive_key_with(
    password: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut key = Zeroizing::new(vec![0u8; KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(format!("argon2 derive: {e}")))?;
    Ok(key)
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn random_bytes(len: usize) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(vec![0u8; len]);
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
