use thiserror::Error;

use crate::crypto::CryptoError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Vault is locked; unlock with the master password first")]
    VaultLocked,

    #[error("Incorrect master password")]
    IncorrectPassword,

    #[error("Vault verification failed: possible corruption")]
    VerificationCorrupted,

    #[error("Vault not initialized")]
    VaultNotInitialized,

    #[error("Vault already initialized")]
    VaultAlreadyExists,

    #[error("Session expired")]
    SessionExpired,

    #[error("No active session")]
    NoActiveSession,

    #[error("Session data corrupted: {0}")]
    SessionCorrupted(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(CryptoError),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(CryptoError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(serde_json::Error),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    StorageFailed(StoreError),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key: expected {expected} bytes, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key, .. } => VaultError::NotFound(key),
            other => VaultError::StorageFailed(other),
        }
    }
}

impl VaultError {
    /// Errors that are resolved by prompting for the master password again.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            VaultError::SessionExpired
                | VaultError::NoActiveSession
                | VaultError::SessionCorrupted(_)
        )
    }
}
