//! Encrypt-on-write, decrypt-on-read collection of [`Secret`] records.
//!
//! Each record is stored under its own id. Deleting does not need the vault
//! key; every other operation does.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::CryptoError;
use crate::error::{Result, VaultError};
use crate::models::Secret;
use crate::store::Bucket;
use crate::vault::VaultAccess;

pub struct SecretStore {
    bucket: Bucket,
    vault: Arc<dyn VaultAccess>,
}

impl SecretStore {
    pub fn new(bucket: Bucket, vault: Arc<dyn VaultAccess>) -> Self {
        Self { bucket, vault }
    }

    pub fn add(&self, secret: &Secret) -> Result<String> {
        self.seal_and_put(secret)?;
        debug!(id = %secret.id, "secret added");
        Ok(secret.id.clone())
    }

    pub fn get(&self, id: &str) -> Result<Secret> {
        self.ensure_unlocked()?;
        let data = self.bucket.get(id)?;
        let ciphertext = String::from_utf8(data).map_err(|_| {
            VaultError::DecryptionFailed(CryptoError::Malformed("stored value is not text".into()))
        })?;
        let plaintext = self.vault.decrypt(&ciphertext)?;
        serde_json::from_slice(&plaintext).map_err(VaultError::DeserializationFailed)
    }

    /// Refreshes `updated_at` and overwrites the stored record.
    pub fn update(&self, secret: &mut Secret) -> Result<()> {
        self.ensure_unlocked()?;
        secret.updated_at = Utc::now();
        self.seal_and_put(secret)?;
        debug!(id = %secret.id, "secret updated");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.bucket.delete(id)?;
        debug!(id, "secret deleted");
        Ok(())
    }

    /// All records in key order. One unreadable record fails the whole listing.
    pub fn list(&self) -> Result<Vec<Secret>> {
        let keys = self.bucket.list_keys()?;
        let mut secrets = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(&key) {
                Ok(secret) => secrets.push(secret),
                Err(e) => {
                    warn!(bucket = self.bucket.name(), id = %key, "failed to load secret: {e}");
                    return Err(e);
                }
            }
        }
        Ok(secrets)
    }

    fn seal_and_put(&self, secret: &Secret) -> Result<()> {
        self.ensure_unlocked()?;
        let json =
            Zeroizing::new(serde_json::to_vec(secret).map_err(VaultError::SerializationFailed)?);
        let ciphertext = self.vault.encrypt(&json)?;
        self.bucket.put(&secret.id, ciphertext.as_bytes())?;
        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.vault.is_unlocked() {
            Ok(())
        } else {
            Err(VaultError::VaultLocked)
        }
    }
}
