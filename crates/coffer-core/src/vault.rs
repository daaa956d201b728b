//! Vault: in-memory key holder gating every encrypt/decrypt.
//!
//! The vault never validates a key on `unlock`; correctness is established by
//! decrypting the verification token written at creation time. Locking
//! zeroizes the key bytes before the buffer is released.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{Cipher, KdfParams};
use crate::error::{Result, VaultError};
use crate::store::Bucket;

pub const SALT_KEY: &str = "salt";
pub const VERIFICATION_TOKEN_KEY: &str = "vault_verification";
pub const KDF_PARAMS_KEY: &str = "kdf_params";

/// Known plaintext sealed under the vault key at creation.
pub const VERIFICATION_TOKEN_VALUE: &str = "coffer-vault-v1-verification";

/// What the record store needs from a vault.
pub trait VaultAccess: Send + Sync {
    fn is_unlocked(&self) -> bool;

    fn encrypt(&self, plaintext: &[u8]) -> Result<String>;

    fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>>;
}

#[derive(Default)]
struct KeySlot {
    key: Option<Zeroizing<Vec<u8>>>,
    unlocked: bool,
}

pub struct Vault {
    cipher: Arc<dyn Cipher>,
    salt: Vec<u8>,
    slot: Mutex<KeySlot>,
}

impl Vault {
    pub fn new(cipher: Arc<dyn Cipher>, salt: Vec<u8>) -> Self {
        Self {
            cipher,
            salt,
            slot: Mutex::new(KeySlot::default()),
        }
    }

    /// Build a vault and install `key` in one step.
    pub fn unlocked_with(
        cipher: Arc<dyn Cipher>,
        salt: Vec<u8>,
        key: Zeroizing<Vec<u8>>,
    ) -> Result<Self> {
        let vault = Self::new(cipher, salt);
        vault.unlock(key)?;
        Ok(vault)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Install `key`. A key of the wrong length is refused; anything else is
    /// accepted and only proven by [`Vault::verify_password`].
    pub fn unlock(&self, key: Zeroizing<Vec<u8>>) -> Result<()> {
        let expected = self.cipher.key_len();
        if key.len() != expected {
            return Err(VaultError::InvalidKey {
                expected,
                actual: key.len(),
            });
        }
        let mut slot = self.slot.lock();
        slot.key = Some(key);
        slot.unlocked = true;
        debug!("vault unlocked");
        Ok(())
    }

    pub fn lock(&self) {
        let mut slot = self.slot.lock();
        slot.unlocked = false;
        if let Some(mut key) = slot.key.take() {
            key.zeroize();
        }
        debug!("vault locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.slot.lock().unlocked
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let slot = self.slot.lock();
        let key = Self::held_key(&slot)?;
        self.cipher
            .encrypt(key, plaintext)
            .map_err(VaultError::EncryptionFailed)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        let slot = self.slot.lock();
        let key = Self::held_key(&slot)?;
        self.cipher
            .decrypt(key, ciphertext)
            .map_err(VaultError::DecryptionFailed)
    }

    /// Seal the verification constant. Called once, when the vault is created.
    pub fn create_verification_token(&self) -> Result<String> {
        self.encrypt(VERIFICATION_TOKEN_VALUE.as_bytes())
    }

    pub fn verify_password(&self, encrypted_token: &str) -> Result<()> {
        let decrypted = match self.decrypt(encrypted_token) {
            Ok(plaintext) => plaintext,
            Err(VaultError::DecryptionFailed(_)) => return Err(VaultError::IncorrectPassword),
            Err(e) => return Err(e),
        };
        if decrypted.as_slice() != VERIFICATION_TOKEN_VALUE.as_bytes() {
            return Err(VaultError::VerificationCorrupted);
        }
        Ok(())
    }

    fn held_key(slot: &KeySlot) -> Result<&[u8]> {
        match (&slot.key, slot.unlocked) {
            (Some(key), true) => Ok(key.as_slice()),
            _ => Err(VaultError::VaultLocked),
        }
    }
}

impl VaultAccess for Vault {
    fn is_unlocked(&self) -> bool {
        Vault::is_unlocked(self)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        Vault::encrypt(self, plaintext)
    }

    fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<Vec<u8>>> {
        Vault::decrypt(self, ciphertext)
    }
}

/// A vault exists once both the salt and the verification token are stored.
pub fn vault_exists(system: &Bucket) -> Result<bool> {
    let salt = system.get_optional(SALT_KEY)?;
    let token = system.get_optional(VERIFICATION_TOKEN_KEY)?;
    Ok(matches!((salt, token), (Some(s), Some(t)) if !s.is_empty() && !t.is_empty()))
}

pub fn load_salt(system: &Bucket) -> Result<Option<Vec<u8>>> {
    Ok(system.get_optional(SALT_KEY)?.filter(|s| !s.is_empty()))
}

pub fn load_verification_token(system: &Bucket) -> Result<String> {
    let bytes = system
        .get_optional(VERIFICATION_TOKEN_KEY)?
        .ok_or(VaultError::VaultNotInitialized)?;
    String::from_utf8(bytes).map_err(|_| VaultError::VerificationCorrupted)
}

/// Stored derivation parameters, or the defaults for vaults that predate them.
pub fn load_kdf_params(system: &Bucket) -> Result<KdfParams> {
    match system.get_optional(KDF_PARAMS_KEY)? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(VaultError::DeserializationFailed),
        None => Ok(KdfParams::default()),
    }
}

/// Check `vault` against the stored verification token.
pub fn verify_stored_token(system: &Bucket, vault: &Vault) -> Result<()> {
    let token = load_verification_token(system)?;
    vault.verify_password(&token)
}
