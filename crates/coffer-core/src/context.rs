//! Wires the store, vault, session manager and record store together and
//! owns the unlock flow shared by every command.

use std::sync::Arc;

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{self, Config, SharedConfig};
use crate::crypto::{derive_key_with, generate_salt, Cipher, KdfParams, XChaChaCipher};
use crate::error::{Result, VaultError};
use crate::records::SecretStore;
use crate::session::{Clock, SessionManager};
use crate::sqlite::SqliteStore;
use crate::store::{Bucket, KvStore};
use crate::vault::{
    self, Vault, KDF_PARAMS_KEY, SALT_KEY, VERIFICATION_TOKEN_KEY,
};

pub struct VaultContext {
    store: Arc<dyn KvStore>,
    cipher: Arc<dyn Cipher>,
    config: SharedConfig,
    system: Bucket,
    vault: Arc<Vault>,
    secrets: SecretStore,
    session: SessionManager,
}

impl VaultContext {
    /// Open the on-disk store at `config.db_path`.
    pub fn open(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)?;
        Self::with_store(Arc::new(store), config, Arc::new(XChaChaCipher::new()))
    }

    pub fn with_store(
        store: Arc<dyn KvStore>,
        config: Config,
        cipher: Arc<dyn Cipher>,
    ) -> Result<Self> {
        store.create_bucket(&config.system_bucket)?;
        store.create_bucket(&config.secrets_bucket)?;

        let system = Bucket::new(store.clone(), config.system_bucket.clone());
        let config = config::load(&system, config)?.into_shared();
        let salt = vault::load_salt(&system)?.unwrap_or_default();
        let vault = Arc::new(Vault::new(cipher.clone(), salt));
        let secrets = Self::secret_store(&store, &config, &vault);
        let session = SessionManager::new(system.clone(), config.clone(), cipher.clone());

        debug!(auto_lock_secs = config.read().auto_lock_secs, "vault context ready");
        Ok(Self {
            store,
            cipher,
            config,
            system,
            vault,
            secrets,
            session,
        })
    }

    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self {
            session: self.session.with_clock(clock),
            ..self
        }
    }

    pub fn vault_exists(&self) -> Result<bool> {
        vault::vault_exists(&self.system)
    }

    pub fn initialize(&mut self, password: &str) -> Result<()> {
        self.initialize_with(password, &KdfParams::default())
    }

    /// Create a new vault. The vault is left locked.
    pub fn initialize_with(&mut self, password: &str, params: &KdfParams) -> Result<()> {
        if vault::load_salt(&self.system)?.is_some() {
            return Err(VaultError::VaultAlreadyExists);
        }

        let salt = generate_salt().to_vec();
        let key = derive(password, &salt, params)?;
        let token = {
            let scratch = Vault::unlocked_with(self.cipher.clone(), salt.clone(), key)?;
            let token = scratch.create_verification_token()?;
            scratch.lock();
            token
        };

        let params_json = serde_json::to_vec(params).map_err(VaultError::SerializationFailed)?;
        // The salt goes last: its presence is what marks a vault as created.
        self.system.put(VERIFICATION_TOKEN_KEY, token.as_bytes())?;
        self.system.put(KDF_PARAMS_KEY, &params_json)?;
        self.system.put(SALT_KEY, &salt)?;
        config::save(&self.system, &self.config.read())?;

        self.vault = Arc::new(Vault::new(self.cipher.clone(), salt));
        self.secrets = Self::secret_store(&self.store, &self.config, &self.vault);
        info!("vault initialized");
        Ok(())
    }

    /// Derive the key from `password`, prove it against the verification
    /// token and start a session. On failure the vault is locked and any
    /// cached session is dropped.
    pub fn unlock_with_password(&self, password: &str) -> Result<()> {
        if self.vault.salt().is_empty() {
            return Err(VaultError::VaultNotInitialized);
        }
        let params = vault::load_kdf_params(&self.system)?;
        let key = derive(password, self.vault.salt(), &params)?;

        if let Err(e) = self.install_key(key.clone()) {
            warn!("unlock rejected: {e}");
            self.vault.lock();
            if let Err(clear_err) = self.session.clear() {
                warn!("failed to clear session: {clear_err}");
            }
            return Err(e);
        }

        if let Err(e) = self.session.create_session(&key) {
            warn!("failed to create session: {e}");
        }
        info!("vault unlocked");
        Ok(())
    }

    /// Make sure the vault is unlocked, reusing a live session when there is
    /// one and calling `prompt` for the master password otherwise.
    ///
    /// Returns `true` when a cached session was reused.
    pub fn ensure_unlocked<F>(&self, prompt: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Zeroizing<String>>,
    {
        if !self.vault_exists()? {
            return Err(VaultError::VaultNotInitialized);
        }

        match self.session.get_cached_key() {
            Ok(key) => match self.install_key(key) {
                Ok(()) => {
                    if let Err(e) = self.session.update_activity() {
                        warn!("failed to refresh session activity: {e}");
                    }
                    debug!("reused cached session");
                    return Ok(true);
                }
                Err(e) => {
                    warn!("cached session key rejected: {e}");
                    self.session.clear()?;
                }
            },
            Err(VaultError::SessionCorrupted(reason)) => {
                warn!("discarding corrupted session: {reason}");
                self.session.clear()?;
            }
            Err(e) if e.is_session_error() => debug!("no usable session: {e}"),
            Err(e) => return Err(e),
        }

        let password = match prompt() {
            Ok(password) => password,
            Err(e) => {
                if let Err(clear_err) = self.session.clear() {
                    warn!("failed to clear session: {clear_err}");
                }
                return Err(e);
            }
        };
        self.unlock_with_password(&password)?;
        Ok(false)
    }

    /// Drop the cached session and the in-memory key. The vault is locked
    /// even when clearing the session fails.
    pub fn lock(&self) -> Result<()> {
        let cleared = self.session.clear();
        self.vault.lock();
        info!("vault locked");
        cleared
    }

    /// Validate, persist, then apply to the live configuration.
    pub fn set_auto_lock(&self, seconds: u64) -> Result<()> {
        let mut next = self.config.read().clone();
        next.set_auto_lock(seconds)?;
        config::save(&self.system, &next)?;
        *self.config.write() = next;
        info!(auto_lock_secs = seconds, "autolock updated");
        Ok(())
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    pub fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Prove `key` on a scratch vault; the shared vault only ever holds a
    /// verified key.
    fn install_key(&self, key: Zeroizing<Vec<u8>>) -> Result<()> {
        let scratch =
            Vault::unlocked_with(self.cipher.clone(), self.vault.salt().to_vec(), key.clone())?;
        let verified = vault::verify_stored_token(&self.system, &scratch);
        scratch.lock();
        verified?;
        self.vault.unlock(key)
    }

    fn secret_store(store: &Arc<dyn KvStore>, config: &SharedConfig, vault: &Arc<Vault>) -> SecretStore {
        let bucket = Bucket::new(store.clone(), config.read().secrets_bucket.clone());
        SecretStore::new(bucket, vault.clone())
    }
}

fn derive(password: &str, salt: &[u8], params: &KdfParams) -> Result<Zeroizing<Vec<u8>>> {
    derive_key_with(password, salt, params).map_err(|e| VaultError::KeyDerivation(e.to_string()))
}
