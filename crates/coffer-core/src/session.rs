//! Cached vault access across command invocations.
//!
//! The vault key is never persisted as-is. It is base64-encoded, sealed under
//! a throwaway session key, and the sealed form and the session key are
//! written to two separate records. Both are needed to recover the vault key.
//!
//! A session expires after `min(live autolock, recorded timeout)` seconds
//! without activity. A live autolock of 0 disables expiry; a recorded 0 with
//! autolock since enabled expires at once.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::SharedConfig;
use crate::crypto::{random_bytes, Cipher};
use crate::error::{Result, VaultError};
use crate::store::{Bucket, StoreError};

pub const SESSION_DATA_KEY: &str = "session:data";
pub const SESSION_KEY_KEY: &str = "session:key";
pub const SESSION_KEY_LEN: usize = 32;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// When the vault was first unlocked.
    pub unlocked_at: DateTime<Utc>,
    /// Last successful command; the inactivity timer runs from here.
    pub last_activity_at: DateTime<Utc>,
    /// Autolock value in effect when the session was created.
    pub timeout_seconds: u64,
    /// Vault key, base64-encoded then sealed under the session key.
    pub encrypted_key: String,
}

pub struct SessionManager {
    system: Bucket,
    config: SharedConfig,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
}

impl SessionManager {
    pub fn new(system: Bucket, config: SharedConfig, cipher: Arc<dyn Cipher>) -> Self {
        Self {
            system,
            config,
            cipher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn create_session(&self, vault_key: &[u8]) -> Result<()> {
        let session_key = random_bytes(SESSION_KEY_LEN);
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(vault_key));
        let encrypted_key = self
            .cipher
            .encrypt(&session_key, encoded.as_bytes())
            .map_err(VaultError::EncryptionFailed)?;

        let now = self.clock.now();
        let session = Session {
            unlocked_at: now,
            last_activity_at: now,
            timeout_seconds: self.config.read().auto_lock_secs,
            encrypted_key,
        };

        self.system.put(SESSION_KEY_KEY, &session_key)?;
        self.save_session(&session)?;
        info!(timeout_secs = session.timeout_seconds, "session created");
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        match self.load_session() {
            Ok(Some(session)) => !self.is_expired(&session),
            Ok(None) => false,
            Err(e) => {
                debug!("session unreadable: {e}");
                false
            }
        }
    }

    pub fn get_cached_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let session = self.load_session()?.ok_or(VaultError::NoActiveSession)?;
        if self.is_expired(&session) {
            debug!("session expired");
            return Err(VaultError::SessionExpired);
        }

        let session_key = self
            .system
            .get_optional(SESSION_KEY_KEY)?
            .map(Zeroizing::new)
            .ok_or_else(|| VaultError::SessionCorrupted("session key missing".into()))?;

        let encoded = self
            .cipher
            .decrypt(&session_key, &session.encrypted_key)
            .map_err(|e| VaultError::SessionCorrupted(format!("decrypt vault key: {e}")))?;

        let vault_key = general_purpose::STANDARD
            .decode(encoded.as_slice())
            .map_err(|e| VaultError::SessionCorrupted(format!("decode vault key: {e}")))?;
        Ok(Zeroizing::new(vault_key))
    }

    /// Reset the inactivity timer. Never creates a session.
    pub fn update_activity(&self) -> Result<()> {
        let mut session = self.load_session()?.ok_or(VaultError::NoActiveSession)?;
        session.last_activity_at = self.clock.now();
        self.save_session(&session)
    }

    /// Delete both session records. Records that are already gone are fine;
    /// any other failure is reported once both deletes were attempted.
    pub fn clear(&self) -> Result<()> {
        let mut first_err: Option<StoreError> = None;
        for key in [SESSION_DATA_KEY, SESSION_KEY_KEY] {
            match self.system.delete(key) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!("failed to delete {key}: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => {
                debug!("session cleared");
                Ok(())
            }
        }
    }

    /// Zero when there is no usable session; `Duration::MAX` when autolock
    /// is disabled.
    pub fn remaining_time(&self) -> Duration {
        let session = match self.load_session() {
            Ok(Some(session)) => session,
            _ => return Duration::ZERO,
        };
        match self.effective_timeout(&session) {
            Some(timeout) => timeout.saturating_sub(self.elapsed(&session)),
            None => Duration::MAX,
        }
    }

    pub fn load_session(&self) -> Result<Option<Session>> {
        let Some(data) = self.system.get_optional(SESSION_DATA_KEY)? else {
            return Ok(None);
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| VaultError::SessionCorrupted(format!("unmarshal session: {e}")))
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        let data = serde_json::to_vec(session).map_err(VaultError::SerializationFailed)?;
        self.system.put(SESSION_DATA_KEY, &data)?;
        Ok(())
    }

    /// `None` means the session never expires.
    fn effective_timeout(&self, session: &Session) -> Option<Duration> {
        let config = self.config.read();
        if config.auto_lock_disabled() {
            return None;
        }
        Some(Duration::from_secs(
            session.timeout_seconds.min(config.auto_lock_secs),
        ))
    }

    fn elapsed(&self, session: &Session) -> Duration {
        (self.clock.now() - session.last_activity_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn is_expired(&self, session: &Session) -> bool {
        match self.effective_timeout(session) {
            Some(timeout) => self.elapsed(session) >= timeout,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::{XChaChaCipher, KEY_LEN};
    use crate::store::memory::MemoryStore;
    use parking_lot::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(Utc::now())))
        }

        fn advance_ms(&self, ms: i64) {
            *self.0.lock() += chrono::Duration::milliseconds(ms);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        config: SharedConfig,
        clock: Arc<ManualClock>,
        manager: SessionManager,
    }

    fn fixture(auto_lock_secs: u64) -> Fixture {
        let store = MemoryStore::with_buckets(&["system"]);
        let mut cfg = Config::in_dir("/tmp/coffer-session-test");
        cfg.auto_lock_secs = auto_lock_secs;
        let config = cfg.into_shared();
        let clock = ManualClock::new();
        let manager = SessionManager::new(
            Bucket::new(store.clone(), "system"),
            config.clone(),
            Arc::new(XChaChaCipher::new()),
        )
        .with_clock(clock.clone());
        Fixture {
            store,
            config,
            clock,
            manager,
        }
    }

    fn vault_key() -> Zeroizing<Vec<u8>> {
        random_bytes(KEY_LEN)
    }

    #[test]
    fn cached_key_matches_the_vault_key() {
        let f = fixture(300);
        let key = vault_key();
        f.manager.create_session(&key).unwrap();
        assert!(f.manager.is_valid());
        assert_eq!(f.manager.get_cached_key().unwrap().as_slice(), key.as_slice());
    }

    #[test]
    fn vault_key_is_never_stored_in_the_clear() {
        let f = fixture(300);
        let key = vault_key();
        f.manager.create_session(&key).unwrap();

        let data = f.store.raw("system", SESSION_DATA_KEY).unwrap();
        let encoded = general_purpose::STANDARD.encode(key.as_slice());
        let text = String::from_utf8(data).unwrap();
        assert!(!text.contains(&encoded));

        let session_key = f.store.raw("system", SESSION_KEY_KEY).unwrap();
        assert_eq!(session_key.len(), SESSION_KEY_LEN);
        assert_ne!(session_key, key.to_vec());
    }

    #[test]
    fn session_expires_after_inactivity() {
        let f = fixture(1);
        f.manager.create_session(&vault_key()).unwrap();

        f.clock.advance_ms(500);
        assert!(f.manager.is_valid());
        assert!(f.manager.get_cached_key().is_ok());

        f.clock.advance_ms(1_000);
        assert!(!f.manager.is_valid());
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::SessionExpired)
        ));
        // The sealed key is still stored; only the timer gates it.
        assert!(f.store.raw("system", SESSION_DATA_KEY).is_some());
    }

    #[test]
    fn activity_extends_the_session() {
        let f = fixture(1);
        f.manager.create_session(&vault_key()).unwrap();
        f.clock.advance_ms(800);
        f.manager.update_activity().unwrap();
        f.clock.advance_ms(800);
        assert!(f.manager.is_valid());
        let session = f.manager.load_session().unwrap().unwrap();
        assert!(session.last_activity_at > session.unlocked_at);
    }

    #[test]
    fn zero_live_timeout_never_expires() {
        let f = fixture(1);
        f.manager.create_session(&vault_key()).unwrap();
        f.config.write().auto_lock_secs = 0;
        f.clock.advance_ms(10 * 24 * 3600 * 1000);
        assert!(f.manager.is_valid());
        assert!(f.manager.get_cached_key().is_ok());
        assert_eq!(f.manager.remaining_time(), Duration::MAX);
    }

    #[test]
    fn lowering_the_timeout_applies_to_existing_sessions() {
        let f = fixture(600);
        f.manager.create_session(&vault_key()).unwrap();
        f.clock.advance_ms(120_000);
        assert!(f.manager.is_valid());

        f.config.write().auto_lock_secs = 60;
        assert!(!f.manager.is_valid());
    }

    #[test]
    fn raising_the_timeout_does_not_extend_existing_sessions() {
        let f = fixture(60);
        f.manager.create_session(&vault_key()).unwrap();
        f.config.write().auto_lock_secs = 3600;
        f.clock.advance_ms(90_000);
        assert!(!f.manager.is_valid());
    }

    #[test]
    fn session_recorded_without_limit_expires_once_autolock_is_enabled() {
        let f = fixture(0);
        f.manager.create_session(&vault_key()).unwrap();
        assert_eq!(
            f.manager.load_session().unwrap().unwrap().timeout_seconds,
            0
        );
        assert!(f.manager.is_valid());

        f.config.write().auto_lock_secs = 60;
        assert!(!f.manager.is_valid());
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::SessionExpired)
        ));
        assert_eq!(f.manager.remaining_time(), Duration::ZERO);
    }

    #[test]
    fn update_activity_does_not_create_a_session() {
        let f = fixture(300);
        assert!(matches!(
            f.manager.update_activity(),
            Err(VaultError::NoActiveSession)
        ));
        assert!(f.store.raw("system", SESSION_DATA_KEY).is_none());
    }

    #[test]
    fn no_session_means_no_key() {
        let f = fixture(300);
        assert!(!f.manager.is_valid());
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::NoActiveSession)
        ));
        assert_eq!(f.manager.remaining_time(), Duration::ZERO);
    }

    #[test]
    fn clear_removes_both_records_and_is_idempotent() {
        let f = fixture(300);
        f.manager.create_session(&vault_key()).unwrap();
        f.manager.clear().unwrap();
        assert!(f.store.raw("system", SESSION_DATA_KEY).is_none());
        assert!(f.store.raw("system", SESSION_KEY_KEY).is_none());
        f.manager.clear().unwrap();
        assert!(!f.manager.is_valid());
    }

    #[test]
    fn corrupted_session_data_is_rejected() {
        let f = fixture(300);
        f.manager.create_session(&vault_key()).unwrap();
        let system = Bucket::new(f.store.clone(), "system");
        system.put(SESSION_DATA_KEY, b"\xff\x00garbage").unwrap();

        assert!(!f.manager.is_valid());
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::SessionCorrupted(_))
        ));
        assert_eq!(f.manager.remaining_time(), Duration::ZERO);
    }

    #[test]
    fn sealed_key_under_a_different_session_key_is_corrupted() {
        let f = fixture(300);
        f.manager.create_session(&vault_key()).unwrap();
        let system = Bucket::new(f.store.clone(), "system");
        system.put(SESSION_KEY_KEY, &random_bytes(SESSION_KEY_LEN)).unwrap();
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::SessionCorrupted(_))
        ));
    }

    #[test]
    fn missing_session_key_is_corrupted() {
        let f = fixture(300);
        f.manager.create_session(&vault_key()).unwrap();
        let system = Bucket::new(f.store.clone(), "system");
        system.delete(SESSION_KEY_KEY).unwrap();
        assert!(matches!(
            f.manager.get_cached_key(),
            Err(VaultError::SessionCorrupted(_))
        ));
    }

    #[test]
    fn remaining_time_counts_down() {
        let f = fixture(300);
        f.manager.create_session(&vault_key()).unwrap();
        f.clock.advance_ms(100_000);
        assert_eq!(f.manager.remaining_time(), Duration::from_secs(200));
        f.clock.advance_ms(500_000);
        assert_eq!(f.manager.remaining_time(), Duration::ZERO);
    }
}
