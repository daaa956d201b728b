//! Runtime configuration.
//!
//! Paths and bucket names are fixed per process; the inactivity timeout is
//! persisted in the system bucket and read live by the session manager
//! through [`SharedConfig`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::paths::{self, DB_FILE_NAME};
use crate::store::Bucket;

pub const CONFIG_DATA_KEY: &str = "config:data";

pub const DEFAULT_SYSTEM_BUCKET: &str = "system";
pub const DEFAULT_SECRETS_BUCKET: &str = "secrets";

pub const DEFAULT_AUTO_LOCK_SECS: u64 = 300;
pub const MAX_AUTO_LOCK_SECS: u64 = 86_400;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub system_bucket: String,
    pub secrets_bucket: String,
    /// Inactivity timeout in seconds. 0 disables auto-lock.
    pub auto_lock_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConfig {
    auto_lock_secs: u64,
}

impl Config {
    /// Defaults rooted at the platform data directory (or `COFFER_HOME`).
    pub fn from_env() -> Result<Self> {
        Ok(Self::in_dir(paths::data_dir()?))
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let data_dir = dir.as_ref().to_path_buf();
        Self {
            db_path: data_dir.join(DB_FILE_NAME),
            log_dir: data_dir.join("logs"),
            data_dir,
            system_bucket: DEFAULT_SYSTEM_BUCKET.to_string(),
            secrets_bucket: DEFAULT_SECRETS_BUCKET.to_string(),
            auto_lock_secs: DEFAULT_AUTO_LOCK_SECS,
        }
    }

    pub fn set_auto_lock(&mut self, seconds: u64) -> Result<()> {
        validate_auto_lock(seconds)?;
        self.auto_lock_secs = seconds;
        Ok(())
    }

    pub fn auto_lock_disabled(&self) -> bool {
        self.auto_lock_secs == 0
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

fn validate_auto_lock(seconds: u64) -> Result<()> {
    if seconds > MAX_AUTO_LOCK_SECS {
        return Err(VaultError::InvalidConfig(format!(
            "autolock timeout must be at most {MAX_AUTO_LOCK_SECS} seconds (24 hours)"
        )));
    }
    Ok(())
}

/// Overlay the persisted settings on `base`. Missing settings keep the base values.
pub fn load(system: &Bucket, base: Config) -> Result<Config> {
    let mut cfg = base;
    let Some(data) = system.get_optional(CONFIG_DATA_KEY)? else {
        return Ok(cfg);
    };
    if data.is_empty() {
        return Ok(cfg);
    }
    let stored: StoredConfig =
        serde_json::from_slice(&data).map_err(VaultError::DeserializationFailed)?;
    cfg.set_auto_lock(stored.auto_lock_secs)?;
    Ok(cfg)
}

pub fn save(system: &Bucket, cfg: &Config) -> Result<()> {
    let stored = StoredConfig {
        auto_lock_secs: cfg.auto_lock_secs,
    };
    let payload = serde_json::to_vec(&stored).map_err(VaultError::SerializationFailed)?;
    system.put(CONFIG_DATA_KEY, &payload)?;
    Ok(())
}
