use directories::ProjectDirs;
use std::path::PathBuf;

use crate::error::{Result, VaultError};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "coffer";
pub const APP_NAME: &str = "coffer";

pub const DB_FILE_NAME: &str = "coffer.db";
pub const LOG_FILE_NAME: &str = "coffer.log";

/// Overrides the platform data directory.
pub const HOME_ENV: &str = "COFFER_HOME";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(HOME_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| VaultError::InvalidConfig("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}
