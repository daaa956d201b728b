//! SQLite-backed bucketed byte store.
//!
//! Buckets map to rows of a `buckets` table; values live in `entries` keyed by
//! `(bucket, key)`. SQLite's file locking gives single-writer exclusivity
//! across processes; `busy_timeout` bounds how long a second process waits.

use std::fs;
use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::store::{KvStore, StoreError};

const SCHEMA_VERSION: i32 = 1;
const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::backend(err)
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                restrict_dir_permissions(parent);
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        restrict_file_permissions(path);

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        debug!("opened store at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;
        let current: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current < 1 {
            Self::migrate_v1(&conn)?;
        }
        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS buckets (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS entries (
                bucket TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (bucket, key),
                FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
            );
            "#,
        )?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    fn ensure_bucket(conn: &Connection, bucket: &str) -> Result<(), StoreError> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM buckets WHERE name = ?1",
                params![bucket],
                |_| Ok(()),
            )
            .optional()?;
        match exists {
            Some(()) => Ok(()),
            None => Err(StoreError::BucketNotFound(bucket.to_string())),
        }
    }
}

impl KvStore for SqliteStore {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::ensure_bucket(&conn, bucket)?;
        conn.execute(
            "INSERT INTO entries (bucket, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(bucket, key) DO UPDATE SET value = excluded.value",
            params![bucket, key, value],
        )?;
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn.lock();
        Self::ensure_bucket(&conn, bucket)?;
        conn.query_row(
            "SELECT value FROM entries WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        Self::ensure_bucket(&conn, bucket)?;
        let removed = conn.execute(
            "DELETE FROM entries WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        Self::ensure_bucket(&conn, bucket)?;
        let mut stmt = conn.prepare("SELECT key FROM entries WHERE bucket = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![bucket], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO buckets (name) VALUES (?1)",
            params![bucket],
        )?;
        Ok(())
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}

fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!("cannot restrict permissions on {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_bucket("system").unwrap();
        store.create_bucket("secrets").unwrap();
        store
    }

    #[test]
    fn put_get_overwrite() {
        let store = store();
        store.put("system", "salt", b"one").unwrap();
        assert_eq!(store.get("system", "salt").unwrap(), b"one");
        store.put("system", "salt", b"two").unwrap();
        assert_eq!(store.get("system", "salt").unwrap(), b"two");
    }

    #[test]
    fn missing_key_and_bucket() {
        let store = store();
        assert!(matches!(
            store.get("system", "nope"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.put("unknown", "k", b"v"),
            Err(StoreError::BucketNotFound(_))
        ));
        assert!(matches!(
            store.list_keys("unknown"),
            Err(StoreError::BucketNotFound(_))
        ));
    }

    #[test]
    fn delete_reports_missing_keys() {
        let store = store();
        store.put("secrets", "a", b"1").unwrap();
        store.delete("secrets", "a").unwrap();
        assert!(store.delete("secrets", "a").unwrap_err().is_not_found());
    }

    #[test]
    fn list_keys_is_sorted_and_bucket_scoped() {
        let store = store();
        store.put("secrets", "b", b"2").unwrap();
        store.put("secrets", "a", b"1").unwrap();
        store.put("system", "c", b"3").unwrap();
        assert_eq!(store.list_keys("secrets").unwrap(), vec!["a", "b"]);
        assert_eq!(store.list_keys("system").unwrap(), vec!["c"]);
    }

    #[test]
    fn create_bucket_is_idempotent() {
        let store = store();
        store.put("system", "k", b"v").unwrap();
        store.create_bucket("system").unwrap();
        assert_eq!(store.get("system", "k").unwrap(), b"v");
    }

    #[test]
    fn engine_errors_surface_as_backend_failures() {
        let store = store();
        let err = store
            .conn
            .lock()
            .execute("INSERT INTO no_such_table VALUES (1)", [])
            .map_err(StoreError::from)
            .unwrap_err();
        match err {
            StoreError::Backend(source) => {
                assert!(source.downcast_ref::<rusqlite::Error>().is_some());
            }
            other => panic!("expected a backend error, got {other:?}"),
        }
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("coffer.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_bucket("system").unwrap();
            store.put("system", "salt", b"abc").unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("system", "salt").unwrap(), b"abc");
    }
}
