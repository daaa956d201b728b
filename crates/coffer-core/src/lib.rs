//! coffer-core: the local secrets vault behind the `coffer` command.
//!
//! # Trust chain
//! - The master password is stretched with Argon2id into a 32-byte vault key.
//!   Neither the password nor the key is ever written to disk.
//! - A known token sealed under the vault key at creation proves a later
//!   password correct without touching any stored record.
//! - Between commands the vault key is cached in a session: sealed under a
//!   fresh random session key that is stored in a separate record, and
//!   revoked after a configurable period of inactivity.
//! - Records are XChaCha20-Poly1305 ciphertext, base64-encoded, keyed by id
//!   in a bucketed SQLite table.

pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod models;
pub mod paths;
pub mod records;
pub mod session;
pub mod sqlite;
pub mod store;
pub mod vault;

pub use config::{Config, SharedConfig};
pub use context::VaultContext;
pub use crypto::{Cipher, KdfParams, XChaChaCipher};
pub use error::{Result, VaultError};
pub use models::Secret;
pub use records::SecretStore;
pub use session::{Clock, Session, SessionManager, SystemClock};
pub use sqlite::SqliteStore;
pub use store::{Bucket, KvStore, StoreError};
pub use vault::{Vault, VaultAccess};
