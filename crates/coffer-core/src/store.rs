//! Bucketed byte storage.
//!
//! The core only needs five operations from its backing store; anything that
//! can provide them (a file database, an in-memory map in tests) can sit
//! behind [`KvStore`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key {key:?} not found in bucket {bucket:?}")]
    NotFound { bucket: String, key: String },

    #[error("bucket {0:?} not found")]
    BucketNotFound(String),

    /// Failure inside the backing engine.
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

pub trait KvStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Fails with [`StoreError::NotFound`] when the key is absent.
    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Keys in ascending byte order.
    fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    /// Idempotent.
    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;
}

/// A store handle bound to a single bucket.
#[derive(Clone)]
pub struct Bucket {
    store: Arc<dyn KvStore>,
    name: String,
}

impl Bucket {
    pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.store.put(&self.name, key, value)
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.store.get(&self.name, key)
    }

    /// `Ok(None)` when the key is absent; other failures propagate.
    pub fn get_optional(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.store.get(&self.name, key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.name, key)
    }

    pub fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        self.store.list_keys(&self.name)
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name).finish()
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};

    /// In-memory store for unit tests.
    #[derive(Default)]
    pub struct MemoryStore {
        buckets: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    }

    impl MemoryStore {
        pub fn with_buckets(names: &[&str]) -> Arc<Self> {
            let store = Self::default();
            for name in names {
                store.create_bucket(name).unwrap();
            }
            Arc::new(store)
        }

        pub fn raw(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
            self.buckets.lock().get(bucket)?.get(key).cloned()
        }
    }

    impl KvStore for MemoryStore {
        fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
            let mut buckets = self.buckets.lock();
            let b = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            b.insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            let buckets = self.buckets.lock();
            let b = buckets
                .get(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            b.get(key).cloned().ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }

        fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
            let mut buckets = self.buckets.lock();
            let b = buckets
                .get_mut(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            b.remove(key).map(|_| ()).ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }

        fn list_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
            let buckets = self.buckets.lock();
            let b = buckets
                .get(bucket)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
            Ok(b.keys().cloned().collect())
        }

        fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
            self.buckets.lock().entry(bucket.to_string()).or_default();
            Ok(())
        }
    }
}
