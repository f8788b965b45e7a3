//! In-memory key-value store.

use crate::error::{StorageError, StorageResult};
use crate::kv::{validate_key, KvStore};
use crate::watch::{KvEvent, WatchRegistry};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;

/// An in-memory key-value store.
///
/// Suitable for:
/// - Unit and integration tests
/// - Deployments that do not need the MIB to survive a restart
///
/// # Thread Safety
///
/// The store is thread-safe and is usually shared behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use omci_storage::{InMemoryKvStore, KvStore};
///
/// let store = InMemoryKvStore::new();
/// store.set("a/b", b"1").unwrap();
/// assert!(store.delete("a/b").unwrap());
/// assert!(!store.delete("a/b").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    watchers: WatchRegistry,
    closed: AtomicBool,
}

impl InMemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing recovery from a previous run.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<u8>)>,
        K: Into<String>,
    {
        Self {
            data: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..Self::default()
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns a copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.read().clone()
    }

    /// Makes every further operation fail with [`StorageError::Closed`].
    ///
    /// Lets tests exercise a backend outage.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Undoes [`close`](Self::close).
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.check_open()?;
        validate_key(key)?;
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.check_open()?;
        validate_key(key)?;
        self.data.write().insert(key.to_string(), value.to_vec());
        self.watchers.emit(&KvEvent::set(key, value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.check_open()?;
        validate_key(key)?;
        let existed = self.data.write().remove(key).is_some();
        if existed {
            self.watchers.emit(&KvEvent::delete(key));
        }
        Ok(existed)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_open()?;
        Ok(self
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn watch(&self, prefix: &str) -> Receiver<KvEvent> {
        self.watchers.subscribe(prefix)
    }
}
