//! Key-value store trait definition.

use crate::error::{StorageError, StorageResult};
use crate::watch::KvEvent;
use std::sync::mpsc::Receiver;

/// A byte-level key-value store.
///
/// Keys are `/`-separated paths such as `omci_mibs/onu-1/classes/256`.
/// Values are opaque blobs.
///
/// # Invariants
///
/// - `get` after `set` on the same key returns exactly the bytes written
/// - `delete` of a missing key is not an error and returns `false`
/// - `keys(prefix)` returns every live key starting with `prefix`, sorted
/// - Every successful `set`/`delete` is reported to matching watchers
///
/// # Implementors
///
/// - [`super::InMemoryKvStore`] - For testing
/// - [`super::FileKvStore`] - For persistent storage
pub trait KvStore: Send + Sync {
    /// Reads the value stored at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the read fails.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Deletes `key`. Returns whether a value was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the delete fails.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Lists the keys starting with `prefix`, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Subscribes to changes of keys starting with `prefix`.
    ///
    /// The receiver should be drained regularly; dropping it unsubscribes.
    fn watch(&self, prefix: &str) -> Receiver<KvEvent>;

    /// Deletes every key starting with `prefix`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns the first error hit while listing or deleting.
    fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut removed = 0;
        for key in self.keys(prefix)? {
            if self.delete(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Checks that `key` is usable by every store implementation.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for empty keys, empty path
/// components and keys containing NUL.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_key(key, "key is empty"));
    }
    if key.contains('\0') {
        return Err(StorageError::invalid_key(key, "key contains NUL"));
    }
    if key.split('/').any(str::is_empty) {
        return Err(StorageError::invalid_key(key, "key has an empty path component"));
    }
    Ok(())
}

/// Joins path components into a store key, skipping empty parts.
#[must_use]
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
