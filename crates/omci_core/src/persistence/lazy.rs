//! Lazy write-behind persistence.

use super::{FlushOutcome, Persistence, VolatilePersistence};
use crate::error::{DatabaseError, DatabaseResult};
use crate::record::{ClassRecord, DeviceHeader, DeviceRecord};
use crate::types::{now_millis, Timestamp};
use omci_storage::{join_key, KvStore};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Per-device write-behind bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LazyMetadata {
    /// When the device was last written to the store.
    pub last_lazy_write: Option<Timestamp>,
    /// The in-memory tree has changes the store does not.
    pub dirty: bool,
    /// The device was removed; the next flush deletes it from the store.
    pub pending_delete: bool,
}

/// Keeps a working copy in memory and writes whole device trees on flush.
///
/// Each device is stored as one blob at `{namespace}/{device_id}`. A device
/// found in the store but not in memory is restored on first access and
/// starts clean; a newly created device starts dirty.
pub struct LazyPersistence {
    memory: VolatilePersistence,
    store: Arc<dyn KvStore>,
    namespace: String,
    metadata: RwLock<HashMap<String, LazyMetadata>>,
}

impl LazyPersistence {
    /// Creates a lazy writer rooted at `namespace` inside `store`.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            memory: VolatilePersistence::new(),
            store,
            namespace: namespace.into(),
            metadata: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the write-behind state of a device.
    pub fn metadata(&self, device_id: &str) -> Option<LazyMetadata> {
        self.metadata.read().get(device_id).copied()
    }

    fn device_key(&self, device_id: &str) -> String {
        join_key(&[&self.namespace, device_id])
    }

    fn mark_dirty(&self, device_id: &str) {
        self.metadata
            .write()
            .entry(device_id.to_string())
            .or_default()
            .dirty = true;
    }

    /// Loads a stored device into memory if it is not there yet.
    fn ensure_loaded(&self, device_id: &str) -> DatabaseResult<()> {
        if self.memory.contains(device_id) {
            return Ok(());
        }
        if self.metadata(device_id).is_some_and(|m| m.pending_delete) {
            return Ok(());
        }
        let key = self.device_key(device_id);
        let Some(bytes) = self.store.get(&key)? else {
            return Ok(());
        };
        let record: DeviceRecord = omci_codec::from_cbor(&bytes)
            .map_err(|e| DatabaseError::corrupted(&key, e.to_string()))?;
        self.memory.insert_record(record);
        self.metadata.write().insert(
            device_id.to_string(),
            LazyMetadata {
                last_lazy_write: Some(now_millis()),
                dirty: false,
                pending_delete: false,
            },
        );
        tracing::debug!(device_id, "recovered device from storage");
        Ok(())
    }
}

impl Persistence for LazyPersistence {
    fn name(&self) -> &'static str {
        "lazy"
    }

    fn device_ids(&self) -> DatabaseResult<Vec<String>> {
        let prefix = format!("{}/", self.namespace.trim_end_matches('/'));
        let mut ids: BTreeSet<String> = self.memory.device_ids()?.into_iter().collect();
        for key in self.store.keys(&prefix)? {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    ids.insert(rest.to_string());
                }
            }
        }
        let metadata = self.metadata.read();
        Ok(ids
            .into_iter()
            .filter(|id| !metadata.get(id).is_some_and(|m| m.pending_delete))
            .collect())
    }

    fn read_header(&self, device_id: &str) -> DatabaseResult<Option<DeviceHeader>> {
        self.ensure_loaded(device_id)?;
        self.memory.read_header(device_id)
    }

    fn write_header(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        self.ensure_loaded(&header.device_id)?;
        self.memory.write_header(header)?;
        self.mark_dirty(&header.device_id);
        Ok(())
    }

    fn read_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<Option<ClassRecord>> {
        self.ensure_loaded(device_id)?;
        self.memory.read_class(device_id, class_id)
    }

    fn write_class(&self, device_id: &str, class: &ClassRecord) -> DatabaseResult<()> {
        self.ensure_loaded(device_id)?;
        self.memory.write_class(device_id, class)?;
        self.mark_dirty(device_id);
        Ok(())
    }

    fn delete_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<()> {
        self.ensure_loaded(device_id)?;
        self.memory.delete_class(device_id, class_id)?;
        self.mark_dirty(device_id);
        Ok(())
    }

    fn create_device(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        self.memory.create_device(header)?;
        let mut metadata = self.metadata.write();
        let entry = metadata.entry(header.device_id.clone()).or_default();
        entry.dirty = true;
        entry.pending_delete = false;
        tracing::debug!(device_id = %header.device_id, "added device for lazy sync");
        Ok(())
    }

    fn delete_device(&self, device_id: &str) -> DatabaseResult<bool> {
        self.ensure_loaded(device_id)?;
        let existed = self.memory.delete_device(device_id)?;
        let mut metadata = self.metadata.write();
        let entry = metadata.entry(device_id.to_string()).or_default();
        entry.dirty = true;
        entry.pending_delete = true;
        tracing::debug!(device_id, "set lazy sync remove flag");
        Ok(existed)
    }

    fn read_device(&self, device_id: &str) -> DatabaseResult<Option<DeviceRecord>> {
        self.ensure_loaded(device_id)?;
        self.memory.read_device(device_id)
    }

    fn flush(&self, device_id: &str) -> DatabaseResult<FlushOutcome> {
        let Some(meta) = self.metadata(device_id) else {
            return Ok(FlushOutcome::Unknown);
        };
        if !meta.dirty {
            tracing::trace!(device_id, "clean cache, checking later");
            return Ok(FlushOutcome::Clean);
        }

        let key = self.device_key(device_id);
        if meta.pending_delete {
            self.store.delete(&key)?;
            self.metadata.write().remove(device_id);
            tracing::debug!(device_id, "removed synced data");
            return Ok(FlushOutcome::Deleted);
        }

        let Some(record) = self.memory.read_device(device_id)? else {
            return Ok(FlushOutcome::Unknown);
        };
        let bytes = omci_codec::to_cbor(&record)?;
        self.store.set(&key, &bytes)?;
        if let Some(entry) = self.metadata.write().get_mut(device_id) {
            entry.dirty = false;
            entry.last_lazy_write = Some(now_millis());
        }
        tracing::debug!(device_id, bytes = bytes.len(), "synced dirty device");
        Ok(FlushOutcome::Written)
    }

    fn is_lazy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omci_storage::InMemoryKvStore;

    fn setup() -> (Arc<InMemoryKvStore>, LazyPersistence) {
        let store = Arc::new(InMemoryKvStore::new());
        let lazy = LazyPersistence::new(store.clone(), "omci_mibs");
        (store, lazy)
    }

    #[test]
    fn new_device_is_dirty_until_flushed() {
        let (store, lazy) = setup();
        lazy.create_device(&DeviceHeader::new("onu-1", 1)).unwrap();
        assert!(store.is_empty());
        assert!(lazy.metadata("onu-1").unwrap().dirty);

        assert_eq!(lazy.flush("onu-1").unwrap(), FlushOutcome::Written);
        assert!(store.get("omci_mibs/onu-1").unwrap().is_some());
        let meta = lazy.metadata("onu-1").unwrap();
        assert!(!meta.dirty);
        assert!(meta.last_lazy_write.is_some());

        assert_eq!(lazy.flush("onu-1").unwrap(), FlushOutcome::Clean);
    }

    #[test]
    fn writes_mark_dirty() {
        let (_store, lazy) = setup();
        lazy.create_device(&DeviceHeader::new("onu-1", 1)).unwrap();
        lazy.flush("onu-1").unwrap();

        lazy.write_class("onu-1", &ClassRecord::new(6)).unwrap();
        assert!(lazy.metadata("onu-1").unwrap().dirty);
    }

    #[test]
    fn pending_delete_removes_remote_record() {
        let (store, lazy) = setup();
        lazy.create_device(&DeviceHeader::new("onu-1", 1)).unwrap();
        lazy.flush("onu-1").unwrap();

        assert!(lazy.delete_device("onu-1").unwrap());
        let meta = lazy.metadata("onu-1").unwrap();
        assert!(meta.dirty && meta.pending_delete);
        // the stored copy must not resurrect the device
        assert!(lazy.read_header("onu-1").unwrap().is_none());

        assert_eq!(lazy.flush("onu-1").unwrap(), FlushOutcome::Deleted);
        assert!(store.is_empty());
        assert!(lazy.metadata("onu-1").is_none());
        assert_eq!(lazy.flush("onu-1").unwrap(), FlushOutcome::Unknown);
    }

    #[test]
    fn stored_device_restored_clean() {
        let (store, lazy) = setup();
        lazy.create_device(&DeviceHeader::new("onu-1", 7)).unwrap();
        lazy.flush("onu-1").unwrap();

        let restarted = LazyPersistence::new(store, "omci_mibs");
        assert_eq!(restarted.device_ids().unwrap(), vec!["onu-1".to_string()]);
        let header = restarted.read_header("onu-1").unwrap().unwrap();
        assert_eq!(header.created, 7);
        assert!(!restarted.metadata("onu-1").unwrap().dirty);
    }

    #[test]
    fn failed_flush_keeps_device_dirty() {
        let (store, lazy) = setup();
        lazy.create_device(&DeviceHeader::new("onu-1", 1)).unwrap();
        store.close();
        assert!(lazy.flush("onu-1").is_err());
        assert!(lazy.metadata("onu-1").unwrap().dirty);
        store.reopen();
        assert_eq!(lazy.flush("onu-1").unwrap(), FlushOutcome::Written);
    }
}
