//! Write-through key-value persistence.

use super::Persistence;
use crate::error::{DatabaseError, DatabaseResult};
use crate::record::{ClassRecord, DeviceHeader};
use omci_storage::{join_key, KvStore};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Writes every change straight to a [`KvStore`].
///
/// Layout under `namespace`:
///
/// - `{device_id}` - the device header
/// - `{device_id}/classes/{class_id}` - one class with all its instances
pub struct KvPersistence {
    store: Arc<dyn KvStore>,
    namespace: String,
}

impl KvPersistence {
    /// Creates a persistence layer rooted at `namespace` inside `store`.
    pub fn new(store: Arc<dyn KvStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Returns the namespace prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn device_key(&self, device_id: &str) -> String {
        join_key(&[&self.namespace, device_id])
    }

    fn classes_prefix(&self, device_id: &str) -> String {
        format!("{}/", join_key(&[&self.namespace, device_id, "classes"]))
    }

    fn class_key(&self, device_id: &str, class_id: u16) -> String {
        join_key(&[&self.namespace, device_id, "classes", &class_id.to_string()])
    }

    fn read_blob<T: DeserializeOwned>(&self, key: &str) -> DatabaseResult<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => omci_codec::from_cbor(&bytes)
                .map(Some)
                .map_err(|e| DatabaseError::corrupted(key, e.to_string())),
            None => Ok(None),
        }
    }
}

impl Persistence for KvPersistence {
    fn name(&self) -> &'static str {
        "kv"
    }

    fn device_ids(&self) -> DatabaseResult<Vec<String>> {
        let prefix = format!("{}/", self.namespace.trim_end_matches('/'));
        Ok(self
            .store
            .keys(&prefix)?
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect())
    }

    fn read_header(&self, device_id: &str) -> DatabaseResult<Option<DeviceHeader>> {
        self.read_blob(&self.device_key(device_id))
    }

    fn write_header(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        let bytes = omci_codec::to_cbor(header)?;
        self.store.set(&self.device_key(&header.device_id), &bytes)?;
        Ok(())
    }

    fn read_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<Option<ClassRecord>> {
        self.read_blob(&self.class_key(device_id, class_id))
    }

    fn write_class(&self, device_id: &str, class: &ClassRecord) -> DatabaseResult<()> {
        let bytes = omci_codec::to_cbor(class)?;
        self.store
            .set(&self.class_key(device_id, class.class_id), &bytes)?;
        Ok(())
    }

    fn delete_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<()> {
        self.store.delete(&self.class_key(device_id, class_id))?;
        Ok(())
    }

    fn create_device(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        self.store.delete_prefix(&self.classes_prefix(&header.device_id))?;
        self.write_header(header)
    }

    fn delete_device(&self, device_id: &str) -> DatabaseResult<bool> {
        self.store.delete_prefix(&self.classes_prefix(device_id))?;
        Ok(self.store.delete(&self.device_key(device_id))?)
    }
}
