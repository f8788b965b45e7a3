//! In-memory persistence.

use super::Persistence;
use crate::error::DatabaseResult;
use crate::record::{ClassRecord, DeviceHeader, DeviceRecord};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Keeps every device tree in memory.
#[derive(Debug, Default)]
pub struct VolatilePersistence {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl VolatilePersistence {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a whole device tree, replacing any existing one.
    pub fn insert_record(&self, record: DeviceRecord) {
        self.devices
            .write()
            .insert(record.header.device_id.clone(), record);
    }

    /// Returns true if the device is held in memory.
    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.read().contains_key(device_id)
    }
}

impl Persistence for VolatilePersistence {
    fn name(&self) -> &'static str {
        "volatile"
    }

    fn device_ids(&self) -> DatabaseResult<Vec<String>> {
        let mut ids: Vec<String> = self.devices.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn read_header(&self, device_id: &str) -> DatabaseResult<Option<DeviceHeader>> {
        Ok(self.devices.read().get(device_id).map(|d| d.header.clone()))
    }

    fn write_header(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        let mut devices = self.devices.write();
        match devices.get_mut(&header.device_id) {
            Some(record) => record.header = header.clone(),
            None => {
                devices.insert(header.device_id.clone(), DeviceRecord::new(header.clone()));
            }
        }
        Ok(())
    }

    fn read_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<Option<ClassRecord>> {
        Ok(self
            .devices
            .read()
            .get(device_id)
            .and_then(|d| d.classes.get(&class_id).cloned()))
    }

    fn write_class(&self, device_id: &str, class: &ClassRecord) -> DatabaseResult<()> {
        if let Some(record) = self.devices.write().get_mut(device_id) {
            record.classes.insert(class.class_id, class.clone());
        }
        Ok(())
    }

    fn delete_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<()> {
        if let Some(record) = self.devices.write().get_mut(device_id) {
            record.classes.remove(&class_id);
        }
        Ok(())
    }

    fn create_device(&self, header: &DeviceHeader) -> DatabaseResult<()> {
        self.insert_record(DeviceRecord::new(header.clone()));
        Ok(())
    }

    fn delete_device(&self, device_id: &str) -> DatabaseResult<bool> {
        Ok(self.devices.write().remove(device_id).is_some())
    }

    fn read_device(&self, device_id: &str) -> DatabaseResult<Option<DeviceRecord>> {
        Ok(self.devices.read().get(device_id).cloned())
    }
}
