//! Pluggable persistence for the entity database.
//!
//! A [`Persistence`] stores device headers and class records. The database
//! layers all tree semantics on top of these few operations, so every
//! backend behaves identically apart from durability.

mod kv;
mod lazy;
mod volatile;

pub use kv::KvPersistence;
pub use lazy::{LazyMetadata, LazyPersistence};
pub use volatile::VolatilePersistence;

use crate::error::DatabaseResult;
use crate::record::{ClassRecord, DeviceHeader, DeviceRecord};

/// Result of flushing one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The backend writes through; there is never anything to flush.
    NotApplicable,
    /// Nothing changed since the last flush.
    Clean,
    /// The device tree was written.
    Written,
    /// A pending removal was applied; the device needs no more flushing.
    Deleted,
    /// The backend has no metadata for the device.
    Unknown,
}

impl FlushOutcome {
    /// Returns true once the device no longer needs periodic flushing.
    pub fn is_final(self) -> bool {
        matches!(self, FlushOutcome::Deleted | FlushOutcome::Unknown | FlushOutcome::NotApplicable)
    }
}

/// Storage of device headers and class records.
pub trait Persistence: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Lists the stored device ids.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be listed.
    fn device_ids(&self) -> DatabaseResult<Vec<String>>;

    /// Reads a device header.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn read_header(&self, device_id: &str) -> DatabaseResult<Option<DeviceHeader>>;

    /// Writes a device header, leaving its classes untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_header(&self, header: &DeviceHeader) -> DatabaseResult<()>;

    /// Reads one class record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be read.
    fn read_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<Option<ClassRecord>>;

    /// Writes one class record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_class(&self, device_id: &str, class: &ClassRecord) -> DatabaseResult<()>;

    /// Deletes one class record. Missing classes are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_class(&self, device_id: &str, class_id: u16) -> DatabaseResult<()>;

    /// Replaces any existing tree for the device with an empty one.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn create_device(&self, header: &DeviceHeader) -> DatabaseResult<()>;

    /// Deletes a device and all of its classes. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_device(&self, device_id: &str) -> DatabaseResult<bool>;

    /// Reads a device header together with all its classes.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be read.
    fn read_device(&self, device_id: &str) -> DatabaseResult<Option<DeviceRecord>> {
        let Some(header) = self.read_header(device_id)? else {
            return Ok(None);
        };
        let mut record = DeviceRecord::new(header);
        for class_id in record.header.class_ids.clone() {
            if let Some(class) = self.read_class(device_id, class_id)? {
                record.classes.insert(class_id, class);
            }
        }
        Ok(Some(record))
    }

    /// Pushes unflushed changes of one device to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or delete fails; the device stays dirty.
    fn flush(&self, _device_id: &str) -> DatabaseResult<FlushOutcome> {
        Ok(FlushOutcome::NotApplicable)
    }

    /// Returns true if changes only reach durable storage through [`flush`](Self::flush).
    fn is_lazy(&self) -> bool {
        false
    }
}
