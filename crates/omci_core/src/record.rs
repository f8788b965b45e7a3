//! Persisted device, class and instance records.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Format version written into new device headers.
pub const RECORD_VERSION: u32 = 1;

/// One managed-entity instance with its encoded attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance (entity) id.
    pub instance_id: u16,
    /// Creation time.
    pub created: Timestamp,
    /// Last time any attribute changed.
    pub modified: Timestamp,
    /// Attribute name to codec-encoded value.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl InstanceRecord {
    /// Creates an instance record stamped with `now`.
    pub fn new(instance_id: u16, now: Timestamp, attributes: BTreeMap<String, String>) -> Self {
        Self {
            instance_id,
            created: now,
            modified: now,
            attributes,
        }
    }
}

/// One managed-entity class with all of its instances.
///
/// This is the unit stored under `{device_id}/classes/{class_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Class id.
    pub class_id: u16,
    /// Instances keyed by instance id.
    #[serde(default)]
    pub instances: BTreeMap<u16, InstanceRecord>,
}

impl ClassRecord {
    /// Creates an empty class record.
    pub fn new(class_id: u16) -> Self {
        Self {
            class_id,
            instances: BTreeMap::new(),
        }
    }
}

/// Device-level bookkeeping stored under `{device_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHeader {
    /// Device id.
    pub device_id: String,
    /// Creation time.
    pub created: Timestamp,
    /// Last modification of anything under the device.
    pub modified: Timestamp,
    /// Time of the last completed full synchronization.
    #[serde(default)]
    pub last_sync_time: Option<Timestamp>,
    /// MIB data sync counter as last agreed with the device.
    #[serde(default)]
    pub mib_data_sync: u8,
    /// Last alarm notification sequence number seen.
    #[serde(default)]
    pub last_alarm_sequence: u8,
    /// Record format version.
    pub version: u32,
    /// Classes with at least one instance.
    #[serde(default)]
    pub class_ids: BTreeSet<u16>,
    /// Managed entities the device reported support for (class id to name).
    #[serde(default)]
    pub supported_managed_entities: BTreeMap<u16, String>,
    /// OMCI message type codes the device reported support for.
    #[serde(default)]
    pub message_types: BTreeSet<u8>,
}

impl DeviceHeader {
    /// Creates a fresh header stamped with `now`.
    pub fn new(device_id: impl Into<String>, now: Timestamp) -> Self {
        Self {
            device_id: device_id.into(),
            created: now,
            modified: now,
            last_sync_time: None,
            mib_data_sync: 0,
            last_alarm_sequence: 0,
            version: RECORD_VERSION,
            class_ids: BTreeSet::new(),
            supported_managed_entities: BTreeMap::new(),
            message_types: BTreeSet::new(),
        }
    }
}

/// A device header together with its whole class tree.
///
/// Used by the volatile store and as the lazy writer's single blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Device bookkeeping.
    pub header: DeviceHeader,
    /// Classes keyed by class id.
    #[serde(default)]
    pub classes: BTreeMap<u16, ClassRecord>,
}

impl DeviceRecord {
    /// Creates a device record with no classes.
    pub fn new(header: DeviceHeader) -> Self {
        Self {
            header,
            classes: BTreeMap::new(),
        }
    }

    /// Returns the number of instances across all classes.
    pub fn instance_count(&self) -> usize {
        self.classes.values().map(|c| c.instances.len()).sum()
    }
}
