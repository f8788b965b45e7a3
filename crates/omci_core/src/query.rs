//! Decoded views returned by queries.

use crate::types::Timestamp;
use omci_codec::AttributeMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// One instance with decoded attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceView {
    /// Class id.
    pub class_id: u16,
    /// Instance id.
    pub instance_id: u16,
    /// Creation time.
    pub created: Timestamp,
    /// Last modification time.
    pub modified: Timestamp,
    /// Decoded attributes.
    pub attributes: AttributeMap,
}

/// One class with all its decoded instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassView {
    /// Class id.
    pub class_id: u16,
    /// Instances keyed by instance id.
    pub instances: BTreeMap<u16, InstanceView>,
}

/// A whole device tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceView {
    /// Device id.
    pub device_id: String,
    /// Creation time.
    pub created: Timestamp,
    /// Last modification time.
    pub modified: Timestamp,
    /// Last full synchronization.
    pub last_sync_time: Option<Timestamp>,
    /// MIB data sync counter.
    pub mib_data_sync: u8,
    /// Last alarm sequence number.
    pub last_alarm_sequence: u8,
    /// Record version.
    pub version: u32,
    /// Supported managed entities.
    pub supported_managed_entities: BTreeMap<u16, String>,
    /// Supported message type codes.
    pub message_types: Vec<u8>,
    /// Classes keyed by class id.
    pub classes: BTreeMap<u16, ClassView>,
}

impl DeviceView {
    /// Iterates over every instance as `((class_id, instance_id), attributes)`.
    pub fn instances(&self) -> impl Iterator<Item = ((u16, u16), &AttributeMap)> {
        self.classes.values().flat_map(|class| {
            class
                .instances
                .values()
                .map(|i| ((i.class_id, i.instance_id), &i.attributes))
        })
    }

    /// Collects every instance into a map keyed by `(class_id, instance_id)`.
    pub fn instance_map(&self) -> BTreeMap<(u16, u16), AttributeMap> {
        self.instances().map(|(k, v)| (k, v.clone())).collect()
    }
}

/// Result of a hierarchical query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Nothing at the requested class or instance.
    Empty,
    /// A whole device.
    Device(DeviceView),
    /// One class.
    Class(ClassView),
    /// One instance, possibly filtered to some attributes.
    Instance(InstanceView),
}

impl QueryResult {
    /// Returns true for [`QueryResult::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, QueryResult::Empty)
    }

    /// Returns the device view, if any.
    pub fn into_device(self) -> Option<DeviceView> {
        match self {
            QueryResult::Device(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the class view, if any.
    pub fn into_class(self) -> Option<ClassView> {
        match self {
            QueryResult::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the instance view, if any.
    pub fn into_instance(self) -> Option<InstanceView> {
        match self {
            QueryResult::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Returns the attributes of an instance result.
    pub fn attributes(&self) -> Option<&AttributeMap> {
        match self {
            QueryResult::Instance(i) => Some(&i.attributes),
            _ => None,
        }
    }
}
