//! Managed-entity capability catalog.
//!
//! Holds, per class, the attributes, message types and alarm numbers the
//! engine may see. Inbound notifications are validated against it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Well-known managed-entity class ids.
pub mod class_ids {
    /// ONT Data.
    pub const ONT_DATA: u16 = 2;
    /// Circuit Pack.
    pub const CIRCUIT_PACK: u16 = 6;
    /// Software Image.
    pub const SOFTWARE_IMAGE: u16 = 7;
    /// Physical Path Termination Point Ethernet UNI.
    pub const PPTP_ETHERNET_UNI: u16 = 11;
    /// IP Host Config Data.
    pub const IP_HOST_CONFIG_DATA: u16 = 134;
    /// ONT-G.
    pub const ONT_G: u16 = 256;
    /// ONT2-G.
    pub const ONT2_G: u16 = 257;
    /// ANI-G.
    pub const ANI_G: u16 = 263;
    /// OMCI.
    pub const OMCI: u16 = 287;
}

/// OMCI message types relevant to synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Create an instance.
    Create,
    /// Delete an instance.
    Delete,
    /// Set attributes.
    Set,
    /// Get attributes.
    Get,
    /// Get all alarms.
    GetAllAlarms,
    /// Get all alarms next.
    GetAllAlarmsNext,
    /// MIB upload.
    MibUpload,
    /// MIB upload next.
    MibUploadNext,
    /// MIB reset.
    MibReset,
    /// Autonomous alarm notification.
    AlarmNotification,
    /// Autonomous attribute value change.
    AttributeValueChange,
    /// Test.
    Test,
    /// Reboot.
    Reboot,
}

impl MessageType {
    /// Returns the OMCI message type code.
    pub const fn code(self) -> u8 {
        match self {
            MessageType::Create => 4,
            MessageType::Delete => 6,
            MessageType::Set => 8,
            MessageType::Get => 9,
            MessageType::GetAllAlarms => 11,
            MessageType::GetAllAlarmsNext => 12,
            MessageType::MibUpload => 13,
            MessageType::MibUploadNext => 14,
            MessageType::MibReset => 15,
            MessageType::AlarmNotification => 16,
            MessageType::AttributeValueChange => 17,
            MessageType::Test => 18,
            MessageType::Reboot => 19,
        }
    }

    /// Looks up a message type by code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.code() == code)
    }

    const ALL: [MessageType; 13] = [
        MessageType::Create,
        MessageType::Delete,
        MessageType::Set,
        MessageType::Get,
        MessageType::GetAllAlarms,
        MessageType::GetAllAlarmsNext,
        MessageType::MibUpload,
        MessageType::MibUploadNext,
        MessageType::MibReset,
        MessageType::AlarmNotification,
        MessageType::AttributeValueChange,
        MessageType::Test,
        MessageType::Reboot,
    ];
}

/// What one managed-entity class supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCapabilities {
    /// Class id.
    pub class_id: u16,
    /// Human readable class name.
    pub name: String,
    /// Attribute names.
    pub attributes: BTreeSet<String>,
    /// Message types the class accepts or emits.
    pub message_types: BTreeSet<MessageType>,
    /// Alarm numbers the class can raise.
    pub alarms: BTreeSet<u8>,
}

impl ClassCapabilities {
    /// Creates a capability entry with no attributes, messages or alarms.
    pub fn new(class_id: u16, name: impl Into<String>) -> Self {
        Self {
            class_id,
            name: name.into(),
            attributes: BTreeSet::new(),
            message_types: BTreeSet::new(),
            alarms: BTreeSet::new(),
        }
    }

    /// Adds attribute names.
    #[must_use]
    pub fn with_attributes(mut self, names: &[&str]) -> Self {
        self.attributes.extend(names.iter().map(|n| (*n).to_string()));
        self
    }

    /// Adds message types.
    #[must_use]
    pub fn with_messages(mut self, messages: &[MessageType]) -> Self {
        self.message_types.extend(messages.iter().copied());
        self
    }

    /// Adds alarm numbers.
    #[must_use]
    pub fn with_alarms(mut self, alarms: &[u8]) -> Self {
        self.alarms.extend(alarms.iter().copied());
        self
    }

    /// Returns true if the class can report alarm notifications.
    pub fn supports_alarms(&self) -> bool {
        self.message_types.contains(&MessageType::AlarmNotification) && !self.alarms.is_empty()
    }
}

/// Registry of class capabilities.
#[derive(Debug, Clone, Default)]
pub struct MeCatalog {
    classes: BTreeMap<u16, ClassCapabilities>,
}

impl MeCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the classes the synchronizers themselves depend on.
    pub fn standard() -> Self {
        use class_ids::*;
        use MessageType::*;

        let mut catalog = Self::new();
        catalog.register(
            ClassCapabilities::new(ONT_DATA, "OntData")
                .with_attributes(&["mib_data_sync"])
                .with_messages(&[Get, Set, GetAllAlarms, GetAllAlarmsNext, MibUpload, MibUploadNext, MibReset]),
        );
        catalog.register(
            ClassCapabilities::new(CIRCUIT_PACK, "CircuitPack")
                .with_attributes(&["type", "number_of_ports", "serial_number", "version", "vendor_id", "administrative_state", "operational_state"])
                .with_messages(&[Create, Delete, Get, Set, AlarmNotification, AttributeValueChange])
                .with_alarms(&[0, 2, 3, 4, 5]),
        );
        catalog.register(
            ClassCapabilities::new(SOFTWARE_IMAGE, "SoftwareImage")
                .with_attributes(&["version", "is_committed", "is_active", "is_valid"])
                .with_messages(&[Get, AttributeValueChange]),
        );
        catalog.register(
            ClassCapabilities::new(PPTP_ETHERNET_UNI, "PptpEthernetUni")
                .with_attributes(&["expected_type", "sensed_type", "auto_detection_configuration", "administrative_state", "operational_state", "max_frame_size"])
                .with_messages(&[Get, Set, AlarmNotification, AttributeValueChange])
                .with_alarms(&[0]),
        );
        catalog.register(
            ClassCapabilities::new(IP_HOST_CONFIG_DATA, "IpHostConfigData")
                .with_attributes(&["ip_options", "mac_address", "onu_identifier", "ip_address", "mask", "gateway"])
                .with_messages(&[Get, Set, AttributeValueChange]),
        );
        catalog.register(
            ClassCapabilities::new(ONT_G, "OntG")
                .with_attributes(&["vendor_id", "version", "serial_number", "traffic_management_options", "battery_backup", "administrative_state", "operational_state"])
                .with_messages(&[Get, Set, AlarmNotification, AttributeValueChange, Test, Reboot])
                .with_alarms(&[0, 6, 7, 8, 9, 10, 11]),
        );
        catalog.register(
            ClassCapabilities::new(ONT2_G, "Ont2G")
                .with_attributes(&["equipment_id", "omcc_version", "vendor_product_code", "security_capability", "total_priority_queue_number"])
                .with_messages(&[Get, Set, AttributeValueChange]),
        );
        catalog.register(
            ClassCapabilities::new(ANI_G, "AniG")
                .with_attributes(&["sr_indication", "total_tcont_number", "gem_block_length", "optical_signal_level", "transmit_optical_level"])
                .with_messages(&[Get, Set, AlarmNotification, AttributeValueChange, Test])
                .with_alarms(&[0, 1, 2, 3, 4, 5, 6]),
        );
        catalog.register(
            ClassCapabilities::new(OMCI, "Omci")
                .with_attributes(&["me_type_table", "message_type_table"])
                .with_messages(&[Get]),
        );
        catalog
    }

    /// Adds or replaces a class entry.
    pub fn register(&mut self, capabilities: ClassCapabilities) {
        self.classes.insert(capabilities.class_id, capabilities);
    }

    /// Returns the entry for `class_id`.
    pub fn get(&self, class_id: u16) -> Option<&ClassCapabilities> {
        self.classes.get(&class_id)
    }

    /// Returns true if `class_id` is known.
    pub fn contains(&self, class_id: u16) -> bool {
        self.classes.contains_key(&class_id)
    }

    /// Returns true if `class_id` supports `message`.
    pub fn supports_message(&self, class_id: u16, message: MessageType) -> bool {
        self.get(class_id)
            .is_some_and(|c| c.message_types.contains(&message))
    }

    /// Returns true if `class_id` can raise alarm notifications.
    pub fn supports_alarms(&self, class_id: u16) -> bool {
        self.get(class_id).is_some_and(ClassCapabilities::supports_alarms)
    }

    /// Returns the class name, if known.
    pub fn name(&self, class_id: u16) -> Option<&str> {
        self.get(class_id).map(|c| c.name.as_str())
    }

    /// Returns the known class ids.
    pub fn class_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.classes.keys().copied()
    }
}
