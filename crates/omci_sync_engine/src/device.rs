//! Collaborators shared by the synchronizers of one device.

use crate::alarms::PortRegistry;
use crate::events::EventSink;
use crate::notify::NotificationBus;
use crate::scheduler::TaskRunner;
use omci_core::{EntityDatabase, MeCatalog};
use std::fmt;
use std::sync::Arc;

/// Everything a synchronizer needs to talk to one device.
#[derive(Clone)]
pub struct DeviceContext {
    /// Device id.
    pub device_id: Arc<str>,
    /// MIB database.
    pub mib_database: Arc<EntityDatabase>,
    /// Alarm database.
    pub alarm_database: Arc<EntityDatabase>,
    /// Task runner of the device.
    pub runner: TaskRunner,
    /// Source of autonomous ONU messages.
    pub bus: Arc<NotificationBus>,
    /// Destination of externally visible events.
    pub events: Arc<dyn EventSink>,
    /// Managed-entity capability registry.
    pub catalog: Arc<MeCatalog>,
    /// UNI and ANI ports used to place alarms.
    pub ports: Arc<PortRegistry>,
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device_id", &self.device_id)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}
