//! # OMCI Sync Engine
//!
//! MIB and alarm synchronization for OMCI-managed ONUs.
//!
//! This crate provides:
//! - A per-device task runner that serializes exchanges on the OMCI channel
//! - Protocol tasks (MIB upload, audit, resync, reconcile, alarm resync)
//! - The MIB synchronizer state machine
//! - The alarm synchronizer state machine with raise/clear event mapping
//! - An agent owning the entity databases and one synchronizer pair per device
//!
//! ## Architecture
//!
//! ```text
//! OmciAgent
//! └── DeviceHandle (one per ONU)
//!     ├── MibSynchronizer   ─┐
//!     ├── AlarmSynchronizer ─┼─> TaskRunner ─> OmciTask ─> OmciTransport
//!     └── PortRegistry       │
//!                            └── NotificationBus (autonomous ONU messages)
//! ```
//!
//! Synchronizers are actors: every trigger for a device (commands, timers,
//! task results, notifications) goes through one mailbox, so a state
//! machine never handles two triggers at once.
//!
//! ## Key Invariants
//!
//! - At most one exclusive task touches a device's OMCI channel at a time
//! - Nothing from a previous lifecycle acts after `stop`
//! - Transient failures become state transitions, never panics
//! - Persisted alarm bitmaps always reflect the last applied update

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod alarm_sync;
mod alarms;
mod config;
mod device;
mod diff;
mod error;
mod events;
mod frame;
mod mib_sync;
mod notify;
mod scheduler;
mod task;
pub mod tasks;
mod transport;

pub use agent::{DeviceHandle, OmciAgent};
pub use alarm_sync::{AlarmSyncState, AlarmSynchronizer};
pub use alarms::{describe_alarm, OnuAlarmKind, PortRegistration, PortRegistry};
pub use config::{AgentConfig, AlarmSyncConfig, MibSyncConfig, SchedulerConfig};
pub use device::DeviceContext;
pub use diff::{attributes_match, changed_attributes, ThreeWayDiff};
pub use error::{SyncError, SyncResult};
pub use events::{AlarmEvent, EventSink, LoggingEventSink, OmciEvent, RecordingEventSink};
pub use frame::{OmciRequest, OmciResponse, ResponsePayload, ResultCode};
pub use mib_sync::{MibSyncState, MibSynchronizer};
pub use notify::{
    topic, Notification, NotificationBus, NotificationHandler, NotificationKind, SubscriptionId,
};
pub use scheduler::{RunnerStats, TaskHandle, TaskRunner};
pub use task::{OmciTask, TaskContext, TaskId, DEFAULT_PRIORITY};
pub use transport::{MockReply, MockTransport, OmciTransport};
