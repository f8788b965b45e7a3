//! Externally visible events.

use crate::alarm_sync::AlarmSyncState;
use crate::alarms::OnuAlarmKind;
use crate::mib_sync::MibSyncState;
use parking_lot::Mutex;
use serde::Serialize;

/// One alarm transition of one ME instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmEvent {
    /// Device the alarm belongs to.
    pub device_id: String,
    /// Mapped alarm kind, if the bit has one.
    pub kind: Option<OnuAlarmKind>,
    /// ME class.
    pub class_id: u16,
    /// ME instance.
    pub entity_id: u16,
    /// Bit number in the alarm bitmap.
    pub alarm_number: usize,
    /// Interface the alarm is reported against.
    pub interface: Option<u32>,
    /// Human readable description.
    pub description: String,
}

/// Event published to the platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OmciEvent {
    /// The MIB synchronizer changed state.
    MibStateChange {
        /// Device.
        device_id: String,
        /// New state.
        state: MibSyncState,
    },
    /// The alarm synchronizer changed state.
    AlarmStateChange {
        /// Device.
        device_id: String,
        /// New state.
        state: AlarmSyncState,
    },
    /// A MIB audit compared data sync counters.
    MibAudit {
        /// Device.
        device_id: String,
        /// Locally stored counter.
        local_mds: u8,
        /// Counter reported by the device.
        device_mds: u8,
    },
    /// The MIB could not be brought back in sync automatically.
    MibOutOfSync {
        /// Device.
        device_id: String,
        /// Why synchronization gave up.
        reason: String,
    },
    /// A reconcile pushed the local MIB to the device.
    MibReconciled {
        /// Device.
        device_id: String,
        /// Instances created on the device.
        created: usize,
        /// Instances deleted from the device.
        deleted: usize,
        /// Instances whose attributes were set.
        updated: usize,
    },
    /// Alarm audits kept finding differences and were stopped.
    AlarmAuditIncomplete {
        /// Device.
        device_id: String,
        /// Audits run.
        attempts: u32,
    },
    /// Alarm audits kept failing and were parked.
    AlarmOutOfSync {
        /// Device.
        device_id: String,
        /// Why auditing gave up.
        reason: String,
    },
    /// An alarm was raised.
    AlarmRaised(AlarmEvent),
    /// An alarm was cleared.
    AlarmCleared(AlarmEvent),
    /// Free-form advertisement from the agent.
    Advertisement {
        /// Event type.
        event_type: String,
        /// Event data.
        payload: serde_json::Value,
    },
}

impl OmciEvent {
    /// Returns the device the event concerns, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            OmciEvent::MibStateChange { device_id, .. }
            | OmciEvent::AlarmStateChange { device_id, .. }
            | OmciEvent::MibAudit { device_id, .. }
            | OmciEvent::MibOutOfSync { device_id, .. }
            | OmciEvent::MibReconciled { device_id, .. }
            | OmciEvent::AlarmAuditIncomplete { device_id, .. }
            | OmciEvent::AlarmOutOfSync { device_id, .. } => Some(device_id),
            OmciEvent::AlarmRaised(alarm) | OmciEvent::AlarmCleared(alarm) => {
                Some(&alarm.device_id)
            }
            OmciEvent::Advertisement { .. } => None,
        }
    }
}

/// Receives events published by the engine.
pub trait EventSink: Send + Sync {
    /// Publishes one event. Must not block.
    fn publish(&self, event: OmciEvent);
}

/// Sink that writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn publish(&self, event: OmciEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "omci_events", event = %json),
            Err(e) => tracing::warn!(error = %e, "unserializable event"),
        }
    }
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<OmciEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<OmciEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the recorded events.
    pub fn take(&self) -> Vec<OmciEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Returns the raised and cleared alarm events, in order.
    pub fn alarm_events(&self) -> Vec<OmciEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, OmciEvent::AlarmRaised(_) | OmciEvent::AlarmCleared(_)))
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: OmciEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raised() -> OmciEvent {
        OmciEvent::AlarmRaised(AlarmEvent {
            device_id: "onu-1".into(),
            kind: Some(OnuAlarmKind::DyingGasp),
            class_id: 256,
            entity_id: 0,
            alarm_number: 7,
            interface: None,
            description: "Dying gasp".into(),
        })
    }

    #[test]
    fn serializes_with_tag() {
        let json = serde_json::to_value(raised()).unwrap();
        assert_eq!(json["event"], "alarm_raised");
        assert_eq!(json["kind"], "dying_gasp");
        assert_eq!(json["alarm_number"], 7);

        let json = serde_json::to_value(OmciEvent::MibStateChange {
            device_id: "onu-1".into(),
            state: MibSyncState::InSync,
        })
        .unwrap();
        assert_eq!(json["state"], "in_sync");
    }

    #[test]
    fn recording_sink() {
        let sink = RecordingEventSink::new();
        sink.publish(OmciEvent::AlarmStateChange {
            device_id: "onu-1".into(),
            state: AlarmSyncState::Starting,
        });
        sink.publish(raised());

        assert_eq!(sink.alarm_events(), vec![raised()]);
        assert_eq!(sink.events()[0].device_id(), Some("onu-1"));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.events().is_empty());
    }
}
