//! Bus for autonomous and unsolicited OMCI messages.
//!
//! The transport layer publishes what the device sends on its own
//! (create/delete/set indications, attribute value changes, alarms) on
//! per-device topics; synchronizers subscribe to the topics of their device.

use omci_codec::{AlarmBitmap, AttributeMap};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The kind of message carried on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// An instance was created.
    Create,
    /// An instance was deleted.
    Delete,
    /// Attributes were set.
    Set,
    /// Autonomous attribute value change.
    AttributeValueChange,
    /// Autonomous alarm notification.
    Alarm,
    /// Response to a get-all-alarms request.
    GetAllAlarms,
}

impl NotificationKind {
    /// Topic suffix for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Create => "create",
            NotificationKind::Delete => "delete",
            NotificationKind::Set => "set",
            NotificationKind::AttributeValueChange => "avc",
            NotificationKind::Alarm => "alarm",
            NotificationKind::GetAllAlarms => "get-all-alarms",
        }
    }
}

/// Returns the topic for `kind` messages of `device_id`.
pub fn topic(device_id: &str, kind: NotificationKind) -> String {
    format!("omci-rx:{device_id}:{}", kind.as_str())
}

/// A message published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The device created an instance.
    Created {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Set-by-create attributes.
        attributes: AttributeMap,
        /// MIB data sync reported after the change, if known.
        mib_data_sync: Option<u8>,
    },
    /// The device deleted an instance.
    Deleted {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// MIB data sync reported after the change, if known.
        mib_data_sync: Option<u8>,
    },
    /// Attributes were set on the device.
    AttributesSet {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// New values.
        attributes: AttributeMap,
        /// MIB data sync reported after the change, if known.
        mib_data_sync: Option<u8>,
    },
    /// The device changed attributes on its own.
    AttributeValueChange {
        /// ME class.
        class_id: u16,
        /// ME instance.
        instance_id: u16,
        /// Changed values.
        attributes: AttributeMap,
    },
    /// Alarm notification.
    Alarm {
        /// ME class.
        class_id: u16,
        /// ME instance.
        entity_id: u16,
        /// Active alarms.
        bitmap: AlarmBitmap,
        /// Alarm sequence number, 0 when not tracked.
        sequence: u8,
    },
    /// The device answered a get-all-alarms request.
    GetAllAlarmsResponse {
        /// Number of entries to fetch.
        commands: u16,
    },
}

impl Notification {
    /// Returns the topic kind of this message.
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Created { .. } => NotificationKind::Create,
            Notification::Deleted { .. } => NotificationKind::Delete,
            Notification::AttributesSet { .. } => NotificationKind::Set,
            Notification::AttributeValueChange { .. } => NotificationKind::AttributeValueChange,
            Notification::Alarm { .. } => NotificationKind::Alarm,
            Notification::GetAllAlarmsResponse { .. } => NotificationKind::GetAllAlarms,
        }
    }
}

/// Callback invoked for each message on a subscribed topic.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Identifies a subscription for [`NotificationBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Topic-based publish/subscribe bus.
///
/// Handlers run synchronously on the publishing thread and must not block.
pub struct NotificationBus {
    next_id: AtomicU64,
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, NotificationHandler)>>>,
}

impl NotificationBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` for messages on `topic`.
    pub fn subscribe(&self, topic: impl Into<String>, handler: NotificationHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .write()
            .entry(topic.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        let mut found = false;
        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|(sub, _)| *sub != id);
            found |= subscribers.len() != before;
            !subscribers.is_empty()
        });
        found
    }

    /// Delivers `notification` to every handler of `topic`.
    ///
    /// Returns the number of handlers invoked.
    pub fn publish(&self, topic: &str, notification: &Notification) -> usize {
        // Handlers may subscribe or unsubscribe, so call them without the lock.
        let handlers: Vec<NotificationHandler> = match self.topics.read().get(topic) {
            Some(subscribers) => subscribers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(notification);
        }
        handlers.len()
    }

    /// Publishes `notification` on the matching topic of `device_id`.
    pub fn publish_for(&self, device_id: &str, notification: &Notification) -> usize {
        self.publish(&topic(device_id, notification.kind()), notification)
    }

    /// Returns the number of handlers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, Vec::len)
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("topics", &self.topics.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn alarm(sequence: u8) -> Notification {
        Notification::Alarm {
            class_id: 256,
            entity_id: 0,
            bitmap: AlarmBitmap::CLEAR,
            sequence,
        }
    }

    #[test]
    fn topic_names() {
        assert_eq!(topic("onu-1", NotificationKind::Alarm), "omci-rx:onu-1:alarm");
        assert_eq!(alarm(1).kind(), NotificationKind::Alarm);
    }

    #[test]
    fn publish_reaches_only_matching_topic() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            topic("onu-1", NotificationKind::Alarm),
            Arc::new(move |n: &Notification| sink.lock().push(n.clone())),
        );

        assert_eq!(bus.publish_for("onu-1", &alarm(1)), 1);
        assert_eq!(bus.publish_for("onu-2", &alarm(2)), 0);
        assert_eq!(*seen.lock(), vec![alarm(1)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);
        let t = topic("onu-1", NotificationKind::Alarm);
        let id = bus.subscribe(
            t.clone(),
            Arc::new(move |_: &Notification| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.publish(&t, &alarm(1));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&t, &alarm(2));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(&t), 0);
    }
}
