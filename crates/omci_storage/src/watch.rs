//! Change notifications for key-value stores.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvEventKind {
    /// The key was written.
    Set,
    /// The key was removed.
    Delete,
}

/// A single key change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEvent {
    /// Full key that changed.
    pub key: String,
    /// Kind of change.
    pub kind: KvEventKind,
    /// New value for `Set`, `None` for `Delete`.
    pub value: Option<Vec<u8>>,
}

impl KvEvent {
    /// Creates a set event.
    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            kind: KvEventKind::Set,
            value: Some(value),
        }
    }

    /// Creates a delete event.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: KvEventKind::Delete,
            value: None,
        }
    }
}

/// Distributes key changes to prefix subscribers.
///
/// Disconnected subscribers are dropped on the next emit.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    subscribers: RwLock<Vec<(String, Sender<KvEvent>)>>,
}

impl WatchRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every key starting with `prefix`.
    pub fn subscribe(&self, prefix: &str) -> Receiver<KvEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push((prefix.to_string(), tx));
        rx
    }

    /// Sends `event` to the subscribers whose prefix matches its key.
    pub fn emit(&self, event: &KvEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|(prefix, tx)| {
            if event.key.starts_with(prefix.as_str()) {
                tx.send(event.clone()).is_ok()
            } else {
                true
            }
        });
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
