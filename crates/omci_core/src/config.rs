//! Entity database configuration.

use std::time::Duration;

/// How the database persists its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistenceMode {
    /// Keep everything in memory.
    #[default]
    Volatile,
    /// Write every change straight to the key-value store.
    WriteThrough,
    /// Keep a working copy in memory and flush dirty devices periodically.
    Lazy,
}

/// Configuration for an entity database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Persistence strategy.
    pub persistence: PersistenceMode,

    /// Prefix placed before the database namespace in store keys.
    pub key_root: String,

    /// How often the lazy writer checks a device for unflushed changes.
    pub lazy_check_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceMode::Volatile,
            key_root: "service/voltha".to_string(),
            lazy_check_interval: Duration::from_secs(60),
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the persistence strategy.
    #[must_use]
    pub const fn persistence(mut self, mode: PersistenceMode) -> Self {
        self.persistence = mode;
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn key_root(mut self, root: impl Into<String>) -> Self {
        self.key_root = root.into();
        self
    }

    /// Sets the lazy writer check interval.
    #[must_use]
    pub const fn lazy_check_interval(mut self, interval: Duration) -> Self {
        self.lazy_check_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.persistence, PersistenceMode::Volatile);
        assert_eq!(config.lazy_check_interval, Duration::from_secs(60));
        assert_eq!(config.key_root, "service/voltha");
    }

    #[test]
    fn builder() {
        let config = DatabaseConfig::new()
            .persistence(PersistenceMode::Lazy)
            .key_root("")
            .lazy_check_interval(Duration::from_secs(5));
        assert_eq!(config.persistence, PersistenceMode::Lazy);
        assert!(config.key_root.is_empty());
        assert_eq!(config.lazy_check_interval, Duration::from_secs(5));
    }
}
