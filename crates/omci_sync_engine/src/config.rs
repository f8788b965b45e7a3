//! Configuration for the synchronizers, scheduler and agent.

use omci_core::DatabaseConfig;
use std::time::Duration;

/// Configuration for the MIB synchronizer.
#[derive(Debug, Clone)]
pub struct MibSyncConfig {
    /// Delay before retrying after a failed upload.
    pub retry_delay: Duration,
    /// Delay before retrying a failed audit or resync.
    pub timeout_delay: Duration,
    /// Interval between audits while in sync. Zero disables periodic audits.
    pub audit_delay: Duration,
    /// Consecutive audit failures tolerated before going out of sync.
    pub max_audit_failures: u32,
    /// Consecutive resyncs with differences tolerated before going out of sync.
    pub max_resync_attempts: u32,
    /// Try a stored MIB template before a full upload.
    pub templates_enabled: bool,
}

impl MibSyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            timeout_delay: Duration::from_secs(5),
            audit_delay: Duration::from_secs(60),
            max_audit_failures: 3,
            max_resync_attempts: 3,
            templates_enabled: true,
        }
    }

    /// Sets the upload retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets the audit retry delay.
    pub fn with_timeout_delay(mut self, delay: Duration) -> Self {
        self.timeout_delay = delay;
        self
    }

    /// Sets the periodic audit interval.
    pub fn with_audit_delay(mut self, delay: Duration) -> Self {
        self.audit_delay = delay;
        self
    }

    /// Sets the audit failure bound.
    pub fn with_max_audit_failures(mut self, max: u32) -> Self {
        self.max_audit_failures = max;
        self
    }

    /// Sets the resync attempt bound.
    pub fn with_max_resync_attempts(mut self, max: u32) -> Self {
        self.max_resync_attempts = max;
        self
    }

    /// Enables or disables the template fast path.
    pub fn with_templates(mut self, enabled: bool) -> Self {
        self.templates_enabled = enabled;
        self
    }

    /// Returns true if periodic audits are enabled.
    pub fn audits_enabled(&self) -> bool {
        !self.audit_delay.is_zero()
    }
}

impl Default for MibSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the alarm synchronizer.
#[derive(Debug, Clone)]
pub struct AlarmSyncConfig {
    /// Delay before the first audit and after a failed audit.
    pub timeout_delay: Duration,
    /// Interval between audits while in sync. Zero disables periodic audits.
    pub audit_delay: Duration,
    /// Delay before re-checking after an audit found differences.
    pub reaudit_delay: Duration,
    /// Audits with differences tolerated before settling in sync.
    pub max_audit_attempts: u32,
    /// Consecutive failed audits tolerated before going out of sync.
    pub max_audit_failures: u32,
}

impl AlarmSyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            timeout_delay: Duration::from_secs(15),
            audit_delay: Duration::from_secs(180),
            reaudit_delay: Duration::from_secs(5),
            max_audit_attempts: 3,
            max_audit_failures: 3,
        }
    }

    /// Sets the retry delay.
    pub fn with_timeout_delay(mut self, delay: Duration) -> Self {
        self.timeout_delay = delay;
        self
    }

    /// Sets the periodic audit interval.
    pub fn with_audit_delay(mut self, delay: Duration) -> Self {
        self.audit_delay = delay;
        self
    }

    /// Sets the re-audit delay.
    pub fn with_reaudit_delay(mut self, delay: Duration) -> Self {
        self.reaudit_delay = delay;
        self
    }

    /// Sets the audit attempt bound.
    pub fn with_max_audit_attempts(mut self, max: u32) -> Self {
        self.max_audit_attempts = max;
        self
    }

    /// Sets the consecutive audit failure bound.
    pub fn with_max_audit_failures(mut self, max: u32) -> Self {
        self.max_audit_failures = max;
        self
    }

    /// Returns true if periodic audits are enabled.
    pub fn audits_enabled(&self) -> bool {
        !self.audit_delay.is_zero()
    }
}

impl Default for AlarmSyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for a device task runner.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Timeout applied to tasks that do not set their own.
    pub default_task_timeout: Option<Duration>,
    /// Timeout for a single request/response exchange.
    pub frame_timeout: Duration,
}

impl SchedulerConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            default_task_timeout: None,
            frame_timeout: Duration::from_secs(3),
        }
    }

    /// Sets the default task timeout.
    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout = Some(timeout);
        self
    }

    /// Sets the per-frame timeout.
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout = timeout;
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for an [`OmciAgent`](crate::OmciAgent).
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// MIB database settings.
    pub mib_database: DatabaseConfig,
    /// Alarm database settings.
    pub alarm_database: DatabaseConfig,
    /// MIB synchronizer settings.
    pub mib_sync: MibSyncConfig,
    /// Alarm synchronizer settings.
    pub alarm_sync: AlarmSyncConfig,
    /// Task runner settings.
    pub scheduler: SchedulerConfig,
}

impl AgentConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the MIB database settings.
    pub fn with_mib_database(mut self, config: DatabaseConfig) -> Self {
        self.mib_database = config;
        self
    }

    /// Sets the alarm database settings.
    pub fn with_alarm_database(mut self, config: DatabaseConfig) -> Self {
        self.alarm_database = config;
        self
    }

    /// Sets the MIB synchronizer settings.
    pub fn with_mib_sync(mut self, config: MibSyncConfig) -> Self {
        self.mib_sync = config;
        self
    }

    /// Sets the alarm synchronizer settings.
    pub fn with_alarm_sync(mut self, config: AlarmSyncConfig) -> Self {
        self.alarm_sync = config;
        self
    }

    /// Sets the task runner settings.
    pub fn with_scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omci_core::PersistenceMode;

    #[test]
    fn mib_defaults() {
        let config = MibSyncConfig::default();
        assert!(config.audits_enabled());
        assert!(config.templates_enabled);
        assert_eq!(config.max_audit_failures, 3);
    }

    #[test]
    fn alarm_audit_can_be_disabled() {
        let config = AlarmSyncConfig::new().with_audit_delay(Duration::ZERO);
        assert!(!config.audits_enabled());
        assert_eq!(config.timeout_delay, Duration::from_secs(15));
        assert_eq!(config.reaudit_delay, Duration::from_secs(5));
        assert_eq!(config.max_audit_failures, 3);
    }

    #[test]
    fn agent_builder() {
        let config = AgentConfig::new()
            .with_mib_database(DatabaseConfig::new().persistence(PersistenceMode::Lazy))
            .with_scheduler(SchedulerConfig::new().with_frame_timeout(Duration::from_millis(500)));
        assert_eq!(config.mib_database.persistence, PersistenceMode::Lazy);
        assert_eq!(config.alarm_database.persistence, PersistenceMode::Volatile);
        assert_eq!(config.scheduler.frame_timeout, Duration::from_millis(500));
    }
}
