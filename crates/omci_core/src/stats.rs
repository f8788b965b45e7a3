//! Operation timing statistics.

use parking_lot::Mutex;
use std::time::Duration;

/// Timing counters for one kind of operation, in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationStats {
    /// Number of completed operations.
    pub count: u64,
    /// Sum of durations.
    pub total_us: u64,
    /// Fastest operation.
    pub min_us: u64,
    /// Slowest operation.
    pub max_us: u64,
}

impl OperationStats {
    fn record(&mut self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.min_us = if self.count == 0 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.total_us = self.total_us.saturating_add(us);
        self.count += 1;
    }

    /// Average duration, zero when nothing was recorded.
    pub fn average_us(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_us / self.count
        }
    }
}

/// Snapshot of database statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStatistics {
    /// Queries.
    pub get: OperationStats,
    /// Attribute writes.
    pub set: OperationStats,
    /// Device creations.
    pub create: OperationStats,
    /// Instance and device deletions.
    pub delete: OperationStats,
}

/// Thread-safe accumulator behind [`DatabaseStatistics`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    inner: Mutex<DatabaseStatistics>,
}

impl StatsRecorder {
    pub(crate) fn get(&self, elapsed: Duration) {
        self.inner.lock().get.record(elapsed);
    }

    pub(crate) fn set(&self, elapsed: Duration) {
        self.inner.lock().set.record(elapsed);
    }

    pub(crate) fn create(&self, elapsed: Duration) {
        self.inner.lock().create.record(elapsed);
    }

    pub(crate) fn delete(&self, elapsed: Duration) {
        self.inner.lock().delete.record(elapsed);
    }

    pub(crate) fn snapshot(&self) -> DatabaseStatistics {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_average() {
        let recorder = StatsRecorder::default();
        recorder.set(Duration::from_micros(10));
        recorder.set(Duration::from_micros(30));

        let stats = recorder.snapshot();
        assert_eq!(stats.set.count, 2);
        assert_eq!(stats.set.min_us, 10);
        assert_eq!(stats.set.max_us, 30);
        assert_eq!(stats.set.average_us(), 20);
        assert_eq!(stats.get.average_us(), 0);
    }
}
