//! Agents wired to a simulated ONU, and small builders for test data.

use crate::onu::SimulatedOnu;
use omci_codec::{AttributeMap, AttributeValue};
use omci_storage::KvStore;
use omci_sync_engine::{
    AgentConfig, AlarmSyncConfig, MibSyncConfig, NotificationBus, OmciAgent, RecordingEventSink,
};
use std::sync::Arc;
use std::time::Duration;

/// An agent talking to one [`SimulatedOnu`], with its bus and event log.
pub struct TestAgent {
    /// The agent under test.
    pub agent: OmciAgent,
    /// The device every request goes to.
    pub onu: Arc<SimulatedOnu>,
    /// Bus the tests publish autonomous ONU messages on.
    pub bus: Arc<NotificationBus>,
    /// Every event the agent published.
    pub events: Arc<RecordingEventSink>,
}

impl TestAgent {
    /// Creates a started agent with volatile databases.
    pub fn new(config: AgentConfig, onu: SimulatedOnu) -> Self {
        Self::build(config, onu, None)
    }

    /// Creates a started agent whose databases and templates use `store`.
    pub fn with_store(config: AgentConfig, onu: SimulatedOnu, store: Arc<dyn KvStore>) -> Self {
        Self::build(config, onu, Some(store))
    }

    fn build(config: AgentConfig, onu: SimulatedOnu, store: Option<Arc<dyn KvStore>>) -> Self {
        let onu = Arc::new(onu);
        let bus = Arc::new(NotificationBus::new());
        let events = Arc::new(RecordingEventSink::new());
        let agent = OmciAgent::new(config, onu.clone(), bus.clone(), events.clone(), store)
            .expect("agent configuration is valid");
        agent.start();
        Self {
            agent,
            onu,
            bus,
            events,
        }
    }
}

/// Agent settings for tests: no periodic audits, no templates, short delays.
///
/// Tests trigger audits explicitly so their request sequence is predictable.
pub fn quiet_config() -> AgentConfig {
    AgentConfig::default()
        .with_mib_sync(
            MibSyncConfig::default()
                .with_retry_delay(Duration::from_secs(1))
                .with_timeout_delay(Duration::from_secs(1))
                .with_audit_delay(Duration::ZERO)
                .with_templates(false),
        )
        .with_alarm_sync(
            AlarmSyncConfig::default()
                .with_timeout_delay(Duration::from_secs(1))
                .with_audit_delay(Duration::ZERO),
        )
}

/// Builds an attribute map of unsigned values.
pub fn attrs(pairs: &[(&str, u64)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), AttributeValue::Unsigned(*value)))
        .collect()
}

/// Builds an attribute map of text values.
pub fn text_attrs(pairs: &[(&str, &str)]) -> AttributeMap {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), AttributeValue::Text((*value).to_string())))
        .collect()
}

/// Lets spawned actors and tasks run. Under a paused clock this also
/// advances time by `millis`.
pub async fn settle(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
