//! The agent: owns the databases and one synchronizer pair per device.

use crate::alarm_sync::AlarmSynchronizer;
use crate::alarms::PortRegistry;
use crate::config::AgentConfig;
use crate::device::DeviceContext;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventSink, OmciEvent};
use crate::mib_sync::MibSynchronizer;
use crate::notify::NotificationBus;
use crate::scheduler::TaskRunner;
use crate::transport::OmciTransport;
use omci_core::{
    DatabaseKind, EntityDatabase, FlushOutcome, MeCatalog, QueryResult, TemplateStore,
};
use omci_storage::KvStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Manages OMCI synchronization for a set of devices.
///
/// # Example
///
/// ```rust,no_run
/// use omci_sync_engine::{AgentConfig, LoggingEventSink, MockTransport, NotificationBus, OmciAgent};
/// use std::sync::Arc;
///
/// # async fn run() -> omci_sync_engine::SyncResult<()> {
/// let agent = OmciAgent::new(
///     AgentConfig::default(),
///     Arc::new(MockTransport::new()),
///     Arc::new(NotificationBus::new()),
///     Arc::new(LoggingEventSink),
///     None,
/// )?;
/// agent.start();
///
/// let device = agent.add_device("onu-1")?;
/// device.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct OmciAgent {
    config: AgentConfig,
    transport: Arc<dyn OmciTransport>,
    bus: Arc<NotificationBus>,
    events: Arc<dyn EventSink>,
    mib_database: Arc<EntityDatabase>,
    alarm_database: Arc<EntityDatabase>,
    templates: Option<Arc<TemplateStore>>,
    catalog: Arc<MeCatalog>,
    started: AtomicBool,
    devices: RwLock<HashMap<String, Arc<DeviceHandle>>>,
}

impl OmciAgent {
    /// Creates a stopped agent.
    ///
    /// `store` backs persistent databases and MIB templates; without it
    /// both databases must be volatile and templates are disabled.
    ///
    /// # Errors
    ///
    /// Returns a database error if a configured persistence mode needs a
    /// store and none is given.
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn OmciTransport>,
        bus: Arc<NotificationBus>,
        events: Arc<dyn EventSink>,
        store: Option<Arc<dyn KvStore>>,
    ) -> SyncResult<Self> {
        let mib_database =
            EntityDatabase::open(DatabaseKind::Mib, &config.mib_database, store.clone())?;
        let alarm_database =
            EntityDatabase::open(DatabaseKind::Alarm, &config.alarm_database, store.clone())?;
        let templates = store.map(|store| {
            Arc::new(TemplateStore::new(store, config.mib_database.key_root.clone()))
        });

        Ok(Self {
            config,
            transport,
            bus,
            events,
            mib_database: Arc::new(mib_database),
            alarm_database: Arc::new(alarm_database),
            templates,
            catalog: Arc::new(MeCatalog::standard()),
            started: AtomicBool::new(false),
            devices: RwLock::new(HashMap::new()),
        })
    }

    /// Starts both databases.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mib_database.start();
        self.alarm_database.start();
        tracing::info!(
            mib = self.mib_database.persistence_name(),
            alarms = self.alarm_database.persistence_name(),
            "omci agent started"
        );
    }

    /// Stops every device, flushes pending writes and stops the databases.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let devices: Vec<Arc<DeviceHandle>> = self.devices.read().values().cloned().collect();
        for device in devices {
            if let Err(e) = device.stop().await {
                tracing::warn!(device_id = device.device_id(), error = %e, "device did not stop cleanly");
            }
            self.flush_device(device.device_id());
            device.stop_flushers();
        }
        self.mib_database.stop();
        self.alarm_database.stop();
        tracing::info!("omci agent stopped");
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// The MIB database.
    pub fn mib_database(&self) -> &Arc<EntityDatabase> {
        &self.mib_database
    }

    /// The alarm database.
    pub fn alarm_database(&self) -> &Arc<EntityDatabase> {
        &self.alarm_database
    }

    /// The notification bus the synchronizers listen on.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Adds a device, or returns its handle if already added.
    ///
    /// The synchronizers are created stopped; call
    /// [`DeviceHandle::start`] to begin synchronizing. Must be called
    /// within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Currently infallible; reserved for validation of the device id.
    pub fn add_device(&self, device_id: &str) -> SyncResult<Arc<DeviceHandle>> {
        let mut devices = self.devices.write();
        if let Some(existing) = devices.get(device_id) {
            tracing::debug!(device_id, "device already added");
            return Ok(Arc::clone(existing));
        }

        let device_id_arc: Arc<str> = Arc::from(device_id);
        let ctx = DeviceContext {
            device_id: Arc::clone(&device_id_arc),
            mib_database: Arc::clone(&self.mib_database),
            alarm_database: Arc::clone(&self.alarm_database),
            runner: TaskRunner::new(
                Arc::clone(&device_id_arc),
                Arc::clone(&self.transport),
                self.config.scheduler.clone(),
            ),
            bus: Arc::clone(&self.bus),
            events: Arc::clone(&self.events),
            catalog: Arc::clone(&self.catalog),
            ports: Arc::new(PortRegistry::new()),
        };

        let mut flushers = Vec::new();
        if self.mib_database.is_lazy() {
            flushers.push(spawn_flusher(
                Arc::clone(&self.mib_database),
                Arc::clone(&device_id_arc),
                self.config.mib_database.lazy_check_interval,
            ));
        }
        if self.alarm_database.is_lazy() {
            flushers.push(spawn_flusher(
                Arc::clone(&self.alarm_database),
                Arc::clone(&device_id_arc),
                self.config.alarm_database.lazy_check_interval,
            ));
        }

        let templates = if self.config.mib_sync.templates_enabled {
            self.templates.clone()
        } else {
            None
        };
        let handle = Arc::new(DeviceHandle {
            mib_sync: MibSynchronizer::spawn(ctx.clone(), self.config.mib_sync.clone(), templates),
            alarm_sync: AlarmSynchronizer::spawn(ctx.clone(), self.config.alarm_sync.clone()),
            ctx,
            flushers: Mutex::new(flushers),
        });
        devices.insert(device_id.to_string(), Arc::clone(&handle));
        tracing::info!(device_id, "device added");
        Ok(handle)
    }

    /// Stops a device. With `cleanup`, also forgets it and deletes its
    /// records from both databases. Unknown devices are ignored.
    ///
    /// # Errors
    ///
    /// Returns a database error if the records cannot be removed.
    pub async fn remove_device(&self, device_id: &str, cleanup: bool) -> SyncResult<()> {
        let handle = if cleanup {
            self.devices.write().remove(device_id)
        } else {
            self.devices.read().get(device_id).cloned()
        };
        let Some(handle) = handle else {
            tracing::debug!(device_id, "remove of unknown device ignored");
            return Ok(());
        };

        handle.stop().await?;
        if cleanup {
            self.mib_database.remove(device_id)?;
            self.alarm_database.remove(device_id)?;
            // Lazy databases delete the remote record on the next flush.
            self.flush_device(device_id);
            handle.stop_flushers();
            tracing::info!(device_id, "device removed");
        }
        Ok(())
    }

    /// Returns the handle of a device.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DeviceNotFound`] if the device was never added.
    pub fn get_device(&self, device_id: &str) -> SyncResult<Arc<DeviceHandle>> {
        self.devices
            .read()
            .get(device_id)
            .cloned()
            .ok_or_else(|| SyncError::DeviceNotFound(device_id.to_string()))
    }

    /// Ids of every managed device.
    pub fn device_ids(&self) -> BTreeSet<String> {
        self.devices.read().keys().cloned().collect()
    }

    /// Publishes a free-form event. Returns false, and publishes nothing,
    /// while the agent is stopped.
    pub fn advertise(&self, event_type: &str, payload: serde_json::Value) -> bool {
        if !self.is_started() {
            tracing::debug!(event_type, "agent stopped, advertisement dropped");
            return false;
        }
        self.events.publish(OmciEvent::Advertisement {
            event_type: event_type.to_string(),
            payload,
        });
        true
    }

    fn flush_device(&self, device_id: &str) {
        for db in [&self.mib_database, &self.alarm_database] {
            if db.is_lazy() {
                if let Err(e) = db.flush(device_id) {
                    tracing::warn!(device_id, error = %e, "flush failed");
                }
            }
        }
    }
}

impl fmt::Debug for OmciAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OmciAgent")
            .field("started", &self.is_started())
            .field("devices", &self.device_ids())
            .finish_non_exhaustive()
    }
}

/// Periodically writes one device's unflushed changes.
///
/// Stops once the database reports the device needs no more flushing.
fn spawn_flusher(
    db: Arc<EntityDatabase>,
    device_id: Arc<str>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match db.flush(&device_id) {
                // Unknown until the device is first written.
                Ok(FlushOutcome::Unknown) => {}
                Ok(outcome) if outcome.is_final() => {
                    tracing::debug!(device_id = %device_id, ?outcome, "lazy writer finished");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(device_id = %device_id, error = %e, "lazy flush failed, will retry");
                }
            }
        }
    })
}

/// One managed device.
pub struct DeviceHandle {
    ctx: DeviceContext,
    mib_sync: MibSynchronizer,
    alarm_sync: AlarmSynchronizer,
    flushers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceHandle {
    /// Device id.
    pub fn device_id(&self) -> &str {
        &self.ctx.device_id
    }

    /// MIB synchronizer.
    pub fn mib_sync(&self) -> &MibSynchronizer {
        &self.mib_sync
    }

    /// Alarm synchronizer.
    pub fn alarm_sync(&self) -> &AlarmSynchronizer {
        &self.alarm_sync
    }

    /// Task runner.
    pub fn runner(&self) -> &TaskRunner {
        &self.ctx.runner
    }

    /// Managed-entity capability registry.
    pub fn catalog(&self) -> &MeCatalog {
        &self.ctx.catalog
    }

    /// UNI and ANI ports used to place alarms.
    pub fn ports(&self) -> &PortRegistry {
        &self.ctx.ports
    }

    /// Starts both synchronizers.
    ///
    /// # Errors
    ///
    /// Returns a database error if a device root cannot be created.
    pub async fn start(&self) -> SyncResult<()> {
        self.mib_sync.start().await?;
        self.alarm_sync.start().await
    }

    /// Stops both synchronizers and cancels every task of the device.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if a synchronizer already shut down.
    pub async fn stop(&self) -> SyncResult<()> {
        self.mib_sync.stop().await?;
        self.alarm_sync.stop().await?;
        self.ctx.runner.stop();
        Ok(())
    }

    /// Queries the device's MIB.
    ///
    /// # Errors
    ///
    /// As for [`EntityDatabase::query`].
    pub fn query(
        &self,
        class_id: Option<u32>,
        instance_id: Option<u32>,
        attributes: Option<&[&str]>,
    ) -> SyncResult<QueryResult> {
        Ok(self
            .ctx
            .mib_database
            .query(&self.ctx.device_id, class_id, instance_id, attributes)?)
    }

    /// Queries the device's alarm bitmaps.
    ///
    /// # Errors
    ///
    /// As for [`EntityDatabase::query`].
    pub fn query_alarms(
        &self,
        class_id: Option<u32>,
        instance_id: Option<u32>,
    ) -> SyncResult<QueryResult> {
        Ok(self
            .ctx
            .alarm_database
            .query(&self.ctx.device_id, class_id, instance_id, None)?)
    }

    fn stop_flushers(&self) {
        for flusher in self.flushers.lock().drain(..) {
            flusher.abort();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.stop_flushers();
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device_id", &self.ctx.device_id)
            .field("mib_sync", &self.mib_sync)
            .field("alarm_sync", &self.alarm_sync)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::transport::MockTransport;
    use omci_core::{DatabaseConfig, PersistenceMode};
    use omci_storage::InMemoryKvStore;

    fn agent(config: AgentConfig, store: Option<Arc<dyn KvStore>>) -> (OmciAgent, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::new());
        let agent = OmciAgent::new(
            config,
            Arc::new(MockTransport::new()),
            Arc::new(NotificationBus::new()),
            events.clone(),
            store,
        )
        .unwrap();
        (agent, events)
    }

    #[tokio::test]
    async fn device_registry() {
        let (agent, _) = agent(AgentConfig::default(), None);
        agent.start();

        let first = agent.add_device("onu-1").unwrap();
        let again = agent.add_device("onu-1").unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        agent.add_device("onu-2").unwrap();

        assert_eq!(
            agent.device_ids(),
            BTreeSet::from(["onu-1".to_string(), "onu-2".to_string()])
        );
        assert!(matches!(agent.get_device("onu-3"), Err(SyncError::DeviceNotFound(_))));

        agent.remove_device("onu-2", false).await.unwrap();
        assert!(agent.get_device("onu-2").is_ok());
        agent.remove_device("onu-2", true).await.unwrap();
        assert!(agent.get_device("onu-2").is_err());
        agent.remove_device("onu-9", true).await.unwrap();
    }

    #[tokio::test]
    async fn persistent_database_needs_store() {
        let config = AgentConfig::default()
            .with_mib_database(DatabaseConfig::new().persistence(PersistenceMode::Lazy));
        let result = OmciAgent::new(
            config,
            Arc::new(MockTransport::new()),
            Arc::new(NotificationBus::new()),
            Arc::new(RecordingEventSink::new()),
            None,
        );
        assert!(matches!(result, Err(SyncError::Database(_))));
    }

    #[tokio::test]
    async fn advertise_only_while_started() {
        let (agent, events) = agent(AgentConfig::default(), None);
        assert!(!agent.advertise("onu-discovered", serde_json::json!({"serial": "BRCM0001"})));
        agent.start();
        assert!(agent.advertise("onu-discovered", serde_json::json!({"serial": "BRCM0001"})));
        agent.stop().await;

        let events = events.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OmciEvent::Advertisement { event_type, .. } if event_type == "onu-discovered"));
    }

    #[tokio::test(start_paused = true)]
    async fn lazy_writer_flushes_and_deletes() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = AgentConfig::default().with_mib_database(
            DatabaseConfig::new()
                .persistence(PersistenceMode::Lazy)
                .lazy_check_interval(Duration::from_secs(60)),
        );
        let (agent, _) = agent(config, Some(store.clone()));
        agent.start();
        agent.add_device("onu-1").unwrap();
        agent.mib_database().add("onu-1", false).unwrap();

        let keys = |store: &Arc<dyn KvStore>| store.keys("").unwrap();
        assert!(keys(&store).iter().all(|k| !k.contains("omci_mibs")));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(keys(&store).iter().any(|k| k.ends_with("omci_mibs/onu-1")));

        agent.remove_device("onu-1", true).await.unwrap();
        assert!(keys(&store).iter().all(|k| !k.contains("omci_mibs")));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_lazy_writers() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = AgentConfig::default().with_mib_database(
            DatabaseConfig::new()
                .persistence(PersistenceMode::Lazy)
                .lazy_check_interval(Duration::from_secs(60)),
        );
        let (agent, _) = agent(config, Some(store.clone()));
        agent.start();
        let device = agent.add_device("onu-1").unwrap();
        assert_eq!(device.flushers.lock().len(), 1);

        agent.mib_database().add("onu-1", false).unwrap();
        agent.stop().await;
        assert!(device.flushers.lock().is_empty());
        let flushed = store.keys("").unwrap();
        assert!(flushed.iter().any(|k| k.ends_with("omci_mibs/onu-1")));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(store.keys("").unwrap(), flushed);
    }
}
