//! The entity database.

use crate::catalog::MessageType;
use crate::config::{DatabaseConfig, PersistenceMode};
use crate::error::{DatabaseError, DatabaseResult};
use crate::persistence::{FlushOutcome, KvPersistence, LazyPersistence, Persistence, VolatilePersistence};
use crate::query::{ClassView, DeviceView, InstanceView, QueryResult};
use crate::record::{ClassRecord, DeviceHeader, DeviceRecord, InstanceRecord};
use crate::stats::{DatabaseStatistics, StatsRecorder};
use crate::template::MibTemplate;
use crate::types::{now_millis, validate_class_id, validate_instance_id, Timestamp};
use omci_codec::{
    AlarmAttributeCodec, AttributeCodec, AttributeMap, CodecError, DefaultAttributeCodec,
};
use omci_storage::{join_key, KvStore};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which mirror a database holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseKind {
    /// Managed-entity configuration.
    Mib,
    /// Alarm bitmaps.
    Alarm,
}

impl DatabaseKind {
    /// Store namespace for this kind.
    pub const fn namespace(self) -> &'static str {
        match self {
            DatabaseKind::Mib => "omci_mibs",
            DatabaseKind::Alarm => "omci_alarms",
        }
    }

    /// Codec used unless one is supplied explicitly.
    pub fn default_codec(self) -> Arc<dyn AttributeCodec> {
        match self {
            DatabaseKind::Mib => Arc::new(DefaultAttributeCodec),
            DatabaseKind::Alarm => Arc::new(AlarmAttributeCodec::default()),
        }
    }
}

/// Per-device hierarchical store of managed-entity data.
///
/// One instance holds the MIB of every device, another holds their alarm
/// bitmaps. All methods are synchronous and safe to call from any thread;
/// read-modify-write operations are serialized internally.
///
/// # Example
///
/// ```rust
/// use omci_codec::{AttributeMap, AttributeValue};
/// use omci_core::{DatabaseKind, EntityDatabase};
///
/// let db = EntityDatabase::volatile(DatabaseKind::Mib);
/// db.start();
/// db.add("onu-1", false).unwrap();
///
/// let attrs = AttributeMap::from([("admin_state".to_string(), AttributeValue::Unsigned(1))]);
/// assert!(db.set("onu-1", 256, 0, &attrs).unwrap());
/// assert!(!db.set("onu-1", 256, 0, &attrs).unwrap());
///
/// let found = db.query_instance("onu-1", 256, 0).unwrap().unwrap();
/// assert_eq!(found["admin_state"], AttributeValue::Unsigned(1));
/// ```
pub struct EntityDatabase {
    kind: DatabaseKind,
    codec: Arc<dyn AttributeCodec>,
    persistence: Arc<dyn Persistence>,
    active: AtomicBool,
    /// Serializes writes per device; devices never wait on each other.
    device_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    stats: StatsRecorder,
}

impl EntityDatabase {
    /// Creates a database over the given persistence.
    pub fn new(kind: DatabaseKind, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            kind,
            codec: kind.default_codec(),
            persistence,
            active: AtomicBool::new(false),
            device_locks: RwLock::new(HashMap::new()),
            stats: StatsRecorder::default(),
        }
    }

    /// Creates an in-memory database.
    pub fn volatile(kind: DatabaseKind) -> Self {
        Self::new(kind, Arc::new(VolatilePersistence::new()))
    }

    /// Creates a database as described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidArgument`] if the configuration
    /// needs a key-value store and none is given.
    pub fn open(
        kind: DatabaseKind,
        config: &DatabaseConfig,
        store: Option<Arc<dyn KvStore>>,
    ) -> DatabaseResult<Self> {
        let namespace = join_key(&[&config.key_root, kind.namespace()]);
        let persistence: Arc<dyn Persistence> = match (config.persistence, store) {
            (PersistenceMode::Volatile, _) => Arc::new(VolatilePersistence::new()),
            (PersistenceMode::WriteThrough, Some(store)) => {
                Arc::new(KvPersistence::new(store, namespace))
            }
            (PersistenceMode::Lazy, Some(store)) => Arc::new(LazyPersistence::new(store, namespace)),
            (mode, None) => {
                return Err(DatabaseError::invalid_argument(format!(
                    "{mode:?} persistence needs a key-value store"
                )))
            }
        };
        Ok(Self::new(kind, persistence))
    }

    /// Replaces the attribute codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn AttributeCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Returns which mirror this database holds.
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Returns the persistence backend name.
    pub fn persistence_name(&self) -> &'static str {
        self.persistence.name()
    }

    /// Returns true if changes reach durable storage only through [`flush`](Self::flush).
    pub fn is_lazy(&self) -> bool {
        self.persistence.is_lazy()
    }

    /// Enables the database.
    pub fn start(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            tracing::debug!(kind = ?self.kind, backend = self.persistence.name(), "database started");
        }
    }

    /// Disables the database. Stored data is kept.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(kind = ?self.kind, "database stopped");
        }
    }

    /// Returns true between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> DatabaseResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DatabaseError::NotActive)
        }
    }

    fn require_header(&self, device_id: &str) -> DatabaseResult<DeviceHeader> {
        self.persistence
            .read_header(device_id)?
            .ok_or_else(|| DatabaseError::not_found(device_id))
    }

    /// Returns true if the device has a root record.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn contains(&self, device_id: &str) -> DatabaseResult<bool> {
        self.ensure_active()?;
        Ok(self.persistence.read_header(device_id)?.is_some())
    }

    /// Lists all device ids.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn device_ids(&self) -> DatabaseResult<Vec<String>> {
        self.ensure_active()?;
        self.persistence.device_ids()
    }

    /// Creates a device root record.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::AlreadyExists`] if the device exists and
    /// `overwrite` is false, or [`DatabaseError::InvalidArgument`] for an
    /// unusable device id.
    pub fn add(&self, device_id: &str, overwrite: bool) -> DatabaseResult<()> {
        let start = Instant::now();
        self.ensure_active()?;
        validate_device_id(device_id)?;

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        if self.persistence.read_header(device_id)?.is_some() && !overwrite {
            return Err(DatabaseError::AlreadyExists(device_id.to_string()));
        }
        self.persistence
            .create_device(&DeviceHeader::new(device_id, now_millis()))?;

        tracing::debug!(device_id, kind = ?self.kind, overwrite, "added device");
        self.stats.create(start.elapsed());
        Ok(())
    }

    /// Deletes a device and everything under it. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn remove(&self, device_id: &str) -> DatabaseResult<bool> {
        let start = Instant::now();
        self.ensure_active()?;

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        let existed = self.persistence.delete_device(device_id)?;

        tracing::debug!(device_id, kind = ?self.kind, existed, "removed device");
        self.stats.delete(start.elapsed());
        Ok(existed)
    }

    /// Upserts one instance's attributes.
    ///
    /// Creates the class and instance on first use. Returns true if any
    /// attribute changed, comparing codec-encoded strings.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::NotActive`] before [`start`](Self::start)
    /// - [`DatabaseError::InvalidArgument`] for ids above 65535 or values the codec rejects
    /// - [`DatabaseError::NotFound`] for an unknown device
    pub fn set(
        &self,
        device_id: &str,
        class_id: u32,
        instance_id: u32,
        attributes: &AttributeMap,
    ) -> DatabaseResult<bool> {
        self.write_instance(device_id, class_id, instance_id, attributes, false)
    }

    /// Like [`set`](Self::set), but attributes missing from `attributes`
    /// are dropped from the stored instance.
    ///
    /// # Errors
    ///
    /// As for [`set`](Self::set).
    pub fn replace(
        &self,
        device_id: &str,
        class_id: u32,
        instance_id: u32,
        attributes: &AttributeMap,
    ) -> DatabaseResult<bool> {
        self.write_instance(device_id, class_id, instance_id, attributes, true)
    }

    fn write_instance(
        &self,
        device_id: &str,
        class_id: u32,
        instance_id: u32,
        attributes: &AttributeMap,
        replace: bool,
    ) -> DatabaseResult<bool> {
        let start = Instant::now();
        self.ensure_active()?;
        let class_id = validate_class_id(class_id)?;
        let instance_id = validate_instance_id(instance_id)?;
        let encoded = self.encode_attributes(class_id, attributes)?;

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        let mut header = self.require_header(device_id)?;
        let mut class = self
            .persistence
            .read_class(device_id, class_id)?
            .unwrap_or_else(|| ClassRecord::new(class_id));

        let now = now_millis();
        let changed = match class.instances.get_mut(&instance_id) {
            Some(instance) => {
                let mut changed = false;
                if replace {
                    let before = instance.attributes.len();
                    instance.attributes.retain(|name, _| encoded.contains_key(name));
                    changed = instance.attributes.len() != before;
                }
                for (name, value) in encoded {
                    if instance.attributes.get(&name) != Some(&value) {
                        instance.attributes.insert(name, value);
                        changed = true;
                    }
                }
                if changed {
                    instance.modified = now;
                }
                changed
            }
            None => {
                class
                    .instances
                    .insert(instance_id, InstanceRecord::new(instance_id, now, encoded));
                true
            }
        };

        if changed {
            self.persistence.write_class(device_id, &class)?;
            header.class_ids.insert(class_id);
            header.modified = now;
            self.persistence.write_header(&header)?;
        }

        self.stats.set(start.elapsed());
        Ok(changed)
    }

    /// Removes one instance, and its class if it was the last one.
    ///
    /// Returns whether an instance was deleted.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`], [`DatabaseError::InvalidArgument`]
    /// or [`DatabaseError::NotFound`] as for [`set`](Self::set).
    pub fn delete(&self, device_id: &str, class_id: u32, instance_id: u32) -> DatabaseResult<bool> {
        let start = Instant::now();
        self.ensure_active()?;
        let class_id = validate_class_id(class_id)?;
        let instance_id = validate_instance_id(instance_id)?;

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        let mut header = self.require_header(device_id)?;
        let Some(mut class) = self.persistence.read_class(device_id, class_id)? else {
            return Ok(false);
        };
        if class.instances.remove(&instance_id).is_none() {
            return Ok(false);
        }

        if class.instances.is_empty() {
            self.persistence.delete_class(device_id, class_id)?;
            header.class_ids.remove(&class_id);
        } else {
            self.persistence.write_class(device_id, &class)?;
        }
        header.modified = now_millis();
        self.persistence.write_header(&header)?;

        self.stats.delete(start.elapsed());
        Ok(true)
    }

    /// Hierarchical read.
    ///
    /// - no class: the whole device
    /// - class only: every instance of the class
    /// - class and instance: one instance, optionally limited to `attributes`
    ///
    /// Missing classes or instances give [`QueryResult::Empty`].
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] for an unknown device and
    /// [`DatabaseError::InvalidArgument`] for an instance id without a class id.
    pub fn query(
        &self,
        device_id: &str,
        class_id: Option<u32>,
        instance_id: Option<u32>,
        attributes: Option<&[&str]>,
    ) -> DatabaseResult<QueryResult> {
        let start = Instant::now();
        self.ensure_active()?;

        let result = match (class_id, instance_id) {
            (None, None) => {
                let record = self
                    .persistence
                    .read_device(device_id)?
                    .ok_or_else(|| DatabaseError::not_found(device_id))?;
                QueryResult::Device(self.device_to_view(&record)?)
            }
            (None, Some(_)) => {
                return Err(DatabaseError::invalid_argument(
                    "instance id given without class id",
                ))
            }
            (Some(class_id), instance_id) => {
                let class_id = validate_class_id(class_id)?;
                let instance_id = instance_id.map(validate_instance_id).transpose()?;
                self.require_header(device_id)?;

                match self.persistence.read_class(device_id, class_id)? {
                    None => QueryResult::Empty,
                    Some(class) => match instance_id {
                        None => QueryResult::Class(self.class_to_view(&class)?),
                        Some(instance_id) => match class.instances.get(&instance_id) {
                            None => QueryResult::Empty,
                            Some(instance) => QueryResult::Instance(self.instance_to_view(
                                class_id, instance, attributes,
                            )?),
                        },
                    },
                }
            }
        };

        self.stats.get(start.elapsed());
        Ok(result)
    }

    /// Returns the decoded attributes of one instance, if present.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query).
    pub fn query_instance(
        &self,
        device_id: &str,
        class_id: u32,
        instance_id: u32,
    ) -> DatabaseResult<Option<AttributeMap>> {
        Ok(self
            .query(device_id, Some(class_id), Some(instance_id), None)?
            .into_instance()
            .map(|i| i.attributes))
    }

    /// Returns the whole decoded device tree.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query).
    pub fn device_view(&self, device_id: &str) -> DatabaseResult<DeviceView> {
        self.query(device_id, None, None, None)?
            .into_device()
            .ok_or_else(|| DatabaseError::not_found(device_id))
    }

    /// Clears every class and instance of a device after a MIB reset.
    ///
    /// Creation and last-sync times survive, the MIB data sync counter
    /// becomes zero. An unknown device is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn on_mib_reset(&self, device_id: &str) -> DatabaseResult<()> {
        self.ensure_active()?;

        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        let Some(old) = self.persistence.read_header(device_id)? else {
            tracing::warn!(device_id, "mib reset with no data to reset");
            return Ok(());
        };

        let mut header = DeviceHeader::new(device_id, old.created);
        header.modified = now_millis();
        header.last_sync_time = old.last_sync_time;
        header.last_alarm_sequence = old.last_alarm_sequence;
        self.persistence.create_device(&header)?;

        tracing::debug!(device_id, cleared = old.class_ids.len(), "mib reset complete");
        Ok(())
    }

    fn update_header<F>(&self, device_id: &str, update: F) -> DatabaseResult<()>
    where
        F: FnOnce(&mut DeviceHeader),
    {
        self.ensure_active()?;
        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        let mut header = self.require_header(device_id)?;
        update(&mut header);
        header.modified = now_millis();
        self.persistence.write_header(&header)
    }

    fn read_header_field<T>(
        &self,
        device_id: &str,
        field: impl FnOnce(&DeviceHeader) -> T,
    ) -> DatabaseResult<Option<T>> {
        self.ensure_active()?;
        Ok(self.persistence.read_header(device_id)?.as_ref().map(field))
    }

    /// Records the time of the last full synchronization.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] for an unknown device.
    pub fn save_last_sync(&self, device_id: &str, value: Timestamp) -> DatabaseResult<()> {
        self.update_header(device_id, |h| h.last_sync_time = Some(value))
    }

    /// Returns the time of the last full synchronization.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn get_last_sync(&self, device_id: &str) -> DatabaseResult<Option<Timestamp>> {
        Ok(self.read_header_field(device_id, |h| h.last_sync_time)?.flatten())
    }

    /// Stores the MIB data sync counter.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidArgument`] for values above 255 and
    /// [`DatabaseError::NotFound`] for an unknown device.
    pub fn save_mib_data_sync(&self, device_id: &str, value: u32) -> DatabaseResult<()> {
        let value = u8::try_from(value).map_err(|_| {
            DatabaseError::invalid_argument(format!("mib data sync {value} out of range 0..=255"))
        })?;
        self.update_header(device_id, |h| h.mib_data_sync = value)
    }

    /// Returns the stored MIB data sync counter, `None` for an unknown device.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn get_mib_data_sync(&self, device_id: &str) -> DatabaseResult<Option<u8>> {
        self.read_header_field(device_id, |h| h.mib_data_sync)
    }

    /// Stores the last alarm notification sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidArgument`] for values above 255 and
    /// [`DatabaseError::NotFound`] for an unknown device.
    pub fn save_alarm_last_sync(&self, device_id: &str, value: u32) -> DatabaseResult<()> {
        let value = u8::try_from(value).map_err(|_| {
            DatabaseError::invalid_argument(format!("alarm sequence {value} out of range 0..=255"))
        })?;
        self.update_header(device_id, |h| h.last_alarm_sequence = value)
    }

    /// Returns the last alarm sequence number, `None` for an unknown device.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotActive`] or a storage error.
    pub fn get_alarm_last_sync(&self, device_id: &str) -> DatabaseResult<Option<u8>> {
        self.read_header_field(device_id, |h| h.last_alarm_sequence)
    }

    /// Replaces the set of managed entities the device supports.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] for an unknown device.
    pub fn update_supported_managed_entities(
        &self,
        device_id: &str,
        entities: &BTreeMap<u16, String>,
    ) -> DatabaseResult<()> {
        self.update_header(device_id, |h| {
            h.supported_managed_entities = entities.clone();
        })
    }

    /// Replaces the set of message types the device supports.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] for an unknown device.
    pub fn update_supported_message_types(
        &self,
        device_id: &str,
        message_types: &BTreeSet<MessageType>,
    ) -> DatabaseResult<()> {
        self.update_header(device_id, |h| {
            h.message_types = message_types.iter().map(|m| m.code()).collect();
        })
    }

    /// Seeds a device's tree from a template. Returns the instances written.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotFound`] for an unknown device, or the
    /// first error from [`set`](Self::set).
    pub fn load_from_template(&self, device_id: &str, template: &MibTemplate) -> DatabaseResult<usize> {
        self.ensure_active()?;
        self.require_header(device_id)?;
        let mut written = 0;
        for ((class_id, instance_id), attributes) in template.instances() {
            self.set(device_id, u32::from(class_id), u32::from(instance_id), attributes)?;
            written += 1;
        }
        tracing::info!(device_id, instances = written, "loaded mib from template");
        Ok(written)
    }

    /// Renders a device tree as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// As for [`query`](Self::query).
    pub fn dump_to_json(&self, device_id: &str) -> DatabaseResult<String> {
        let view = self.device_view(device_id)?;
        serde_json::to_string_pretty(&view)
            .map_err(|e| DatabaseError::Codec(CodecError::encoding_failed(e.to_string())))
    }

    /// Returns timing statistics.
    pub fn statistics(&self) -> DatabaseStatistics {
        self.stats.snapshot()
    }

    /// Pushes unflushed changes of one device to durable storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the device stays dirty and a later flush retries.
    pub fn flush(&self, device_id: &str) -> DatabaseResult<FlushOutcome> {
        let lock = self.device_lock(device_id);
        let _guard = lock.lock();
        self.persistence.flush(device_id)
    }

    /// Write lock of one device. Entries are kept after removal so a
    /// writer racing the removal still shares the lock with later writers.
    fn device_lock(&self, device_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.device_locks.read().get(device_id) {
            return Arc::clone(lock);
        }
        Arc::clone(self.device_locks.write().entry(device_id.to_string()).or_default())
    }

    fn encode_attributes(
        &self,
        class_id: u16,
        attributes: &AttributeMap,
    ) -> DatabaseResult<BTreeMap<String, String>> {
        attributes
            .iter()
            .map(|(name, value)| {
                self.codec
                    .encode(class_id, name, value)
                    .map(|encoded| (name.clone(), encoded))
                    .map_err(|e| match e {
                        CodecError::WrongType { .. } => DatabaseError::invalid_argument(e.to_string()),
                        other => DatabaseError::Codec(other),
                    })
            })
            .collect()
    }

    fn instance_to_view(
        &self,
        class_id: u16,
        instance: &InstanceRecord,
        filter: Option<&[&str]>,
    ) -> DatabaseResult<InstanceView> {
        let mut attributes = AttributeMap::new();
        for (name, encoded) in &instance.attributes {
            if filter.is_some_and(|names| !names.contains(&name.as_str())) {
                continue;
            }
            attributes.insert(name.clone(), self.codec.decode(class_id, name, encoded)?);
        }
        Ok(InstanceView {
            class_id,
            instance_id: instance.instance_id,
            created: instance.created,
            modified: instance.modified,
            attributes,
        })
    }

    fn class_to_view(&self, class: &ClassRecord) -> DatabaseResult<ClassView> {
        let instances = class
            .instances
            .iter()
            .map(|(id, instance)| Ok((*id, self.instance_to_view(class.class_id, instance, None)?)))
            .collect::<DatabaseResult<_>>()?;
        Ok(ClassView {
            class_id: class.class_id,
            instances,
        })
    }

    fn device_to_view(&self, record: &DeviceRecord) -> DatabaseResult<DeviceView> {
        let classes = record
            .classes
            .iter()
            .map(|(id, class)| Ok((*id, self.class_to_view(class)?)))
            .collect::<DatabaseResult<_>>()?;
        let header = &record.header;
        Ok(DeviceView {
            device_id: header.device_id.clone(),
            created: header.created,
            modified: header.modified,
            last_sync_time: header.last_sync_time,
            mib_data_sync: header.mib_data_sync,
            last_alarm_sequence: header.last_alarm_sequence,
            version: header.version,
            supported_managed_entities: header.supported_managed_entities.clone(),
            message_types: header.message_types.iter().copied().collect(),
            classes,
        })
    }
}

impl std::fmt::Debug for EntityDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDatabase")
            .field("kind", &self.kind)
            .field("persistence", &self.persistence.name())
            .field("active", &self.is_active())
            .finish()
    }
}

fn validate_device_id(device_id: &str) -> DatabaseResult<()> {
    if device_id.is_empty() || device_id.contains('/') {
        return Err(DatabaseError::invalid_argument(format!(
            "invalid device id '{device_id}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use omci_codec::{AlarmBitmap, AttributeValue, ALARM_BITMAP_ATTRIBUTE};
    use omci_storage::InMemoryKvStore;

    fn attrs(pairs: &[(&str, u64)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), AttributeValue::Unsigned(*v)))
            .collect()
    }

    fn started(kind: DatabaseKind) -> EntityDatabase {
        let db = EntityDatabase::volatile(kind);
        db.start();
        db.add("onu-1", false).unwrap();
        db
    }

    #[test]
    fn operations_need_start() {
        let db = EntityDatabase::volatile(DatabaseKind::Mib);
        assert!(matches!(db.add("onu-1", false), Err(DatabaseError::NotActive)));
        assert!(matches!(
            db.set("onu-1", 6, 0, &AttributeMap::new()),
            Err(DatabaseError::NotActive)
        ));
        db.start();
        db.add("onu-1", false).unwrap();
        db.stop();
        assert!(matches!(db.query("onu-1", None, None, None), Err(DatabaseError::NotActive)));
    }

    #[test]
    fn add_twice_needs_overwrite() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 6, 1, &attrs(&[("a", 1)])).unwrap();
        assert!(matches!(db.add("onu-1", false), Err(DatabaseError::AlreadyExists(_))));

        db.add("onu-1", true).unwrap();
        assert!(db.query("onu-1", Some(6), None, None).unwrap().is_empty());
    }

    #[test]
    fn invalid_device_id_rejected() {
        let db = started(DatabaseKind::Mib);
        assert!(matches!(db.add("", false), Err(DatabaseError::InvalidArgument(_))));
        assert!(matches!(db.add("a/b", false), Err(DatabaseError::InvalidArgument(_))));
    }

    #[test]
    fn set_reports_changes() {
        let db = started(DatabaseKind::Mib);
        assert!(db.set("onu-1", 256, 0, &attrs(&[("admin_state", 1)])).unwrap());
        assert!(!db.set("onu-1", 256, 0, &attrs(&[("admin_state", 1)])).unwrap());
        assert!(db.set("onu-1", 256, 0, &attrs(&[("admin_state", 0)])).unwrap());
        // subset writes leave other attributes alone
        assert!(db.set("onu-1", 256, 0, &attrs(&[("battery_backup", 1)])).unwrap());

        let found = db.query_instance("onu-1", 256, 0).unwrap().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["admin_state"], AttributeValue::Unsigned(0));
    }

    #[test]
    fn set_updates_modified_only_on_change() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 256, 0, &attrs(&[("admin_state", 1)])).unwrap();
        let first = db
            .query("onu-1", Some(256), Some(0), None)
            .unwrap()
            .into_instance()
            .unwrap();

        db.set("onu-1", 256, 0, &attrs(&[("admin_state", 1)])).unwrap();
        let same = db
            .query("onu-1", Some(256), Some(0), None)
            .unwrap()
            .into_instance()
            .unwrap();
        assert_eq!(same.modified, first.modified);

        std::thread::sleep(std::time::Duration::from_millis(2));
        db.set("onu-1", 256, 0, &attrs(&[("admin_state", 0)])).unwrap();
        let changed = db
            .query("onu-1", Some(256), Some(0), None)
            .unwrap()
            .into_instance()
            .unwrap();
        assert!(changed.modified > first.modified);
        assert_eq!(changed.created, first.created);
    }

    #[test]
    fn ids_out_of_range() {
        let db = started(DatabaseKind::Mib);
        assert!(matches!(
            db.set("onu-1", 65536, 0, &AttributeMap::new()),
            Err(DatabaseError::InvalidArgument(_))
        ));
        assert!(matches!(
            db.set("onu-1", 6, 70000, &AttributeMap::new()),
            Err(DatabaseError::InvalidArgument(_))
        ));
        assert!(matches!(db.delete("onu-1", 65536, 0), Err(DatabaseError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_device() {
        let db = started(DatabaseKind::Mib);
        assert!(matches!(
            db.set("onu-9", 6, 0, &AttributeMap::new()),
            Err(DatabaseError::NotFound(_))
        ));
        assert!(matches!(db.query("onu-9", None, None, None), Err(DatabaseError::NotFound(_))));
        assert!(matches!(db.query("onu-9", Some(6), None, None), Err(DatabaseError::NotFound(_))));
        assert!(!db.remove("onu-9").unwrap());
        assert_eq!(db.get_mib_data_sync("onu-9").unwrap(), None);
    }

    #[test]
    fn delete_last_instance_removes_class() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 11, 257, &attrs(&[("x", 1)])).unwrap();
        db.set("onu-1", 11, 258, &attrs(&[("x", 1)])).unwrap();

        assert!(db.delete("onu-1", 11, 257).unwrap());
        assert!(!db.query("onu-1", Some(11), None, None).unwrap().is_empty());
        assert!(db.delete("onu-1", 11, 258).unwrap());
        assert!(db.query("onu-1", Some(11), None, None).unwrap().is_empty());
        assert!(!db.delete("onu-1", 11, 258).unwrap());

        let view = db.device_view("onu-1").unwrap();
        assert!(view.classes.is_empty());
    }

    #[test]
    fn query_levels() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 6, 1, &attrs(&[("a", 1), ("b", 2)])).unwrap();
        db.set("onu-1", 6, 2, &attrs(&[("a", 3)])).unwrap();
        db.set("onu-1", 256, 0, &attrs(&[("c", 4)])).unwrap();

        let device = db.device_view("onu-1").unwrap();
        assert_eq!(device.instances().count(), 3);

        let class = db.query("onu-1", Some(6), None, None).unwrap().into_class().unwrap();
        assert_eq!(class.instances.len(), 2);

        let filtered = db.query("onu-1", Some(6), Some(1), Some(&["b"])).unwrap();
        assert_eq!(filtered.attributes().unwrap().len(), 1);

        assert!(db.query("onu-1", Some(6), Some(9), None).unwrap().is_empty());
        assert!(matches!(
            db.query("onu-1", None, Some(1), None),
            Err(DatabaseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn mib_reset_keeps_bookkeeping() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 6, 1, &attrs(&[("a", 1)])).unwrap();
        db.save_mib_data_sync("onu-1", 17).unwrap();
        db.save_last_sync("onu-1", 12345).unwrap();
        let created = db.device_view("onu-1").unwrap().created;

        db.on_mib_reset("onu-1").unwrap();

        let view = db.device_view("onu-1").unwrap();
        assert!(view.classes.is_empty());
        assert_eq!(view.mib_data_sync, 0);
        assert_eq!(view.last_sync_time, Some(12345));
        assert_eq!(view.created, created);

        // unknown devices are ignored
        db.on_mib_reset("onu-9").unwrap();
    }

    #[test]
    fn scalar_accessors() {
        let db = started(DatabaseKind::Alarm);
        assert_eq!(db.get_last_sync("onu-1").unwrap(), None);
        db.save_alarm_last_sync("onu-1", 200).unwrap();
        assert_eq!(db.get_alarm_last_sync("onu-1").unwrap(), Some(200));
        assert!(matches!(
            db.save_mib_data_sync("onu-1", 256),
            Err(DatabaseError::InvalidArgument(_))
        ));
        assert!(matches!(
            db.save_last_sync("onu-9", 1),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn capabilities_are_recorded() {
        let db = started(DatabaseKind::Mib);
        db.update_supported_managed_entities("onu-1", &BTreeMap::from([(256, "OntG".to_string())]))
            .unwrap();
        db.update_supported_message_types(
            "onu-1",
            &BTreeSet::from([MessageType::Get, MessageType::Set]),
        )
        .unwrap();

        let view = db.device_view("onu-1").unwrap();
        assert_eq!(view.supported_managed_entities[&256], "OntG");
        assert_eq!(view.message_types, vec![8, 9]);
    }

    #[test]
    fn alarm_bitmap_stored_as_integer_string() {
        let store = Arc::new(InMemoryKvStore::new());
        let config = DatabaseConfig::new()
            .persistence(PersistenceMode::WriteThrough)
            .key_root("");
        let db = EntityDatabase::open(DatabaseKind::Alarm, &config, Some(store.clone())).unwrap();
        db.start();
        db.add("onu-1", false).unwrap();

        let bitmap = AlarmBitmap::with_alarms(&[223]).unwrap();
        let map = AttributeMap::from([(ALARM_BITMAP_ATTRIBUTE.to_string(), bitmap.into())]);
        db.set("onu-1", 11, 257, &map).unwrap();

        let blob = store.get("omci_alarms/onu-1/classes/11").unwrap().unwrap();
        let class: ClassRecord = omci_codec::from_cbor(&blob).unwrap();
        assert_eq!(class.instances[&257].attributes[ALARM_BITMAP_ATTRIBUTE], "1");

        let found = db.query_instance("onu-1", 11, 257).unwrap().unwrap();
        assert_eq!(found[ALARM_BITMAP_ATTRIBUTE], AttributeValue::Bitmap(bitmap));
    }

    #[test]
    fn wrong_value_type_is_invalid_argument() {
        let db = started(DatabaseKind::Alarm);
        let map = AttributeMap::from([(ALARM_BITMAP_ATTRIBUTE.to_string(), AttributeValue::from("x"))]);
        assert!(matches!(
            db.set("onu-1", 11, 1, &map),
            Err(DatabaseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn open_requires_store_for_remote_modes() {
        let config = DatabaseConfig::new().persistence(PersistenceMode::Lazy);
        assert!(EntityDatabase::open(DatabaseKind::Mib, &config, None).is_err());
    }

    #[test]
    fn template_seeds_device() {
        let db = started(DatabaseKind::Mib);
        let template = MibTemplate::from_json(
            r#"{"256": {"0": {"attributes": {"vendor_id": "BRCM"}}}, "6": {"257": {"attributes": {"type": 47}}}}"#,
        )
        .unwrap();
        assert_eq!(db.load_from_template("onu-1", &template).unwrap(), 2);
        assert_eq!(
            db.query_instance("onu-1", 6, 257).unwrap().unwrap()["type"],
            AttributeValue::Unsigned(47)
        );
    }

    #[test]
    fn dump_is_json() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 256, 0, &attrs(&[("admin_state", 1)])).unwrap();
        let json = db.dump_to_json("onu-1").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["device_id"], "onu-1");
        assert_eq!(
            parsed["classes"]["256"]["instances"]["0"]["attributes"]["admin_state"]["unsigned"],
            1
        );
    }

    #[test]
    fn statistics_count_operations() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 6, 1, &attrs(&[("a", 1)])).unwrap();
        db.query("onu-1", None, None, None).unwrap();
        db.delete("onu-1", 6, 1).unwrap();

        let stats = db.statistics();
        assert_eq!(stats.create.count, 1);
        assert_eq!(stats.set.count, 1);
        assert_eq!(stats.get.count, 1);
        assert_eq!(stats.delete.count, 1);
    }

    #[test]
    fn volatile_flush_is_not_applicable() {
        let db = started(DatabaseKind::Mib);
        assert_eq!(db.flush("onu-1").unwrap(), FlushOutcome::NotApplicable);
        assert!(!db.is_lazy());
    }

    #[test]
    fn busy_device_does_not_block_others() {
        let db = Arc::new(started(DatabaseKind::Mib));
        db.add("onu-2", false).unwrap();

        let held = db.device_lock("onu-1");
        let guard = held.lock();

        let other = Arc::clone(&db);
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = std::thread::spawn(move || {
            let changed = other.set("onu-2", 256, 0, &attrs(&[("admin_state", 1)])).unwrap();
            done_tx.send(changed).unwrap();
        });
        let changed = done_rx.recv_timeout(std::time::Duration::from_secs(5));
        drop(guard);
        writer.join().unwrap();

        assert_eq!(changed, Ok(true));
        assert!(Arc::ptr_eq(&held, &db.device_lock("onu-1")));
        assert!(!Arc::ptr_eq(&held, &db.device_lock("onu-2")));
    }

    #[test]
    fn replace_drops_missing_attributes() {
        let db = started(DatabaseKind::Mib);
        db.set("onu-1", 256, 0, &attrs(&[("a", 1), ("b", 2)])).unwrap();

        assert!(db.replace("onu-1", 256, 0, &attrs(&[("a", 1)])).unwrap());
        assert!(!db.replace("onu-1", 256, 0, &attrs(&[("a", 1)])).unwrap());
        let stored = db.query_instance("onu-1", 256, 0).unwrap().unwrap();
        assert_eq!(stored, attrs(&[("a", 1)]));
    }
}
