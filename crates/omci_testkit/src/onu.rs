//! A simulated ONU that answers OMCI requests from an in-memory MIB.
//!
//! The simulator keeps the state a real ONU exposes over OMCI: the managed
//! entity instances, the MIB data sync counter, and the alarm table with its
//! sequence number. Upload and get-all-alarms snapshot that state the way the
//! device does, so later changes do not leak into an upload in progress.

use async_trait::async_trait;
use omci_codec::{AlarmBitmap, AttributeMap, AttributeValue};
use omci_core::class_ids::ONT_DATA;
use omci_core::next_sequence;
use omci_sync_engine::tasks::MIB_DATA_SYNC;
use omci_sync_engine::{
    Notification, OmciRequest, OmciResponse, OmciTransport, ResponsePayload, ResultCode,
    SyncError, SyncResult,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct OnuState {
    mib_data_sync: u8,
    alarm_sequence: u8,
    mib: BTreeMap<(u16, u16), AttributeMap>,
    alarms: BTreeMap<(u16, u16), AlarmBitmap>,
    upload: Vec<((u16, u16), AttributeMap)>,
    alarm_upload: Vec<((u16, u16), AlarmBitmap)>,
}

/// An [`OmciTransport`] backed by a simulated device.
///
/// Every request is answered from the simulator's state whatever device id
/// it is addressed to.
#[derive(Debug)]
pub struct SimulatedOnu {
    state: Mutex<OnuState>,
    sent: Mutex<Vec<OmciRequest>>,
    connected: AtomicBool,
    timeouts: AtomicUsize,
}

impl SimulatedOnu {
    /// Creates an ONU with an empty MIB and a zero data sync counter.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OnuState::default()),
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            timeouts: AtomicUsize::new(0),
        }
    }

    /// Adds an instance, as if the ONU had created it on its own.
    ///
    /// The data sync counter is left alone.
    pub fn with_instance(self, class_id: u16, instance_id: u16, attributes: AttributeMap) -> Self {
        self.state.lock().mib.insert((class_id, instance_id), attributes);
        self
    }

    /// Sets the data sync counter.
    pub fn with_mib_data_sync(self, value: u8) -> Self {
        self.set_mib_data_sync(value);
        self
    }

    /// Overwrites the data sync counter.
    pub fn set_mib_data_sync(&self, value: u8) {
        self.state.lock().mib_data_sync = value;
    }

    /// Current data sync counter.
    pub fn mib_data_sync(&self) -> u8 {
        self.state.lock().mib_data_sync
    }

    /// Attributes of one instance, if it exists.
    pub fn instance(&self, class_id: u16, instance_id: u16) -> Option<AttributeMap> {
        self.state.lock().mib.get(&(class_id, instance_id)).cloned()
    }

    /// Number of instances in the MIB.
    pub fn instance_count(&self) -> usize {
        self.state.lock().mib.len()
    }

    /// Changes attributes on the device and returns the matching
    /// attribute value change notification. The counter does not move.
    pub fn change_attributes(
        &self,
        class_id: u16,
        instance_id: u16,
        attributes: AttributeMap,
    ) -> Notification {
        self.state
            .lock()
            .mib
            .entry((class_id, instance_id))
            .or_default()
            .extend(attributes.clone());
        Notification::AttributeValueChange {
            class_id,
            instance_id,
            attributes,
        }
    }

    /// Raises one alarm and returns the notification the ONU would send.
    pub fn raise_alarm(&self, class_id: u16, entity_id: u16, alarm: usize) -> Notification {
        self.update_alarm(class_id, entity_id, alarm, true)
    }

    /// Clears one alarm and returns the notification the ONU would send.
    pub fn clear_alarm(&self, class_id: u16, entity_id: u16, alarm: usize) -> Notification {
        self.update_alarm(class_id, entity_id, alarm, false)
    }

    fn update_alarm(&self, class_id: u16, entity_id: u16, alarm: usize, raised: bool) -> Notification {
        let mut state = self.state.lock();
        let bitmap = state.alarms.entry((class_id, entity_id)).or_default();
        if let Err(e) = bitmap.set(alarm, raised) {
            tracing::warn!(class_id, entity_id, alarm, error = %e, "alarm number out of range");
        }
        let bitmap = *bitmap;
        state.alarm_sequence = next_sequence(state.alarm_sequence);
        Notification::Alarm {
            class_id,
            entity_id,
            bitmap,
            sequence: state.alarm_sequence,
        }
    }

    /// Active alarms of one instance.
    pub fn alarms(&self, class_id: u16, entity_id: u16) -> AlarmBitmap {
        self.state
            .lock()
            .alarms
            .get(&(class_id, entity_id))
            .copied()
            .unwrap_or_default()
    }

    /// Makes the next `count` requests time out.
    pub fn time_out_next(&self, count: usize) {
        self.timeouts.store(count, Ordering::SeqCst);
    }

    /// Sets the connected state. Requests fail while disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every request received so far, in order.
    pub fn sent(&self) -> Vec<OmciRequest> {
        self.sent.lock().clone()
    }

    /// Number of requests received that change the MIB.
    pub fn config_requests(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|r| r.bumps_mib_data_sync())
            .count()
    }

    /// Forgets the recorded requests.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    fn take_timeout(&self) -> bool {
        self.timeouts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn answer(&self, request: &OmciRequest) -> OmciResponse {
        let mut state = self.state.lock();
        match request {
            OmciRequest::MibReset => {
                state.mib_data_sync = 0;
                state.upload.clear();
                OmciResponse::ok()
            }
            OmciRequest::MibUpload => {
                state.upload = state
                    .mib
                    .iter()
                    .map(|(key, attributes)| (*key, attributes.clone()))
                    .collect();
                let commands = u16::try_from(state.upload.len()).unwrap_or(u16::MAX);
                OmciResponse::success(ResponsePayload::MibUpload { commands })
            }
            OmciRequest::MibUploadNext { sequence } => {
                match state.upload.get(usize::from(*sequence)) {
                    Some(((class_id, instance_id), attributes)) => {
                        OmciResponse::success(ResponsePayload::MibUploadNext {
                            class_id: *class_id,
                            instance_id: *instance_id,
                            attributes: attributes.clone(),
                        })
                    }
                    None => OmciResponse::failed(ResultCode::ParameterError),
                }
            }
            OmciRequest::Get {
                class_id,
                instance_id,
                attributes,
            } => {
                if (*class_id, *instance_id) == (ONT_DATA, 0) {
                    return OmciResponse::success(ResponsePayload::Attributes(AttributeMap::from([(
                        MIB_DATA_SYNC.to_string(),
                        AttributeValue::Unsigned(u64::from(state.mib_data_sync)),
                    )])));
                }
                match state.mib.get(&(*class_id, *instance_id)) {
                    Some(values) => OmciResponse::success(ResponsePayload::Attributes(
                        values
                            .iter()
                            .filter(|(name, _)| attributes.contains(name))
                            .map(|(name, value)| (name.clone(), value.clone()))
                            .collect(),
                    )),
                    None => OmciResponse::failed(ResultCode::UnknownInstance),
                }
            }
            OmciRequest::Set {
                class_id,
                instance_id,
                attributes,
            } => match state.mib.get_mut(&(*class_id, *instance_id)) {
                Some(values) => {
                    values.extend(attributes.clone());
                    state.mib_data_sync = next_sequence(state.mib_data_sync);
                    OmciResponse::ok()
                }
                None => OmciResponse::failed(ResultCode::UnknownInstance),
            },
            OmciRequest::Create {
                class_id,
                instance_id,
                attributes,
            } => {
                let key = (*class_id, *instance_id);
                if state.mib.contains_key(&key) {
                    return OmciResponse::failed(ResultCode::InstanceExists);
                }
                state.mib.insert(key, attributes.clone());
                state.mib_data_sync = next_sequence(state.mib_data_sync);
                OmciResponse::ok()
            }
            OmciRequest::Delete {
                class_id,
                instance_id,
            } => {
                if state.mib.remove(&(*class_id, *instance_id)).is_none() {
                    return OmciResponse::failed(ResultCode::UnknownInstance);
                }
                state.mib_data_sync = next_sequence(state.mib_data_sync);
                OmciResponse::ok()
            }
            OmciRequest::GetAllAlarms => {
                state.alarm_sequence = 0;
                state.alarm_upload = state
                    .alarms
                    .iter()
                    .filter(|(_, bitmap)| !bitmap.is_clear())
                    .map(|(key, bitmap)| (*key, *bitmap))
                    .collect();
                let commands = u16::try_from(state.alarm_upload.len()).unwrap_or(u16::MAX);
                OmciResponse::success(ResponsePayload::GetAllAlarms { commands })
            }
            OmciRequest::GetAllAlarmsNext { sequence } => {
                match state.alarm_upload.get(usize::from(*sequence)) {
                    Some(((class_id, instance_id), bitmap)) => {
                        OmciResponse::success(ResponsePayload::GetAllAlarmsNext {
                            class_id: *class_id,
                            instance_id: *instance_id,
                            bitmap: *bitmap,
                        })
                    }
                    None => OmciResponse::failed(ResultCode::ParameterError),
                }
            }
        }
    }
}

impl Default for SimulatedOnu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OmciTransport for SimulatedOnu {
    async fn send(&self, device_id: &str, request: OmciRequest) -> SyncResult<OmciResponse> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::transport_fatal("onu unreachable"));
        }
        tracing::trace!(device_id, ?request, "simulated onu rx");
        self.sent.lock().push(request.clone());
        if self.take_timeout() {
            return Err(SyncError::Timeout);
        }
        Ok(self.answer(&request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(state: u64) -> AttributeMap {
        AttributeMap::from([("administrative_state".to_string(), AttributeValue::Unsigned(state))])
    }

    #[tokio::test]
    async fn config_requests_bump_counter() {
        let onu = SimulatedOnu::new().with_mib_data_sync(254);
        onu.send("onu-1", OmciRequest::create(11, 257, admin(1))).await.unwrap();
        onu.send("onu-1", OmciRequest::set(11, 257, admin(0))).await.unwrap();
        assert_eq!(onu.mib_data_sync(), 1);

        let exists = onu.send("onu-1", OmciRequest::create(11, 257, admin(1))).await.unwrap();
        assert_eq!(exists.result, ResultCode::InstanceExists);
        assert_eq!(onu.mib_data_sync(), 1);

        onu.send("onu-1", OmciRequest::delete(11, 257)).await.unwrap();
        assert_eq!(onu.mib_data_sync(), 2);
        assert_eq!(onu.instance_count(), 0);
        assert_eq!(onu.config_requests(), 4);
    }

    #[tokio::test]
    async fn upload_is_a_snapshot() {
        let onu = SimulatedOnu::new().with_instance(256, 0, admin(0));
        let started = onu.send("onu-1", OmciRequest::MibUpload).await.unwrap();
        assert_eq!(started.payload, ResponsePayload::MibUpload { commands: 1 });

        onu.send("onu-1", OmciRequest::create(11, 257, admin(1))).await.unwrap();
        let first = onu.send("onu-1", OmciRequest::MibUploadNext { sequence: 0 }).await.unwrap();
        assert!(matches!(first.payload, ResponsePayload::MibUploadNext { class_id: 256, .. }));
        let past_end = onu.send("onu-1", OmciRequest::MibUploadNext { sequence: 1 }).await.unwrap();
        assert_eq!(past_end.result, ResultCode::ParameterError);
    }

    #[tokio::test]
    async fn alarm_sequence_resets_on_get_all_alarms() {
        let onu = SimulatedOnu::new();
        let first = onu.raise_alarm(263, 0x8001, 0);
        assert!(matches!(first, Notification::Alarm { sequence: 1, .. }));
        onu.raise_alarm(256, 0, 2);

        let table = onu.send("onu-1", OmciRequest::GetAllAlarms).await.unwrap();
        assert_eq!(table.payload, ResponsePayload::GetAllAlarms { commands: 2 });
        let next = onu.clear_alarm(256, 0, 2);
        assert!(matches!(next, Notification::Alarm { sequence: 1, .. }));
        assert!(onu.alarms(256, 0).is_clear());
    }

    #[tokio::test]
    async fn timeouts_and_disconnects() {
        let onu = SimulatedOnu::new();
        onu.time_out_next(1);
        assert!(matches!(onu.send("onu-1", OmciRequest::MibReset).await, Err(SyncError::Timeout)));
        assert!(onu.send("onu-1", OmciRequest::MibReset).await.is_ok());

        onu.set_connected(false);
        let err = onu.send("onu-1", OmciRequest::MibReset).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(onu.sent().len(), 2);
    }
}
