//! Alarm synchronizer state machine.
//!
//! Keeps one alarm bitmap per ME instance in the alarm database and turns
//! bitmap changes into raise and clear events. Autonomous alarm
//! notifications are applied as they arrive; periodic audits fetch the
//! whole alarm table and repair whatever the notifications missed.
//!
//! Runs as an actor, like [`MibSynchronizer`](crate::MibSynchronizer).

use crate::alarms::{describe_alarm, OnuAlarmKind};
use crate::config::AlarmSyncConfig;
use crate::device::DeviceContext;
use crate::diff::ThreeWayDiff;
use crate::error::{SyncError, SyncResult};
use crate::events::{AlarmEvent, OmciEvent};
use crate::notify::{topic, Notification, NotificationKind, SubscriptionId};
use crate::task::TaskId;
use crate::tasks::{AlarmResyncTask, AlarmSnapshot};
use omci_codec::{AlarmBitmap, AttributeMap, AttributeValue, ALARM_BITMAP_ATTRIBUTE};
use omci_core::next_sequence;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// State of an [`AlarmSynchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmSyncState {
    /// Not running.
    Disabled,
    /// Waiting for the first audit.
    Starting,
    /// Fetching the device alarm table.
    Auditing,
    /// Local alarms match the device.
    InSync,
    /// Audits kept failing; waits for an explicit audit.
    OutOfSync,
}

impl AlarmSyncState {
    /// Returns the state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            AlarmSyncState::Disabled => "disabled",
            AlarmSyncState::Starting => "starting",
            AlarmSyncState::Auditing => "auditing",
            AlarmSyncState::InSync => "in_sync",
            AlarmSyncState::OutOfSync => "out_of_sync",
        }
    }
}

impl fmt::Display for AlarmSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Message {
    Start(oneshot::Sender<SyncResult<()>>),
    Stop(oneshot::Sender<()>),
    Audit(oneshot::Sender<SyncResult<()>>),
    Timer {
        generation: u64,
        token: u64,
    },
    AuditDone {
        generation: u64,
        task_id: TaskId,
        result: SyncResult<AlarmSnapshot>,
    },
    Notification {
        generation: u64,
        notification: Notification,
    },
    Shutdown,
}

/// Handle on the alarm synchronizer of one device.
///
/// Dropping the handle stops the synchronizer.
pub struct AlarmSynchronizer {
    device_id: Arc<str>,
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<AlarmSyncState>,
}

impl AlarmSynchronizer {
    /// Spawns a disabled synchronizer. Must be called within a Tokio runtime.
    pub fn spawn(ctx: DeviceContext, config: AlarmSyncConfig) -> Self {
        let (mailbox, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(AlarmSyncState::Disabled);
        let device_id = Arc::clone(&ctx.device_id);
        let actor = AlarmSyncActor {
            ctx,
            config,
            mailbox: mailbox.clone(),
            state: state_tx,
            generation: 0,
            timer_token: 0,
            current_task: None,
            subscriptions: Vec::new(),
            audit_attempts: 0,
            audit_failures: 0,
        };
        tokio::spawn(actor.run(receiver));
        Self {
            device_id,
            mailbox,
            state,
        }
    }

    /// Device this synchronizer serves.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Current state.
    pub fn state(&self) -> AlarmSyncState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<AlarmSyncState> {
        self.state.clone()
    }

    /// Waits until the synchronizer reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the synchronizer shuts down first.
    pub async fn wait_for_state(&self, target: AlarmSyncState) -> SyncResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Cancelled)
    }

    /// Starts synchronizing. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns a database error if the device root cannot be created.
    pub async fn start(&self) -> SyncResult<()> {
        self.call(Message::Start).await?
    }

    /// Stops synchronizing and cancels outstanding work.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the synchronizer already shut down.
    pub async fn stop(&self) -> SyncResult<()> {
        self.call(Message::Stop).await
    }

    /// Requests an audit now, whether or not periodic audits are enabled.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] when disabled.
    pub async fn audit(&self) -> SyncResult<()> {
        self.call(Message::Audit).await?
    }

    async fn call<R>(&self, message: impl FnOnce(oneshot::Sender<R>) -> Message) -> SyncResult<R> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(message(tx))
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }
}

impl Drop for AlarmSynchronizer {
    fn drop(&mut self) {
        let _ = self.mailbox.send(Message::Shutdown);
    }
}

impl fmt::Debug for AlarmSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlarmSynchronizer")
            .field("device_id", &self.device_id)
            .field("state", &self.state())
            .finish()
    }
}

struct AlarmSyncActor {
    ctx: DeviceContext,
    config: AlarmSyncConfig,
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Sender<AlarmSyncState>,
    generation: u64,
    timer_token: u64,
    current_task: Option<TaskId>,
    subscriptions: Vec<SubscriptionId>,
    audit_attempts: u32,
    audit_failures: u32,
}

impl AlarmSyncActor {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = receiver.recv().await {
            match message {
                Message::Start(reply) => {
                    let _ = reply.send(self.start());
                }
                Message::Stop(reply) => {
                    self.stop();
                    let _ = reply.send(());
                }
                Message::Audit(reply) => {
                    let _ = reply.send(self.request_audit());
                }
                Message::Timer { generation, token } => {
                    if generation == self.generation && token == self.timer_token {
                        self.on_timer();
                    }
                }
                Message::AuditDone {
                    generation,
                    task_id,
                    result,
                } => {
                    if generation == self.generation && self.current_task == Some(task_id) {
                        self.current_task = None;
                        self.on_audit_done(result);
                    }
                }
                Message::Notification {
                    generation,
                    notification,
                } => {
                    if generation == self.generation {
                        self.on_notification(&notification);
                    }
                }
                Message::Shutdown => {
                    self.stop();
                    break;
                }
            }
        }
        tracing::debug!(device_id = %self.ctx.device_id, "alarm synchronizer exited");
    }

    fn current(&self) -> AlarmSyncState {
        *self.state.borrow()
    }

    fn device_id(&self) -> &str {
        &self.ctx.device_id
    }

    fn start(&mut self) -> SyncResult<()> {
        if self.current() != AlarmSyncState::Disabled {
            return Ok(());
        }
        let db = &self.ctx.alarm_database;
        if !db.contains(&self.ctx.device_id)? {
            db.add(&self.ctx.device_id, false)?;
        }

        self.generation += 1;
        for kind in [NotificationKind::Alarm, NotificationKind::GetAllAlarms] {
            let mailbox = self.mailbox.clone();
            let generation = self.generation;
            let id = self.ctx.bus.subscribe(
                topic(&self.ctx.device_id, kind),
                Arc::new(move |notification: &Notification| {
                    let _ = mailbox.send(Message::Notification {
                        generation,
                        notification: notification.clone(),
                    });
                }),
            );
            self.subscriptions.push(id);
        }

        tracing::info!(device_id = self.device_id(), "alarm synchronizer started");
        self.transition(AlarmSyncState::Starting);
        Ok(())
    }

    fn stop(&mut self) {
        self.generation += 1;
        self.timer_token += 1;
        if let Some(task_id) = self.current_task.take() {
            self.ctx.runner.cancel(task_id);
        }
        for id in self.subscriptions.drain(..) {
            self.ctx.bus.unsubscribe(id);
        }
        self.audit_attempts = 0;
        self.audit_failures = 0;
        self.set_state(AlarmSyncState::Disabled);
    }

    fn request_audit(&mut self) -> SyncResult<()> {
        match self.current() {
            AlarmSyncState::Starting | AlarmSyncState::InSync | AlarmSyncState::OutOfSync => {
                self.transition(AlarmSyncState::Auditing);
                Ok(())
            }
            AlarmSyncState::Auditing => Ok(()),
            AlarmSyncState::Disabled => {
                Err(SyncError::invalid_state(AlarmSyncState::Disabled, "auditing"))
            }
        }
    }

    fn set_state(&mut self, state: AlarmSyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(device_id = self.device_id(), from = %previous, to = %state, "alarm sync state change");
            self.ctx.events.publish(OmciEvent::AlarmStateChange {
                device_id: self.device_id().to_string(),
                state,
            });
        }
    }

    fn transition(&mut self, state: AlarmSyncState) {
        self.set_state(state);
        match state {
            AlarmSyncState::Starting => {
                if self.config.audits_enabled() {
                    self.schedule(self.config.timeout_delay);
                } else {
                    self.transition(AlarmSyncState::InSync);
                }
            }
            AlarmSyncState::InSync => {
                self.audit_attempts = 0;
                if self.config.audits_enabled() {
                    self.schedule(self.config.audit_delay);
                } else {
                    self.timer_token += 1;
                }
            }
            AlarmSyncState::Auditing => {
                self.timer_token += 1;
                self.queue_audit();
            }
            AlarmSyncState::OutOfSync => self.timer_token += 1,
            AlarmSyncState::Disabled => {}
        }
    }

    fn on_timer(&mut self) {
        match self.current() {
            AlarmSyncState::Disabled | AlarmSyncState::OutOfSync => {}
            _ => self.transition(AlarmSyncState::Auditing),
        }
    }

    fn schedule(&mut self, delay: Duration) {
        self.timer_token += 1;
        let generation = self.generation;
        let token = self.timer_token;
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(Message::Timer { generation, token });
        });
    }

    fn queue_audit(&mut self) {
        if let Some(previous) = self.current_task.take() {
            self.ctx.runner.cancel(previous);
        }
        let handle = self.ctx.runner.queue_task(AlarmResyncTask);
        let task_id = handle.id();
        self.current_task = Some(task_id);
        let generation = self.generation;
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let result = handle.await;
            let _ = mailbox.send(Message::AuditDone {
                generation,
                task_id,
                result,
            });
        });
    }

    fn on_audit_done(&mut self, result: SyncResult<AlarmSnapshot>) {
        let outcome = result.and_then(|snapshot| self.apply_audit(&snapshot));
        if outcome.is_ok() {
            self.audit_failures = 0;
        }
        match outcome {
            Ok(0) => self.transition(AlarmSyncState::InSync),
            Ok(changes) => {
                self.audit_attempts += 1;
                if self.audit_attempts >= self.config.max_audit_attempts {
                    tracing::warn!(
                        device_id = self.device_id(),
                        attempts = self.audit_attempts,
                        "alarm table keeps changing, giving up until the next audit"
                    );
                    self.ctx.events.publish(OmciEvent::AlarmAuditIncomplete {
                        device_id: self.device_id().to_string(),
                        attempts: self.audit_attempts,
                    });
                    self.transition(AlarmSyncState::InSync);
                } else {
                    tracing::info!(device_id = self.device_id(), changes, "alarm audit found differences");
                    self.schedule(self.config.reaudit_delay);
                }
            }
            Err(e) => self.audit_failed(e),
        }
    }

    fn audit_failed(&mut self, error: SyncError) {
        self.audit_failures += 1;
        if self.audit_failures > self.config.max_audit_failures {
            let reason = format!("{} consecutive audit failures, last: {error}", self.audit_failures);
            tracing::warn!(device_id = self.device_id(), %reason, "alarms out of sync");
            self.transition(AlarmSyncState::OutOfSync);
            self.ctx.events.publish(OmciEvent::AlarmOutOfSync {
                device_id: self.device_id().to_string(),
                reason,
            });
        } else {
            tracing::warn!(
                device_id = self.device_id(),
                error = %error,
                failures = self.audit_failures,
                "alarm audit failed"
            );
            self.transition(AlarmSyncState::Starting);
        }
    }

    /// Makes the local alarm table match `snapshot`. Returns the number of
    /// instances whose active alarms changed.
    fn apply_audit(&self, snapshot: &AlarmSnapshot) -> SyncResult<usize> {
        let db = &self.ctx.alarm_database;
        let device_id = self.device_id();
        // The get-all-alarms request reset the device's sequence.
        db.save_alarm_last_sync(device_id, 0)?;

        let mut local = AlarmSnapshot::new();
        let mut malformed = Vec::new();
        for (key, attributes) in db.device_view(device_id)?.instances() {
            match attributes.get(ALARM_BITMAP_ATTRIBUTE).and_then(AttributeValue::as_bitmap) {
                Some(bitmap) => {
                    local.insert(key, *bitmap);
                }
                None => malformed.push(key),
            }
        }
        // Rows without a bitmap carry no alarms; drop them quietly.
        for (class_id, entity_id) in malformed {
            db.delete(device_id, u32::from(class_id), u32::from(entity_id))?;
        }
        let diff = ThreeWayDiff::compute(&local, snapshot, |l, d| l == d);

        let mut changes = diff.remote_only.len() + diff.differing.len();
        for key in diff.remote_only.iter().chain(&diff.differing) {
            self.process_alarm_data(key.0, key.1, snapshot[key], None)?;
        }
        for key in &diff.local_only {
            if !local[key].is_clear() {
                changes += 1;
                self.process_alarm_data(key.0, key.1, AlarmBitmap::CLEAR, None)?;
            }
            db.delete(device_id, u32::from(key.0), u32::from(key.1))?;
        }
        Ok(changes)
    }

    fn on_notification(&mut self, notification: &Notification) {
        match notification {
            Notification::Alarm {
                class_id,
                entity_id,
                bitmap,
                sequence,
            } => {
                if !self.ctx.catalog.supports_alarms(*class_id) {
                    tracing::warn!(
                        device_id = self.device_id(),
                        class_id,
                        entity_id,
                        "alarm from a class without alarm support dropped"
                    );
                    return;
                }
                match self.process_alarm_data(*class_id, *entity_id, *bitmap, Some(*sequence)) {
                    Ok(true)
                        if self.config.audits_enabled()
                            && matches!(
                                self.current(),
                                AlarmSyncState::Starting | AlarmSyncState::InSync
                            ) =>
                    {
                        self.transition(AlarmSyncState::Auditing);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(device_id = self.device_id(), class_id, entity_id, error = %e, "failed to apply alarm");
                    }
                }
            }
            Notification::GetAllAlarmsResponse { commands } => {
                tracing::debug!(device_id = self.device_id(), commands, "alarm sequence reset");
                if let Err(e) = self.ctx.alarm_database.save_alarm_last_sync(self.device_id(), 0) {
                    tracing::warn!(device_id = self.device_id(), error = %e, "failed to reset alarm sequence");
                }
            }
            _ => {}
        }
    }

    /// Stores a new bitmap for one instance and emits its alarm transitions.
    ///
    /// `sequence` is the notification's alarm sequence number, `None` for
    /// audit data. Returns true if the sequence shows a lost notification.
    fn process_alarm_data(
        &self,
        class_id: u16,
        entity_id: u16,
        bitmap: AlarmBitmap,
        sequence: Option<u8>,
    ) -> SyncResult<bool> {
        let db = &self.ctx.alarm_database;
        let device_id = self.device_id();

        let mut lost = false;
        if let Some(reported) = sequence.filter(|s| *s > 0) {
            let expected = next_sequence(db.get_alarm_last_sync(device_id)?.unwrap_or(0));
            db.save_alarm_last_sync(device_id, u32::from(expected))?;
            if reported != expected {
                tracing::info!(device_id, expected, reported, "alarm sequence mismatch");
                lost = true;
            }
        }

        let previous = db
            .query_instance(device_id, u32::from(class_id), u32::from(entity_id))?
            .and_then(|attributes| {
                attributes
                    .get(ALARM_BITMAP_ATTRIBUTE)
                    .and_then(AttributeValue::as_bitmap)
                    .copied()
            })
            .unwrap_or(AlarmBitmap::CLEAR);
        let attributes = AttributeMap::from([(
            ALARM_BITMAP_ATTRIBUTE.to_string(),
            AttributeValue::Bitmap(bitmap),
        )]);
        db.set(device_id, u32::from(class_id), u32::from(entity_id), &attributes)?;

        for alarm in bitmap.newly_cleared(&previous) {
            self.ctx
                .events
                .publish(OmciEvent::AlarmCleared(self.alarm_event(class_id, entity_id, alarm)));
        }
        for alarm in bitmap.newly_raised(&previous) {
            self.ctx
                .events
                .publish(OmciEvent::AlarmRaised(self.alarm_event(class_id, entity_id, alarm)));
        }
        Ok(lost)
    }

    fn alarm_event(&self, class_id: u16, entity_id: u16, alarm_number: usize) -> AlarmEvent {
        AlarmEvent {
            device_id: self.device_id().to_string(),
            kind: OnuAlarmKind::from_omci(class_id, alarm_number),
            class_id,
            entity_id,
            alarm_number,
            interface: self.ctx.ports.interface_for(class_id, entity_id),
            description: describe_alarm(class_id, alarm_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::PortRegistry;
    use crate::config::SchedulerConfig;
    use crate::events::RecordingEventSink;
    use crate::frame::{OmciResponse, ResponsePayload};
    use crate::notify::NotificationBus;
    use crate::scheduler::TaskRunner;
    use crate::transport::{GatedTransport, MockTransport};
    use omci_core::class_ids::{ANI_G, ONT_DATA, ONT_G};
    use omci_core::{DatabaseKind, EntityDatabase, MeCatalog};

    struct Fixture {
        transport: Arc<MockTransport>,
        events: Arc<RecordingEventSink>,
        ctx: DeviceContext,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let events = Arc::new(RecordingEventSink::new());
        let mib_database = Arc::new(EntityDatabase::volatile(DatabaseKind::Mib));
        mib_database.start();
        let alarm_database = Arc::new(EntityDatabase::volatile(DatabaseKind::Alarm));
        alarm_database.start();
        let ports = Arc::new(PortRegistry::new());
        ports.register_ani(1, 1024);
        let ctx = DeviceContext {
            device_id: Arc::from("onu-1"),
            mib_database,
            alarm_database,
            runner: TaskRunner::new("onu-1", transport.clone(), SchedulerConfig::default()),
            bus: Arc::new(NotificationBus::new()),
            events: events.clone(),
            catalog: Arc::new(MeCatalog::standard()),
            ports,
        };
        Fixture {
            transport,
            events,
            ctx,
        }
    }

    fn alarm(class_id: u16, raised: &[usize], sequence: u8) -> Notification {
        Notification::Alarm {
            class_id,
            entity_id: 0,
            bitmap: AlarmBitmap::with_alarms(raised).unwrap(),
            sequence,
        }
    }

    fn stored_bitmap(ctx: &DeviceContext, class_id: u32) -> Option<AlarmBitmap> {
        ctx.alarm_database
            .query_instance("onu-1", class_id, 0)
            .unwrap()
            .and_then(|a| a.get(ALARM_BITMAP_ATTRIBUTE).and_then(AttributeValue::as_bitmap).copied())
    }

    /// Scripts a get-all-alarms exchange; each entry has one alarm raised.
    fn script_alarm_table(transport: &MockTransport, entries: &[(u16, u16, usize)]) {
        transport.push_response(OmciResponse::success(ResponsePayload::GetAllAlarms {
            commands: entries.len() as u16,
        }));
        for &(class_id, instance_id, raised) in entries {
            transport.push_response(OmciResponse::success(ResponsePayload::GetAllAlarmsNext {
                class_id,
                instance_id,
                bitmap: AlarmBitmap::with_alarms(&[raised]).unwrap(),
            }));
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_raise_then_clear() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();

        f.ctx.bus.publish_for("onu-1", &alarm(ONT_G, &[7], 1));
        settle().await;
        let events = f.events.take();
        let raised: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OmciEvent::AlarmRaised(a) => Some(a.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, Some(OnuAlarmKind::DyingGasp));
        assert_eq!(raised[0].interface, Some(1024));

        f.ctx.bus.publish_for("onu-1", &alarm(ONT_G, &[], 2));
        settle().await;
        assert!(matches!(
            f.events.alarm_events().as_slice(),
            [OmciEvent::AlarmCleared(a)] if a.alarm_number == 7
        ));
        assert_eq!(stored_bitmap(&f.ctx, u32::from(ONT_G)), Some(AlarmBitmap::CLEAR));
        assert_eq!(f.ctx.alarm_database.get_alarm_last_sync("onu-1").unwrap(), Some(2));
        assert!(f.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_gap_triggers_audit() {
        let f = fixture();
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), AlarmSyncConfig::default());
        sync.start().await.unwrap();
        assert_eq!(sync.state(), AlarmSyncState::Starting);

        script_alarm_table(&f.transport, &[(ANI_G, 0, 0)]);
        script_alarm_table(&f.transport, &[(ANI_G, 0, 0)]);
        f.ctx.bus.publish_for("onu-1", &alarm(ONT_G, &[0], 5));
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();

        // Device knows only the ANI alarm: ONT-G cleared, ANI-G raised.
        assert_eq!(stored_bitmap(&f.ctx, u32::from(ONT_G)), None);
        assert_eq!(
            stored_bitmap(&f.ctx, u32::from(ANI_G)),
            Some(AlarmBitmap::with_alarms(&[0]).unwrap())
        );
        assert_eq!(f.ctx.alarm_database.get_alarm_last_sync("onu-1").unwrap(), Some(0));
        let kinds: Vec<_> = f
            .events
            .alarm_events()
            .into_iter()
            .map(|e| match e {
                OmciEvent::AlarmRaised(a) => ("raised", a.class_id),
                OmciEvent::AlarmCleared(a) => ("cleared", a.class_id),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(kinds, vec![("raised", ONT_G), ("raised", ANI_G), ("cleared", ONT_G)]);
    }

    #[tokio::test(start_paused = true)]
    async fn audit_repeats_until_clean() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();

        script_alarm_table(&f.transport, &[(ONT_G, 0, 8)]);
        script_alarm_table(&f.transport, &[(ONT_G, 0, 8)]);
        sync.audit().await.unwrap();
        settle().await;
        assert_eq!(sync.state(), AlarmSyncState::Auditing);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sync.state(), AlarmSyncState::InSync);
        assert_eq!(f.transport.remaining(), 0);
        assert_eq!(f.events.alarm_events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_class_is_dropped() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();

        f.ctx.bus.publish_for("onu-1", &alarm(ONT_DATA, &[0], 1));
        settle().await;
        assert!(f.events.alarm_events().is_empty());
        assert_eq!(stored_bitmap(&f.ctx, u32::from(ONT_DATA)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn get_all_alarms_response_resets_sequence() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();

        f.ctx.bus.publish_for("onu-1", &alarm(ONT_G, &[0], 1));
        settle().await;
        assert_eq!(f.ctx.alarm_database.get_alarm_last_sync("onu-1").unwrap(), Some(1));

        f.ctx
            .bus
            .publish_for("onu-1", &Notification::GetAllAlarmsResponse { commands: 3 });
        settle().await;
        assert_eq!(f.ctx.alarm_database.get_alarm_last_sync("onu-1").unwrap(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drops_later_notifications() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();
        sync.stop().await.unwrap();

        f.ctx.bus.publish_for("onu-1", &alarm(ONT_G, &[0], 1));
        settle().await;
        assert_eq!(sync.state(), AlarmSyncState::Disabled);
        assert!(f.events.alarm_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_audit_failures_go_out_of_sync() {
        let f = fixture();
        let config = AlarmSyncConfig::default().with_max_audit_failures(1);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();

        // Nothing scripted: every get-all-alarms request fails.
        sync.wait_for_state(AlarmSyncState::OutOfSync).await.unwrap();
        assert_eq!(f.transport.sent().len(), 2);
        assert!(f
            .events
            .events()
            .iter()
            .any(|e| matches!(e, OmciEvent::AlarmOutOfSync { .. })));

        // Parked: no more audits on their own.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(f.transport.sent().len(), 2);
        assert_eq!(sync.state(), AlarmSyncState::OutOfSync);

        // An explicit audit that succeeds brings it back.
        script_alarm_table(&f.transport, &[]);
        sync.audit().await.unwrap();
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn audit_removes_rows_without_a_bitmap() {
        let f = fixture();
        f.ctx.alarm_database.add("onu-1", false).unwrap();
        let stray = AttributeMap::from([("note".to_string(), AttributeValue::Unsigned(1))]);
        f.ctx
            .alarm_database
            .set("onu-1", u32::from(ANI_G), 0, &stray)
            .unwrap();

        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(f.ctx.clone(), config);
        sync.start().await.unwrap();
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();

        script_alarm_table(&f.transport, &[]);
        sync.audit().await.unwrap();
        settle().await;

        assert_eq!(sync.state(), AlarmSyncState::InSync);
        assert_eq!(f.ctx.alarm_database.query_instance("onu-1", u32::from(ANI_G), 0).unwrap(), None);
        assert!(f.events.alarm_events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn audit_answered_after_stop_changes_nothing() {
        let f = fixture();
        let gated = Arc::new(GatedTransport::new());
        script_alarm_table(&gated.inner, &[(ONT_G, 0, 3)]);
        let ctx = DeviceContext {
            runner: TaskRunner::new("onu-1", gated.clone(), SchedulerConfig::default()),
            ..f.ctx.clone()
        };
        let config = AlarmSyncConfig::default().with_audit_delay(Duration::ZERO);
        let sync = AlarmSynchronizer::spawn(ctx.clone(), config);
        sync.start().await.unwrap();
        sync.wait_for_state(AlarmSyncState::InSync).await.unwrap();

        sync.audit().await.unwrap();
        settle().await;
        assert_eq!(sync.state(), AlarmSyncState::Auditing);
        assert_eq!(gated.waiting(), 1);

        sync.stop().await.unwrap();
        f.events.take();
        gated.release_all();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(sync.state(), AlarmSyncState::Disabled);
        assert!(f.events.events().is_empty());
        assert_eq!(stored_bitmap(&ctx, u32::from(ONT_G)), None);
        assert!(!ctx.runner.is_busy());
    }
}
