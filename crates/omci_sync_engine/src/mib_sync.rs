//! MIB synchronizer state machine.
//!
//! One synchronizer per device keeps the MIB database in step with the ONU.
//!
//! ```text
//! Disabled -> Starting -> Examining -> InSync
//!                 |           |          ^  |
//!                 |           v          |  v
//!                 +------> Uploading     Auditing <-> Resynchronizing
//!                 |                          |              |
//!                 +-- (warm start) ----------+              v
//!                                                       OutOfSync -> Reconciling -> Starting
//! ```
//!
//! The synchronizer is an actor: commands, timers, task completions and
//! notifications all arrive through one mailbox and are handled in order.
//! Every message that can outlive a lifecycle carries the generation it
//! was created in, and stale generations are dropped.

use crate::config::MibSyncConfig;
use crate::device::DeviceContext;
use crate::diff::ThreeWayDiff;
use crate::error::{SyncError, SyncResult};
use crate::events::OmciEvent;
use crate::notify::{topic, Notification, NotificationKind, SubscriptionId};
use crate::task::{OmciTask, TaskId};
use crate::tasks::{
    GetMdsTask, MibReconcileTask, MibResyncTask, MibSnapshot, MibTemplateTask, MibUploadTask,
    ReconcileReport, ResyncSnapshot,
};
use omci_codec::AttributeValue;
use omci_core::class_ids::OMCI;
use omci_core::{next_sequence, now_millis, DatabaseResult, MessageType, MibTemplate, TemplateStore};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// State of a [`MibSynchronizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MibSyncState {
    /// Not running.
    Disabled,
    /// Deciding how to synchronize.
    Starting,
    /// Running a full MIB upload.
    Uploading,
    /// Looking for a matching MIB template.
    Examining,
    /// Local MIB matches the device.
    InSync,
    /// Comparing MIB data sync counters.
    Auditing,
    /// Repairing differences found by an audit.
    Resynchronizing,
    /// Automatic repair gave up; waiting for a reconcile.
    OutOfSync,
    /// Pushing the local MIB to the device.
    Reconciling,
}

impl MibSyncState {
    /// Returns the state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            MibSyncState::Disabled => "disabled",
            MibSyncState::Starting => "starting",
            MibSyncState::Uploading => "uploading",
            MibSyncState::Examining => "examining",
            MibSyncState::InSync => "in_sync",
            MibSyncState::Auditing => "auditing",
            MibSyncState::Resynchronizing => "resynchronizing",
            MibSyncState::OutOfSync => "out_of_sync",
            MibSyncState::Reconciling => "reconciling",
        }
    }

    /// Returns true if autonomous notifications are applied in this state.
    pub fn accepts_notifications(self) -> bool {
        matches!(self, MibSyncState::InSync | MibSyncState::Auditing)
    }
}

impl fmt::Display for MibSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Message {
    Start(oneshot::Sender<SyncResult<()>>),
    Stop(oneshot::Sender<()>),
    Audit(oneshot::Sender<SyncResult<()>>),
    Reconcile(oneshot::Sender<SyncResult<()>>),
    Timer {
        generation: u64,
        token: u64,
        action: TimerAction,
    },
    TaskDone {
        generation: u64,
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    Notification {
        generation: u64,
        notification: Notification,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum TimerAction {
    Restart,
    Audit,
}

enum TaskOutcome {
    Template(SyncResult<Option<MibTemplate>>),
    Upload(SyncResult<MibSnapshot>),
    Mds(SyncResult<u8>),
    Resync(SyncResult<ResyncSnapshot>),
    Reconcile(SyncResult<ReconcileReport>),
}

/// Handle on the MIB synchronizer of one device.
///
/// Dropping the handle stops the synchronizer.
pub struct MibSynchronizer {
    device_id: Arc<str>,
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Receiver<MibSyncState>,
}

impl MibSynchronizer {
    /// Spawns a disabled synchronizer. Must be called within a Tokio runtime.
    pub fn spawn(
        ctx: DeviceContext,
        config: MibSyncConfig,
        templates: Option<Arc<TemplateStore>>,
    ) -> Self {
        let (mailbox, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(MibSyncState::Disabled);
        let device_id = Arc::clone(&ctx.device_id);
        let actor = MibSyncActor {
            ctx,
            config,
            templates,
            mailbox: mailbox.clone(),
            state: state_tx,
            generation: 0,
            timer_token: 0,
            current_task: None,
            subscriptions: Vec::new(),
            audit_failures: 0,
            resync_attempts: 0,
            audit_requested: false,
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
    pub fn state(&self) -> MibSyncState {
        *self.state.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<MibSyncState> {
        self.state.clone()
    }

    /// Waits until the synchronizer reaches `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the synchronizer shuts down first.
    pub async fn wait_for_state(&self, target: MibSyncState) -> SyncResult<()> {
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

    /// Requests an audit now.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] unless the MIB is in sync or
    /// already being audited.
    pub async fn audit(&self) -> SyncResult<()> {
        self.call(Message::Audit).await?
    }

    /// Pushes the local MIB to the device after synchronization gave up.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidState`] unless the state is
    /// [`MibSyncState::OutOfSync`].
    pub async fn reconcile(&self) -> SyncResult<()> {
        self.call(Message::Reconcile).await?
    }

    async fn call<R>(&self, message: impl FnOnce(oneshot::Sender<R>) -> Message) -> SyncResult<R> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(message(tx))
            .map_err(|_| SyncError::Cancelled)?;
        rx.await.map_err(|_| SyncError::Cancelled)
    }
}

impl Drop for MibSynchronizer {
    fn drop(&mut self) {
        let _ = self.mailbox.send(Message::Shutdown);
    }
}

impl fmt::Debug for MibSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MibSynchronizer")
            .field("device_id", &self.device_id)
            .field("state", &self.state())
            .finish()
    }
}

struct MibSyncActor {
    ctx: DeviceContext,
    config: MibSyncConfig,
    templates: Option<Arc<TemplateStore>>,
    mailbox: mpsc::UnboundedSender<Message>,
    state: watch::Sender<MibSyncState>,
    generation: u64,
    timer_token: u64,
    current_task: Option<TaskId>,
    subscriptions: Vec<SubscriptionId>,
    audit_failures: u32,
    resync_attempts: u32,
    /// A notification asked for an audit while one was already running.
    audit_requested: bool,
}

impl MibSyncActor {
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
                Message::Reconcile(reply) => {
                    let _ = reply.send(self.request_reconcile());
                }
                Message::Timer {
                    generation,
                    token,
                    action,
                } => {
                    if generation == self.generation && token == self.timer_token {
                        self.on_timer(action);
                    }
                }
                Message::TaskDone {
                    generation,
                    task_id,
                    outcome,
                } => {
                    if generation == self.generation {
                        self.on_task_done(task_id, outcome);
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
        tracing::debug!(device_id = %self.ctx.device_id, "mib synchronizer exited");
    }

    fn current(&self) -> MibSyncState {
        *self.state.borrow()
    }

    fn device_id(&self) -> &str {
        &self.ctx.device_id
    }

    // ---- commands ----

    fn start(&mut self) -> SyncResult<()> {
        if self.current() != MibSyncState::Disabled {
            return Ok(());
        }
        let db = &self.ctx.mib_database;
        if !db.contains(&self.ctx.device_id)? {
            db.add(&self.ctx.device_id, false)?;
        }

        self.generation += 1;
        for kind in [
            NotificationKind::Create,
            NotificationKind::Delete,
            NotificationKind::Set,
            NotificationKind::AttributeValueChange,
        ] {
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

        tracing::info!(device_id = self.device_id(), "mib synchronizer started");
        self.transition(MibSyncState::Starting);
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
        self.audit_failures = 0;
        self.resync_attempts = 0;
        self.audit_requested = false;
        self.set_state(MibSyncState::Disabled);
    }

    fn request_audit(&mut self) -> SyncResult<()> {
        match self.current() {
            MibSyncState::InSync => {
                self.timer_token += 1;
                self.transition(MibSyncState::Auditing);
                Ok(())
            }
            MibSyncState::Auditing | MibSyncState::Resynchronizing => Ok(()),
            other => Err(SyncError::invalid_state(other, "auditing")),
        }
    }

    fn request_reconcile(&mut self) -> SyncResult<()> {
        match self.current() {
            MibSyncState::OutOfSync => {
                self.transition(MibSyncState::Reconciling);
                Ok(())
            }
            other => Err(SyncError::invalid_state(other, "reconciling")),
        }
    }

    // ---- state handling ----

    fn set_state(&mut self, state: MibSyncState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(device_id = self.device_id(), from = %previous, to = %state, "mib sync state change");
            self.ctx.events.publish(OmciEvent::MibStateChange {
                device_id: self.device_id().to_string(),
                state,
            });
        }
    }

    fn transition(&mut self, state: MibSyncState) {
        self.set_state(state);
        match state {
            MibSyncState::Starting => self.on_starting(),
            MibSyncState::Examining => match self.templates.clone() {
                Some(store) => self.queue(MibTemplateTask::new(store), TaskOutcome::Template),
                None => self.transition(MibSyncState::Uploading),
            },
            MibSyncState::Uploading => self.queue(MibUploadTask, TaskOutcome::Upload),
            MibSyncState::InSync => {
                self.audit_failures = 0;
                self.resync_attempts = 0;
                if self.config.audits_enabled() {
                    self.schedule(self.config.audit_delay, TimerAction::Audit);
                }
            }
            MibSyncState::Auditing => self.queue(GetMdsTask, TaskOutcome::Mds),
            MibSyncState::Resynchronizing => self.queue(MibResyncTask, TaskOutcome::Resync),
            MibSyncState::Reconciling => {
                match self.ctx.mib_database.device_view(&self.ctx.device_id) {
                    Ok(view) => self.queue(
                        MibReconcileTask::new(view.instance_map()),
                        TaskOutcome::Reconcile,
                    ),
                    Err(e) => self.out_of_sync(format!("cannot read local mib: {e}")),
                }
            }
            MibSyncState::Disabled | MibSyncState::OutOfSync => {}
        }
    }

    fn on_starting(&mut self) {
        match self.ctx.mib_database.get_last_sync(&self.ctx.device_id) {
            Ok(Some(last_sync)) => {
                tracing::info!(device_id = self.device_id(), last_sync, "known device, auditing");
                self.transition(MibSyncState::Auditing);
            }
            Ok(None) if self.config.templates_enabled && self.templates.is_some() => {
                self.transition(MibSyncState::Examining);
            }
            Ok(None) => self.transition(MibSyncState::Uploading),
            Err(e) => self.retry_start(e.into()),
        }
    }

    fn retry_start(&mut self, error: SyncError) {
        tracing::warn!(
            device_id = self.device_id(),
            error = %error,
            retry_in = ?self.config.retry_delay,
            "mib synchronization failed, retrying"
        );
        self.set_state(MibSyncState::Starting);
        self.schedule(self.config.retry_delay, TimerAction::Restart);
    }

    fn audit_failed(&mut self, error: SyncError) {
        self.audit_failures += 1;
        if self.audit_failures > self.config.max_audit_failures {
            self.out_of_sync(format!(
                "{} consecutive audit failures, last: {error}",
                self.audit_failures
            ));
        } else {
            tracing::warn!(
                device_id = self.device_id(),
                error = %error,
                failures = self.audit_failures,
                "mib audit failed"
            );
            self.schedule(self.config.timeout_delay, TimerAction::Audit);
        }
    }

    fn out_of_sync(&mut self, reason: String) {
        tracing::warn!(device_id = self.device_id(), %reason, "mib out of sync");
        self.set_state(MibSyncState::OutOfSync);
        self.ctx.events.publish(OmciEvent::MibOutOfSync {
            device_id: self.device_id().to_string(),
            reason,
        });
    }

    fn on_timer(&mut self, action: TimerAction) {
        match (action, self.current()) {
            (TimerAction::Restart, MibSyncState::Starting) => self.on_starting(),
            (TimerAction::Audit, MibSyncState::InSync | MibSyncState::Resynchronizing) => {
                self.transition(MibSyncState::Auditing);
            }
            (TimerAction::Audit, MibSyncState::Auditing) => self.queue(GetMdsTask, TaskOutcome::Mds),
            (action, state) => {
                tracing::debug!(device_id = self.device_id(), ?action, %state, "timer ignored");
            }
        }
    }

    // ---- tasks ----

    fn queue<T, F>(&mut self, task: T, wrap: F)
    where
        T: OmciTask,
        F: FnOnce(SyncResult<T::Output>) -> TaskOutcome + Send + 'static,
    {
        let handle = self.ctx.runner.queue_task(task);
        let task_id = handle.id();
        self.current_task = Some(task_id);
        let generation = self.generation;
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let outcome = wrap(handle.await);
            let _ = mailbox.send(Message::TaskDone {
                generation,
                task_id,
                outcome,
            });
        });
    }

    fn schedule(&mut self, delay: Duration, action: TimerAction) {
        self.timer_token += 1;
        let generation = self.generation;
        let token = self.timer_token;
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = mailbox.send(Message::Timer {
                generation,
                token,
                action,
            });
        });
    }

    fn on_task_done(&mut self, task_id: TaskId, outcome: TaskOutcome) {
        if self.current_task != Some(task_id) {
            tracing::debug!(device_id = self.device_id(), %task_id, "stale task result ignored");
            return;
        }
        self.current_task = None;

        match outcome {
            TaskOutcome::Template(Ok(Some(template))) => match self.seed_from_template(&template) {
                Ok(()) => self.transition(MibSyncState::InSync),
                Err(e) => {
                    tracing::warn!(device_id = self.device_id(), error = %e, "template load failed, uploading");
                    self.transition(MibSyncState::Uploading);
                }
            },
            TaskOutcome::Template(Ok(None)) => self.transition(MibSyncState::Uploading),
            TaskOutcome::Template(Err(SyncError::Database(e))) => {
                tracing::warn!(device_id = self.device_id(), error = %e, "template store unreadable, uploading");
                self.transition(MibSyncState::Uploading);
            }
            TaskOutcome::Template(Err(e)) => self.retry_start(e),

            TaskOutcome::Upload(Ok(snapshot)) => match self.store_upload(&snapshot) {
                Ok(()) => self.transition(MibSyncState::InSync),
                Err(e) => self.retry_start(e.into()),
            },
            TaskOutcome::Upload(Err(e)) => self.retry_start(e),

            TaskOutcome::Mds(Ok(device_mds)) => self.on_audit_result(device_mds),
            TaskOutcome::Mds(Err(e)) => self.audit_failed(e),

            TaskOutcome::Resync(Ok(snapshot)) => match self.apply_resync(&snapshot) {
                Ok(0) => self.transition(MibSyncState::InSync),
                Ok(_) => {
                    self.resync_attempts += 1;
                    if self.resync_attempts > self.config.max_resync_attempts {
                        self.out_of_sync(format!(
                            "mib still differs after {} resyncs",
                            self.resync_attempts
                        ));
                    } else {
                        self.transition(MibSyncState::Auditing);
                    }
                }
                Err(e) => self.audit_failed(e),
            },
            TaskOutcome::Resync(Err(e)) => self.audit_failed(e),

            TaskOutcome::Reconcile(Ok(report)) => {
                if !report.is_complete() {
                    tracing::warn!(device_id = self.device_id(), failed = ?report.failed, "device rejected part of the reconcile");
                }
                self.ctx.events.publish(OmciEvent::MibReconciled {
                    device_id: self.device_id().to_string(),
                    created: report.created,
                    deleted: report.deleted,
                    updated: report.updated,
                });
                self.transition(MibSyncState::Starting);
            }
            TaskOutcome::Reconcile(Err(e)) => self.out_of_sync(format!("reconcile failed: {e}")),
        }
    }

    fn on_audit_result(&mut self, device_mds: u8) {
        let local_mds = match self.ctx.mib_database.get_mib_data_sync(&self.ctx.device_id) {
            Ok(value) => value.unwrap_or(0),
            Err(e) => return self.audit_failed(e.into()),
        };
        self.audit_failures = 0;
        self.ctx.events.publish(OmciEvent::MibAudit {
            device_id: self.device_id().to_string(),
            local_mds,
            device_mds,
        });

        if local_mds != device_mds {
            tracing::info!(device_id = self.device_id(), local_mds, device_mds, "mib data sync mismatch");
            self.transition(MibSyncState::Resynchronizing);
        } else if std::mem::take(&mut self.audit_requested) {
            self.queue(GetMdsTask, TaskOutcome::Mds);
        } else {
            self.transition(MibSyncState::InSync);
        }
    }

    // ---- database updates ----

    fn seed_from_template(&self, template: &MibTemplate) -> DatabaseResult<()> {
        let db = &self.ctx.mib_database;
        let device_id = self.device_id();
        db.on_mib_reset(device_id)?;
        db.load_from_template(device_id, template)?;
        db.save_mib_data_sync(device_id, 0)?;
        db.save_last_sync(device_id, now_millis())
    }

    fn store_upload(&self, snapshot: &MibSnapshot) -> DatabaseResult<()> {
        let db = &self.ctx.mib_database;
        let device_id = self.device_id();
        db.on_mib_reset(device_id)?;
        for ((class_id, instance_id), attributes) in snapshot {
            db.set(device_id, u32::from(*class_id), u32::from(*instance_id), attributes)?;
        }
        self.record_capabilities(snapshot)?;
        db.save_mib_data_sync(device_id, 0)?;
        db.save_last_sync(device_id, now_millis())?;
        tracing::info!(device_id, instances = snapshot.len(), "mib upload stored");
        Ok(())
    }

    /// Records the classes and message types the OMCI ME advertises.
    fn record_capabilities(&self, snapshot: &MibSnapshot) -> DatabaseResult<()> {
        let Some(omci) = snapshot.get(&(OMCI, 0)) else {
            return Ok(());
        };
        let codes = |name: &str| -> Vec<u64> {
            match omci.get(name) {
                Some(AttributeValue::List(items)) => {
                    items.iter().filter_map(AttributeValue::as_u64).collect()
                }
                _ => Vec::new(),
            }
        };

        let entities: BTreeMap<u16, String> = codes("me_type_table")
            .into_iter()
            .filter_map(|code| u16::try_from(code).ok())
            .map(|class_id| {
                let name = self
                    .ctx
                    .catalog
                    .name(class_id)
                    .map_or_else(|| format!("unknown-{class_id}"), str::to_string);
                (class_id, name)
            })
            .collect();
        let messages: BTreeSet<MessageType> = codes("message_type_table")
            .into_iter()
            .filter_map(|code| u8::try_from(code).ok())
            .filter_map(MessageType::from_code)
            .collect();

        let db = &self.ctx.mib_database;
        db.update_supported_managed_entities(self.device_id(), &entities)?;
        db.update_supported_message_types(self.device_id(), &messages)
    }

    /// Makes the local MIB match the device. Returns the number of
    /// instances that differed.
    fn apply_resync(&self, snapshot: &ResyncSnapshot) -> SyncResult<usize> {
        let db = &self.ctx.mib_database;
        let device_id = self.device_id();
        let local = db.device_view(device_id)?.instance_map();
        let diff = ThreeWayDiff::compute(&local, &snapshot.instances, |local, device| local == device);

        if !diff.is_empty() {
            tracing::info!(
                device_id,
                local_only = diff.local_only.len(),
                device_only = diff.remote_only.len(),
                differing = diff.differing.len(),
                "applying mib resync"
            );
        }
        for key in diff.remote_only.iter().chain(&diff.differing) {
            db.replace(
                device_id,
                u32::from(key.0),
                u32::from(key.1),
                &snapshot.instances[key],
            )?;
        }
        for (class_id, instance_id) in &diff.local_only {
            db.delete(device_id, u32::from(*class_id), u32::from(*instance_id))?;
        }
        db.save_mib_data_sync(device_id, u32::from(snapshot.mib_data_sync))?;
        Ok(diff.len())
    }

    // ---- notifications ----

    fn on_notification(&mut self, notification: &Notification) {
        let state = self.current();
        if !state.accepts_notifications() {
            tracing::debug!(device_id = self.device_id(), %state, kind = notification.kind().as_str(), "notification ignored");
            return;
        }
        match self.apply_notification(notification) {
            Ok(false) => {}
            Ok(true) if state == MibSyncState::InSync => {
                self.timer_token += 1;
                self.transition(MibSyncState::Auditing);
            }
            Ok(true) => self.audit_requested = true,
            Err(e) => {
                tracing::warn!(device_id = self.device_id(), error = %e, "failed to apply notification");
            }
        }
    }

    /// Applies a notification. Returns true if the device's data sync
    /// counter disagrees with the local prediction.
    fn apply_notification(&self, notification: &Notification) -> SyncResult<bool> {
        let db = &self.ctx.mib_database;
        let device_id = self.device_id();
        let reported = match notification {
            Notification::Created {
                class_id,
                instance_id,
                attributes,
                mib_data_sync,
            }
            | Notification::AttributesSet {
                class_id,
                instance_id,
                attributes,
                mib_data_sync,
            } => {
                db.set(device_id, u32::from(*class_id), u32::from(*instance_id), attributes)?;
                *mib_data_sync
            }
            Notification::Deleted {
                class_id,
                instance_id,
                mib_data_sync,
            } => {
                db.delete(device_id, u32::from(*class_id), u32::from(*instance_id))?;
                *mib_data_sync
            }
            Notification::AttributeValueChange {
                class_id,
                instance_id,
                attributes,
            } => {
                // The ONU does not count its own changes.
                db.set(device_id, u32::from(*class_id), u32::from(*instance_id), attributes)?;
                return Ok(false);
            }
            Notification::Alarm { .. } | Notification::GetAllAlarmsResponse { .. } => {
                return Ok(false)
            }
        };

        let predicted = next_sequence(db.get_mib_data_sync(device_id)?.unwrap_or(0));
        db.save_mib_data_sync(device_id, u32::from(predicted))?;
        match reported {
            Some(reported) if reported != predicted => {
                tracing::info!(device_id, predicted, reported, "mib data sync prediction missed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
