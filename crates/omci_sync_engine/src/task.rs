//! Protocol tasks and the context they run in.

use crate::error::{SyncError, SyncResult};
use crate::frame::{OmciRequest, OmciResponse, ResponsePayload};
use crate::transport::OmciTransport;
use async_trait::async_trait;
use omci_codec::AttributeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Priority of tasks that do not choose one. Lower numbers start first.
pub const DEFAULT_PRIORITY: u8 = 128;

/// Identifies a queued or running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of OMCI work run by a [`TaskRunner`](crate::TaskRunner).
///
/// Tasks only talk to the device; they return what they learned and the
/// synchronizer that queued them decides what to store.
#[async_trait]
pub trait OmciTask: Send + 'static {
    /// What the task produces.
    type Output: Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Scheduling priority; lower numbers start first.
    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    /// Whether the task needs the OMCI channel to itself.
    fn exclusive(&self) -> bool {
        true
    }

    /// Overall time limit, if any.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Runs the task.
    async fn run(self, ctx: TaskContext) -> SyncResult<Self::Output>;
}

/// Handle on the device a task is running against.
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    device_id: Arc<str>,
    transport: Arc<dyn OmciTransport>,
    frame_timeout: Duration,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: TaskId,
        device_id: Arc<str>,
        transport: Arc<dyn OmciTransport>,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            task_id,
            device_id,
            transport,
            frame_timeout,
        }
    }

    /// Id of the running task.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Device the task talks to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Sends one request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if the frame timeout expires, or the
    /// transport's error.
    pub async fn send(&self, request: OmciRequest) -> SyncResult<OmciResponse> {
        tracing::trace!(device_id = %self.device_id, task = %self.task_id, ?request, "tx");
        match tokio::time::timeout(self.frame_timeout, self.transport.send(&self.device_id, request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Sends a request that must succeed and returns its payload.
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send), plus [`SyncError::CommandFailed`] when
    /// the device rejects the request.
    pub async fn execute(&self, request: OmciRequest) -> SyncResult<ResponsePayload> {
        self.send(request).await?.into_payload()
    }

    /// Reads attributes of one instance.
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute), plus [`SyncError::Protocol`] if
    /// the response carries no attributes.
    pub async fn get(
        &self,
        class_id: u16,
        instance_id: u16,
        attributes: &[&str],
    ) -> SyncResult<AttributeMap> {
        match self
            .execute(OmciRequest::get(class_id, instance_id, attributes))
            .await?
        {
            ResponsePayload::Attributes(values) => Ok(values),
            other => Err(SyncError::Protocol(format!(
                "get {class_id}/{instance_id} answered with {other:?}"
            ))),
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("device_id", &self.device_id)
            .field("frame_timeout", &self.frame_timeout)
            .finish()
    }
}
