//! Transport abstraction for OMCI request/response exchanges.

use crate::error::{SyncError, SyncResult};
use crate::frame::{OmciRequest, OmciResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sends OMCI requests to a device and waits for the response.
///
/// The OMCI channel is half duplex: callers go through a
/// [`TaskRunner`](crate::TaskRunner) so only one exclusive exchange is
/// in flight per device.
#[async_trait]
pub trait OmciTransport: Send + Sync {
    /// Sends `request` to `device_id` and returns its response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if no response arrives, or
    /// [`SyncError::Transport`] if the channel fails.
    async fn send(&self, device_id: &str, request: OmciRequest) -> SyncResult<OmciResponse>;
}

/// A scripted reply of a [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this response.
    Respond(OmciResponse),
    /// Fail with a timeout.
    Timeout,
    /// Fail with a retryable transport error.
    Fail(String),
}

/// A transport that replays scripted replies, for testing.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    replies: Mutex<VecDeque<MockReply>>,
    sent: Mutex<Vec<(String, OmciRequest)>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            replies: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Queues a response.
    pub fn push_response(&self, response: OmciResponse) {
        self.push_reply(MockReply::Respond(response));
    }

    /// Returns every request sent so far.
    pub fn sent(&self) -> Vec<(String, OmciRequest)> {
        self.sent.lock().clone()
    }

    /// Returns the number of replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OmciTransport for MockTransport {
    async fn send(&self, device_id: &str, request: OmciRequest) -> SyncResult<OmciResponse> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::transport_fatal("not connected"));
        }
        self.sent.lock().push((device_id.to_string(), request));
        match self.replies.lock().pop_front() {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Timeout) => Err(SyncError::Timeout),
            Some(MockReply::Fail(message)) => Err(SyncError::transport_retryable(message)),
            None => Err(SyncError::Protocol("no scripted response".into())),
        }
    }
}

/// Holds every request until released, then answers from a
/// [`MockTransport`].
#[cfg(test)]
pub(crate) struct GatedTransport {
    pub(crate) inner: MockTransport,
    waiting: std::sync::atomic::AtomicUsize,
    release: tokio::sync::Notify,
}

#[cfg(test)]
impl GatedTransport {
    pub(crate) fn new() -> Self {
        Self {
            inner: MockTransport::new(),
            waiting: std::sync::atomic::AtomicUsize::new(0),
            release: tokio::sync::Notify::new(),
        }
    }

    /// Requests currently held.
    pub(crate) fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub(crate) fn release_all(&self) {
        self.release.notify_waiters();
    }
}

#[cfg(test)]
#[async_trait]
impl OmciTransport for GatedTransport {
    async fn send(&self, device_id: &str, request: OmciRequest) -> SyncResult<OmciResponse> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        self.inner.send(device_id, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ResultCode;

    #[tokio::test]
    async fn replays_in_order() {
        let transport = MockTransport::new();
        transport.push_response(OmciResponse::ok());
        transport.push_reply(MockReply::Timeout);
        transport.push_response(OmciResponse::failed(ResultCode::DeviceBusy));

        assert!(transport.send("onu-1", OmciRequest::MibReset).await.unwrap().is_success());
        assert!(matches!(
            transport.send("onu-1", OmciRequest::MibUpload).await,
            Err(SyncError::Timeout)
        ));
        let busy = transport.send("onu-1", OmciRequest::MibUpload).await.unwrap();
        assert_eq!(busy.result, ResultCode::DeviceBusy);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn disconnected_is_fatal() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        let err = transport.send("onu-1", OmciRequest::MibReset).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(transport.sent().is_empty());
    }
}
