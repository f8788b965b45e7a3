//! Retrieves the device alarm table.

use super::{AlarmSnapshot, AUDIT_PRIORITY};
use crate::error::{SyncError, SyncResult};
use crate::frame::{OmciRequest, ResponsePayload};
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;

/// Runs get-all-alarms and collects every entry.
///
/// The device resets its alarm sequence number when it receives the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlarmResyncTask;

#[async_trait]
impl OmciTask for AlarmResyncTask {
    type Output = AlarmSnapshot;

    fn name(&self) -> &'static str {
        "alarm-resync"
    }

    fn priority(&self) -> u8 {
        AUDIT_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<AlarmSnapshot> {
        let commands = match ctx.execute(OmciRequest::GetAllAlarms).await? {
            ResponsePayload::GetAllAlarms { commands } => commands,
            other => {
                return Err(SyncError::Protocol(format!(
                    "get all alarms answered with {other:?}"
                )))
            }
        };

        let mut snapshot = AlarmSnapshot::new();
        for sequence in 0..commands {
            match ctx.execute(OmciRequest::GetAllAlarmsNext { sequence }).await? {
                ResponsePayload::GetAllAlarmsNext {
                    class_id,
                    instance_id,
                    bitmap,
                } => {
                    snapshot.insert((class_id, instance_id), bitmap);
                }
                other => {
                    return Err(SyncError::Protocol(format!(
                        "get all alarms next answered with {other:?}"
                    )))
                }
            }
        }
        tracing::debug!(device_id = ctx.device_id(), entries = snapshot.len(), "alarm table retrieved");
        Ok(snapshot)
    }
}
