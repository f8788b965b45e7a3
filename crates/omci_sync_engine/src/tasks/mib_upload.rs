//! Full MIB upload after a MIB reset.

use super::{upload_mib, MibSnapshot, UPLOAD_PRIORITY};
use crate::error::SyncResult;
use crate::frame::OmciRequest;
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;

/// Resets the device MIB, then uploads every instance.
///
/// After the reset the device's data sync counter is zero, so the caller
/// stores the snapshot with a counter of zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct MibUploadTask;

#[async_trait]
impl OmciTask for MibUploadTask {
    type Output = MibSnapshot;

    fn name(&self) -> &'static str {
        "mib-upload"
    }

    fn priority(&self) -> u8 {
        UPLOAD_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<MibSnapshot> {
        ctx.execute(OmciRequest::MibReset).await?;
        upload_mib(&ctx).await
    }
}
