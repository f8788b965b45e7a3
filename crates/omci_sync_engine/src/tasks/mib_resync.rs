//! Snapshot of the device MIB for drift repair.

use super::{read_mib_data_sync, upload_mib, MibSnapshot, AUDIT_PRIORITY};
use crate::error::{SyncError, SyncResult};
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;

/// Device state captured by a [`MibResyncTask`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncSnapshot {
    /// Device MIB data sync counter.
    pub mib_data_sync: u8,
    /// Every uploaded instance.
    pub instances: MibSnapshot,
}

/// Uploads the device MIB without resetting it.
///
/// The counter is read before and after the upload; if it moved, the
/// device changed underneath and the snapshot is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct MibResyncTask;

#[async_trait]
impl OmciTask for MibResyncTask {
    type Output = ResyncSnapshot;

    fn name(&self) -> &'static str {
        "mib-resync"
    }

    fn priority(&self) -> u8 {
        AUDIT_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<ResyncSnapshot> {
        let before = read_mib_data_sync(&ctx).await?;
        let instances = upload_mib(&ctx).await?;
        let after = read_mib_data_sync(&ctx).await?;
        if before != after {
            return Err(SyncError::Protocol(format!(
                "mib data sync moved from {before} to {after} during upload"
            )));
        }
        Ok(ResyncSnapshot {
            mib_data_sync: after,
            instances,
        })
    }
}
