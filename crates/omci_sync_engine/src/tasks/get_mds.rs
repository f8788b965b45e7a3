//! Reads the device's MIB data sync counter.

use super::{read_mib_data_sync, AUDIT_PRIORITY};
use crate::error::SyncResult;
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;

/// Fetches the MIB data sync counter from ONT Data.
#[derive(Debug, Default, Clone, Copy)]
pub struct GetMdsTask;

#[async_trait]
impl OmciTask for GetMdsTask {
    type Output = u8;

    fn name(&self) -> &'static str {
        "get-mds"
    }

    fn priority(&self) -> u8 {
        AUDIT_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<u8> {
        read_mib_data_sync(&ctx).await
    }
}
