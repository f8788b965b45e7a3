//! The protocol tasks the synchronizers queue.
//!
//! Priorities follow the runner's convention: lower numbers start first.

mod alarm_resync;
mod get_mds;
mod mib_reconcile;
mod mib_resync;
mod mib_template;
mod mib_upload;

pub use alarm_resync::AlarmResyncTask;
pub use get_mds::GetMdsTask;
pub use mib_reconcile::{MibReconcileTask, ReconcileReport};
pub use mib_resync::{MibResyncTask, ResyncSnapshot};
pub use mib_template::MibTemplateTask;
pub use mib_upload::MibUploadTask;

use crate::error::{SyncError, SyncResult};
use crate::frame::{OmciRequest, ResponsePayload};
use crate::task::TaskContext;
use omci_codec::{AlarmBitmap, AttributeMap, AttributeValue};
use omci_core::class_ids::ONT_DATA;
use std::collections::BTreeMap;

/// ONT Data attribute holding the MIB data sync counter.
pub const MIB_DATA_SYNC: &str = "mib_data_sync";

/// Instances uploaded from a device, keyed by (class id, instance id).
pub type MibSnapshot = BTreeMap<(u16, u16), AttributeMap>;

/// Alarm bitmaps uploaded from a device, keyed by (class id, instance id).
pub type AlarmSnapshot = BTreeMap<(u16, u16), AlarmBitmap>;

/// Priority of the template lookup and the full upload.
pub const UPLOAD_PRIORITY: u8 = 5;
/// Priority of audits, resyncs and reconciles.
pub const AUDIT_PRIORITY: u8 = 15;

/// Uploads the whole MIB. Does not reset it first.
pub(crate) async fn upload_mib(ctx: &TaskContext) -> SyncResult<MibSnapshot> {
    let commands = match ctx.execute(OmciRequest::MibUpload).await? {
        ResponsePayload::MibUpload { commands } => commands,
        other => return Err(unexpected("mib upload", &other)),
    };

    let mut snapshot = MibSnapshot::new();
    for sequence in 0..commands {
        match ctx.execute(OmciRequest::MibUploadNext { sequence }).await? {
            ResponsePayload::MibUploadNext {
                class_id,
                instance_id,
                attributes,
            } => {
                // Large instances arrive in several segments.
                snapshot
                    .entry((class_id, instance_id))
                    .or_default()
                    .extend(attributes);
            }
            other => return Err(unexpected("mib upload next", &other)),
        }
    }
    tracing::debug!(device_id = ctx.device_id(), commands, instances = snapshot.len(), "mib uploaded");
    Ok(snapshot)
}

/// Reads the device's MIB data sync counter.
pub(crate) async fn read_mib_data_sync(ctx: &TaskContext) -> SyncResult<u8> {
    let attributes = ctx.get(ONT_DATA, 0, &[MIB_DATA_SYNC]).await?;
    attributes
        .get(MIB_DATA_SYNC)
        .and_then(AttributeValue::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| SyncError::Protocol("ont data response without mib data sync".into()))
}

fn unexpected(request: &str, payload: &ResponsePayload) -> SyncError {
    SyncError::Protocol(format!("{request} answered with {payload:?}"))
}
