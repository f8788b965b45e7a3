//! Pushes the intended MIB to a device that drifted away from it.

use super::{upload_mib, MibSnapshot, AUDIT_PRIORITY};
use crate::diff::{attributes_match, changed_attributes, ThreeWayDiff};
use crate::error::{SyncError, SyncResult};
use crate::frame::OmciRequest;
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;

/// What a reconcile changed on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Instances created on the device.
    pub created: usize,
    /// Instances deleted from the device.
    pub deleted: usize,
    /// Instances whose attributes were set.
    pub updated: usize,
    /// Instances the device refused to change.
    pub failed: Vec<(u16, u16)>,
}

impl ReconcileReport {
    /// Returns true if the device accepted every change.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uploads the device MIB and makes it match `intended`.
///
/// A rejected create, set or delete is recorded in the report and the
/// reconcile continues; a timeout or transport error aborts it.
pub struct MibReconcileTask {
    intended: MibSnapshot,
}

impl MibReconcileTask {
    /// Creates a task targeting `intended`.
    pub fn new(intended: MibSnapshot) -> Self {
        Self { intended }
    }
}

#[async_trait]
impl OmciTask for MibReconcileTask {
    type Output = ReconcileReport;

    fn name(&self) -> &'static str {
        "mib-reconcile"
    }

    fn priority(&self) -> u8 {
        AUDIT_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<ReconcileReport> {
        let device = upload_mib(&ctx).await?;
        let diff = ThreeWayDiff::compute(&self.intended, &device, |intended, actual| {
            attributes_match(intended, actual)
        });

        let mut report = ReconcileReport::default();
        for key in &diff.local_only {
            let (class_id, instance_id) = *key;
            let request = OmciRequest::create(class_id, instance_id, self.intended[key].clone());
            if apply(&ctx, request, *key, &mut report).await? {
                report.created += 1;
            }
        }
        for key in &diff.differing {
            let (class_id, instance_id) = *key;
            let changes = changed_attributes(&self.intended[key], &device[key]);
            if apply(&ctx, OmciRequest::set(class_id, instance_id, changes), *key, &mut report).await? {
                report.updated += 1;
            }
        }
        for key in &diff.remote_only {
            let (class_id, instance_id) = *key;
            if apply(&ctx, OmciRequest::delete(class_id, instance_id), *key, &mut report).await? {
                report.deleted += 1;
            }
        }

        tracing::info!(
            device_id = ctx.device_id(),
            created = report.created,
            deleted = report.deleted,
            updated = report.updated,
            failed = report.failed.len(),
            "mib reconciled"
        );
        Ok(report)
    }
}

async fn apply(
    ctx: &TaskContext,
    request: OmciRequest,
    key: (u16, u16),
    report: &mut ReconcileReport,
) -> SyncResult<bool> {
    match ctx.execute(request).await {
        Ok(_) => Ok(true),
        Err(SyncError::CommandFailed { reason }) => {
            tracing::warn!(device_id = ctx.device_id(), class_id = key.0, instance_id = key.1, %reason, "reconcile change rejected");
            report.failed.push(key);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
