//! Looks up a stored MIB template matching the device.

use super::UPLOAD_PRIORITY;
use crate::error::{SyncError, SyncResult};
use crate::frame::OmciRequest;
use crate::task::{OmciTask, TaskContext};
use async_trait::async_trait;
use omci_codec::{AttributeMap, AttributeValue};
use omci_core::class_ids::{IP_HOST_CONFIG_DATA, ONT2_G, ONT_G, SOFTWARE_IMAGE};
use omci_core::{MibTemplate, TemplateKey, TemplateStore};
use std::sync::Arc;

/// Resets the device MIB, identifies the device, and loads the template
/// for its vendor, equipment id and active software version.
///
/// Returns `None` when no template matches; the caller then uploads.
pub struct MibTemplateTask {
    store: Arc<TemplateStore>,
}

impl MibTemplateTask {
    /// Creates a task reading from `store`.
    pub fn new(store: Arc<TemplateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OmciTask for MibTemplateTask {
    type Output = Option<MibTemplate>;

    fn name(&self) -> &'static str {
        "mib-template"
    }

    fn priority(&self) -> u8 {
        UPLOAD_PRIORITY
    }

    async fn run(self, ctx: TaskContext) -> SyncResult<Option<MibTemplate>> {
        ctx.execute(OmciRequest::MibReset).await?;

        let ont_g = get_or_empty(&ctx, ONT_G, 0, &["vendor_id", "serial_number"]).await?;
        let ont2_g = get_or_empty(&ctx, ONT2_G, 0, &["equipment_id"]).await?;
        let mut software_version = String::new();
        for image in 0..2 {
            let attributes = get_or_empty(&ctx, SOFTWARE_IMAGE, image, &["is_active", "version"]).await?;
            if attributes.get("is_active").and_then(AttributeValue::as_u64) == Some(1) {
                software_version = text(&attributes, "version");
                break;
            }
        }
        let ip_host = get_or_empty(&ctx, IP_HOST_CONFIG_DATA, 1, &["mac_address"]).await?;

        let key = TemplateKey::new(
            text(&ont_g, "vendor_id"),
            text(&ont2_g, "equipment_id"),
            software_version,
        );
        tracing::debug!(device_id = ctx.device_id(), ?key, "looking up mib template");
        let template = self.store.load(
            &key,
            &text(&ont_g, "serial_number"),
            &text(&ip_host, "mac_address"),
        )?;
        Ok(template)
    }
}

/// Reads attributes, treating a rejected get as an instance with no values.
async fn get_or_empty(
    ctx: &TaskContext,
    class_id: u16,
    instance_id: u16,
    attributes: &[&str],
) -> SyncResult<AttributeMap> {
    match ctx.get(class_id, instance_id, attributes).await {
        Ok(values) => Ok(values),
        Err(SyncError::CommandFailed { reason }) => {
            tracing::debug!(class_id, instance_id, %reason, "identity attribute unavailable");
            Ok(AttributeMap::new())
        }
        Err(e) => Err(e),
    }
}

/// Renders an identity attribute as text with trailing padding removed.
fn text(attributes: &AttributeMap, name: &str) -> String {
    match attributes.get(name) {
        Some(AttributeValue::Text(s)) => s.trim_matches(char::from(0)).trim().to_string(),
        Some(AttributeValue::Bytes(b)) => String::from_utf8_lossy(b)
            .trim_matches(char::from(0))
            .trim()
            .to_string(),
        Some(AttributeValue::Unsigned(n)) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_strips_padding() {
        let attributes = AttributeMap::from([
            ("vendor_id".to_string(), AttributeValue::Text("BRCM\0\0".into())),
            ("version".to_string(), AttributeValue::Bytes(b"V1.2\0\0\0".to_vec())),
        ]);
        assert_eq!(text(&attributes, "vendor_id"), "BRCM");
        assert_eq!(text(&attributes, "version"), "V1.2");
        assert_eq!(text(&attributes, "missing"), "");
    }
}
