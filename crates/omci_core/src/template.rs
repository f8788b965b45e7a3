//! MIB templates: known-good MIB snapshots keyed by vendor, model and firmware.
//!
//! Templates are JSON documents shaped like a dumped device tree:
//!
//! ```json
//! { "256": { "0": { "attributes": { "vendor_id": "BRCM", "serial_number": "%SERIAL_NUMBER%" } } } }
//! ```
//!
//! Non-numeric top-level keys (header fields) are ignored. The tokens
//! `%SERIAL_NUMBER%` and `%MAC_ADDRESS%` are replaced with the values of the
//! device being seeded.

use crate::error::{DatabaseError, DatabaseResult};
use omci_codec::{AttributeMap, AttributeValue};
use omci_storage::{join_key, KvStore};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

const SERIAL_NUMBER_TOKEN: &str = "%SERIAL_NUMBER%";
const MAC_ADDRESS_TOKEN: &str = "%MAC_ADDRESS%";

/// Identifies the template matching a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// ONT-G vendor id.
    pub vendor_id: String,
    /// ONT2-G equipment id.
    pub equipment_id: String,
    /// Active software image version.
    pub software_version: String,
}

impl TemplateKey {
    /// Creates a template key.
    pub fn new(
        vendor_id: impl Into<String>,
        equipment_id: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            equipment_id: equipment_id.into(),
            software_version: software_version.into(),
        }
    }

    fn is_complete(&self) -> bool {
        [&self.vendor_id, &self.equipment_id, &self.software_version]
            .iter()
            .all(|part| !part.trim().is_empty() && !part.contains('/'))
    }
}

/// A MIB snapshot ready to be loaded into a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MibTemplate {
    /// Class id to instance id to attributes.
    pub classes: BTreeMap<u16, BTreeMap<u16, AttributeMap>>,
}

impl MibTemplate {
    /// Parses a template document.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::InvalidArgument`] if the JSON is malformed
    /// or an instance lacks an attribute object.
    pub fn from_json(json: &str) -> DatabaseResult<Self> {
        let doc: Json = serde_json::from_str(json)
            .map_err(|e| DatabaseError::invalid_argument(format!("template json: {e}")))?;
        let Json::Object(top) = doc else {
            return Err(DatabaseError::invalid_argument("template must be a JSON object"));
        };

        let mut template = Self::default();
        for (class_key, class_doc) in top {
            let Ok(class_id) = class_key.parse::<u16>() else {
                continue;
            };
            let Json::Object(instances) = class_doc else {
                return Err(DatabaseError::invalid_argument(format!(
                    "template class {class_id} is not an object"
                )));
            };
            let class = template.classes.entry(class_id).or_default();
            for (instance_key, instance_doc) in instances {
                let Ok(instance_id) = instance_key.parse::<u16>() else {
                    continue;
                };
                let attributes = match instance_doc.get("attributes") {
                    Some(Json::Object(attrs)) => attrs
                        .iter()
                        .map(|(name, value)| (name.clone(), json_to_value(value)))
                        .collect(),
                    _ => {
                        return Err(DatabaseError::invalid_argument(format!(
                            "template instance {class_id}/{instance_id} has no attributes"
                        )))
                    }
                };
                class.insert(instance_id, attributes);
            }
        }
        Ok(template)
    }

    /// Iterates over `((class_id, instance_id), attributes)`.
    pub fn instances(&self) -> impl Iterator<Item = ((u16, u16), &AttributeMap)> {
        self.classes.iter().flat_map(|(class_id, instances)| {
            instances
                .iter()
                .map(move |(instance_id, attrs)| ((*class_id, *instance_id), attrs))
        })
    }

    /// Returns the number of instances.
    pub fn len(&self) -> usize {
        self.classes.values().map(BTreeMap::len).sum()
    }

    /// Returns true if the template holds no instances.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn json_to_value(value: &Json) -> AttributeValue {
    match value {
        Json::Null => AttributeValue::Null,
        Json::Bool(b) => AttributeValue::Bool(*b),
        Json::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => AttributeValue::Unsigned(u),
            (None, Some(i)) => AttributeValue::Signed(i),
            _ => AttributeValue::Text(n.to_string()),
        },
        Json::String(s) => AttributeValue::Text(s.clone()),
        Json::Array(items) => AttributeValue::List(items.iter().map(json_to_value).collect()),
        Json::Object(_) => AttributeValue::Text(value.to_string()),
    }
}

/// Reads and writes templates in a key-value store.
///
/// Templates live at `{root}/templates/{vendor}/{equipment}/{software}`.
pub struct TemplateStore {
    store: Arc<dyn KvStore>,
    root: String,
}

impl TemplateStore {
    /// Creates a template store under `root`.
    pub fn new(store: Arc<dyn KvStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    fn key(&self, key: &TemplateKey) -> String {
        join_key(&[
            &self.root,
            "templates",
            &key.vendor_id,
            &key.equipment_id,
            &key.software_version,
        ])
    }

    /// Stores a template document.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is incomplete, the document does not
    /// parse, or the write fails.
    pub fn save(&self, key: &TemplateKey, json: &str) -> DatabaseResult<()> {
        if !key.is_complete() {
            return Err(DatabaseError::invalid_argument(format!(
                "incomplete template key {key:?}"
            )));
        }
        MibTemplate::from_json(json)?;
        self.store.set(&self.key(key), json.as_bytes())?;
        Ok(())
    }

    /// Loads the template for `key` with device tokens substituted.
    ///
    /// Returns `None` when no template is stored for the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read or parsed.
    pub fn load(
        &self,
        key: &TemplateKey,
        serial_number: &str,
        mac_address: &str,
    ) -> DatabaseResult<Option<MibTemplate>> {
        if !key.is_complete() {
            return Ok(None);
        }
        let path = self.key(key);
        let Some(bytes) = self.store.get(&path)? else {
            tracing::debug!(?key, "no matching mib template");
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| DatabaseError::corrupted(&path, e.to_string()))?;
        let text = text
            .replace(SERIAL_NUMBER_TOKEN, serial_number)
            .replace(MAC_ADDRESS_TOKEN, mac_address);
        MibTemplate::from_json(&text).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omci_storage::InMemoryKvStore;

    const DOC: &str = r#"{
        "device_id": "ignored",
        "256": { "0": { "attributes": {
            "vendor_id": "BRCM",
            "serial_number": "%SERIAL_NUMBER%",
            "battery_backup": false,
            "version": 3
        } } },
        "134": { "1": { "attributes": { "mac_address": "%MAC_ADDRESS%" } } }
    }"#;

    #[test]
    fn parse_ignores_header_keys() {
        let template = MibTemplate::from_json(DOC).unwrap();
        assert_eq!(template.len(), 2);
        let ont_g = &template.classes[&256][&0];
        assert_eq!(ont_g["version"], AttributeValue::Unsigned(3));
        assert_eq!(ont_g["battery_backup"], AttributeValue::Bool(false));
    }

    #[test]
    fn load_substitutes_tokens() {
        let store = TemplateStore::new(Arc::new(InMemoryKvStore::new()), "omci_mibs");
        let key = TemplateKey::new("BRCM", "BVM4K00BRA", "v1.0");
        store.save(&key, DOC).unwrap();

        let template = store
            .load(&key, "BRCM12345678", "00:11:22:33:44:55")
            .unwrap()
            .unwrap();
        assert_eq!(
            template.classes[&256][&0]["serial_number"],
            AttributeValue::from("BRCM12345678")
        );
        assert_eq!(
            template.classes[&134][&1]["mac_address"],
            AttributeValue::from("00:11:22:33:44:55")
        );
    }

    #[test]
    fn missing_template_is_none() {
        let store = TemplateStore::new(Arc::new(InMemoryKvStore::new()), "omci_mibs");
        let key = TemplateKey::new("BRCM", "X", "v2");
        assert!(store.load(&key, "s", "m").unwrap().is_none());
        assert!(store.load(&TemplateKey::new("", "X", "v2"), "s", "m").unwrap().is_none());
    }

    #[test]
    fn malformed_template_rejected() {
        assert!(MibTemplate::from_json("[1,2]").is_err());
        assert!(MibTemplate::from_json(r#"{"6": {"0": {}}}"#).is_err());
    }
}
