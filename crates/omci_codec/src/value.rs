//! Native attribute values.

use crate::bitmap::AlarmBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name to value map for one managed-entity instance.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// The native value of a managed-entity attribute.
///
/// OMCI attributes are unsigned integers of 1..8 bytes, fixed-size octet
/// strings, printable strings, tables, or (for alarm records) a bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    /// Absent or null attribute.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Unsigned integer attribute (most OMCI attributes).
    Unsigned(u64),
    /// Signed integer attribute.
    Signed(i64),
    /// Printable string.
    Text(String),
    /// Raw octet string.
    Bytes(Vec<u8>),
    /// Alarm bitmap.
    Bitmap(AlarmBitmap),
    /// Table attribute rows.
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Returns the value as an unsigned integer if it holds a non-negative integer.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttributeValue::Unsigned(v) => Some(*v),
            AttributeValue::Signed(v) => u64::try_from(*v).ok(),
            AttributeValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    /// Returns the string contents of a text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bitmap of a bitmap value.
    #[must_use]
    pub fn as_bitmap(&self) -> Option<&AlarmBitmap> {
        match self {
            AttributeValue::Bitmap(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Unsigned(_) => "unsigned",
            AttributeValue::Signed(_) => "signed",
            AttributeValue::Text(_) => "text",
            AttributeValue::Bytes(_) => "bytes",
            AttributeValue::Bitmap(_) => "bitmap",
            AttributeValue::List(_) => "list",
        }
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        AttributeValue::Unsigned(v)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Unsigned(u64::from(v))
    }
}

impl From<u16> for AttributeValue {
    fn from(v: u16) -> Self {
        AttributeValue::Unsigned(u64::from(v))
    }
}

impl From<u8> for AttributeValue {
    fn from(v: u8) -> Self {
        AttributeValue::Unsigned(u64::from(v))
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Signed(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(v: Vec<u8>) -> Self {
        AttributeValue::Bytes(v)
    }
}

impl From<AlarmBitmap> for AttributeValue {
    fn from(v: AlarmBitmap) -> Self {
        AttributeValue::Bitmap(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_accessors() {
        assert_eq!(AttributeValue::from(7u8).as_u64(), Some(7));
        assert_eq!(AttributeValue::Signed(-1).as_u64(), None);
        assert_eq!(AttributeValue::from(true).as_u64(), Some(1));
        assert_eq!(AttributeValue::from("x").as_u64(), None);
    }

    #[test]
    fn text_accessor() {
        assert_eq!(AttributeValue::from("BRCM").as_str(), Some("BRCM"));
        assert_eq!(AttributeValue::Null.as_str(), None);
    }

    #[test]
    fn type_names() {
        assert_eq!(AttributeValue::Null.type_name(), "null");
        assert_eq!(AttributeValue::List(vec![]).type_name(), "list");
    }
}
