//! Attribute codecs: native value <-> persisted string.

use crate::bitmap::AlarmBitmap;
use crate::error::{CodecError, CodecResult};
use crate::value::AttributeValue;

/// Attribute name holding an instance's alarm bitmap in the alarm database.
pub const ALARM_BITMAP_ATTRIBUTE: &str = "alarm_bit_map";

/// Converts attribute values to and from their persisted string form.
///
/// Implementations must be deterministic: the entity database detects
/// changes by comparing encoded strings.
pub trait AttributeCodec: Send + Sync {
    /// Encodes `value` of attribute `attribute` of class `class_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value has the wrong type for the attribute.
    fn encode(&self, class_id: u16, attribute: &str, value: &AttributeValue) -> CodecResult<String>;

    /// Decodes a string previously produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns an error if `encoded` is malformed.
    fn decode(&self, class_id: u16, attribute: &str, encoded: &str) -> CodecResult<AttributeValue>;
}

/// Schema-free codec used for the MIB database.
///
/// Unsigned integers, the bulk of OMCI attributes, are stored as plain
/// decimal strings. Everything else is stored as tagged JSON so it decodes
/// back to the same variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAttributeCodec;

impl AttributeCodec for DefaultAttributeCodec {
    fn encode(&self, _class_id: u16, _attribute: &str, value: &AttributeValue) -> CodecResult<String> {
        match value {
            AttributeValue::Unsigned(v) => Ok(v.to_string()),
            other => {
                serde_json::to_string(other).map_err(|e| CodecError::encoding_failed(e.to_string()))
            }
        }
    }

    fn decode(&self, _class_id: u16, _attribute: &str, encoded: &str) -> CodecResult<AttributeValue> {
        if !encoded.is_empty() && encoded.bytes().all(|b| b.is_ascii_digit()) {
            return encoded
                .parse::<u64>()
                .map(AttributeValue::Unsigned)
                .map_err(|e| CodecError::decoding_failed(e.to_string()));
        }
        serde_json::from_str(encoded).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// Codec used for the alarm database.
///
/// The alarm bitmap attribute is stored as a decimal integer string; any
/// other attribute falls through to [`DefaultAttributeCodec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmAttributeCodec {
    fallback: DefaultAttributeCodec,
}

impl AttributeCodec for AlarmAttributeCodec {
    fn encode(&self, class_id: u16, attribute: &str, value: &AttributeValue) -> CodecResult<String> {
        if attribute != ALARM_BITMAP_ATTRIBUTE {
            return self.fallback.encode(class_id, attribute, value);
        }
        match value {
            AttributeValue::Bitmap(bitmap) => Ok(bitmap.to_decimal_string()),
            AttributeValue::Unsigned(0) | AttributeValue::Null => {
                Ok(AlarmBitmap::CLEAR.to_decimal_string())
            }
            _ => Err(CodecError::wrong_type(attribute, "bitmap")),
        }
    }

    fn decode(&self, class_id: u16, attribute: &str, encoded: &str) -> CodecResult<AttributeValue> {
        if attribute == ALARM_BITMAP_ATTRIBUTE {
            AlarmBitmap::from_decimal_str(encoded).map(AttributeValue::Bitmap)
        } else {
            self.fallback.decode(class_id, attribute, encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_is_plain_decimal() {
        let codec = DefaultAttributeCodec;
        assert_eq!(codec.encode(256, "admin_state", &AttributeValue::Unsigned(1)).unwrap(), "1");
        assert_eq!(
            codec.decode(256, "admin_state", "1").unwrap(),
            AttributeValue::Unsigned(1)
        );
    }

    #[test]
    fn text_of_digits_stays_text() {
        let codec = DefaultAttributeCodec;
        let value = AttributeValue::from("12345");
        let encoded = codec.encode(256, "serial_number", &value).unwrap();
        assert_ne!(encoded, "12345");
        assert_eq!(codec.decode(256, "serial_number", &encoded).unwrap(), value);
    }

    #[test]
    fn tagged_values_roundtrip() {
        let codec = DefaultAttributeCodec;
        for value in [
            AttributeValue::Null,
            AttributeValue::Signed(-3),
            AttributeValue::Bytes(vec![0, 1, 2]),
            AttributeValue::List(vec![AttributeValue::Unsigned(1), AttributeValue::from("a")]),
        ] {
            let encoded = codec.encode(6, "x", &value).unwrap();
            assert_eq!(codec.decode(6, "x", &encoded).unwrap(), value);
        }
    }

    #[test]
    fn malformed_string_rejected() {
        assert!(DefaultAttributeCodec.decode(6, "x", "{not json").is_err());
    }

    #[test]
    fn alarm_bitmap_is_decimal() {
        let codec = AlarmAttributeCodec::default();
        let bitmap = AlarmBitmap::with_alarms(&[223]).unwrap();
        let encoded = codec
            .encode(11, ALARM_BITMAP_ATTRIBUTE, &AttributeValue::Bitmap(bitmap))
            .unwrap();
        assert_eq!(encoded, "1");
        assert_eq!(
            codec.decode(11, ALARM_BITMAP_ATTRIBUTE, "1").unwrap(),
            AttributeValue::Bitmap(bitmap)
        );
    }

    #[test]
    fn alarm_bitmap_rejects_text() {
        let codec = AlarmAttributeCodec::default();
        assert!(matches!(
            codec.encode(11, ALARM_BITMAP_ATTRIBUTE, &AttributeValue::from("x")),
            Err(CodecError::WrongType { .. })
        ));
    }

    #[test]
    fn alarm_codec_falls_back_for_other_attributes() {
        let codec = AlarmAttributeCodec::default();
        assert_eq!(codec.encode(11, "other", &AttributeValue::Unsigned(9)).unwrap(), "9");
    }
}
