//! CBOR blob helpers for persisted records.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes `value` to CBOR bytes.
///
/// # Errors
///
/// Returns an encoding error if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Deserializes a value from CBOR bytes.
///
/// # Errors
///
/// Returns a decoding error if the bytes are not a valid encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AttributeMap, AttributeValue};

    #[test]
    fn attribute_map_roundtrip() {
        let mut attrs = AttributeMap::new();
        attrs.insert("admin_state".into(), AttributeValue::Unsigned(1));
        attrs.insert("vendor_id".into(), AttributeValue::from("BRCM"));

        let bytes = to_cbor(&attrs).unwrap();
        let decoded: AttributeMap = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = from_cbor::<AttributeMap>(&[0xff, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::DecodingFailed { .. }));
    }
}
