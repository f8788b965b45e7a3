//! # OMCI Codec
//!
//! Value types and encodings shared by the OMCI entity database and the
//! synchronizers.
//!
//! This crate provides:
//! - [`AttributeValue`], the native form of a managed-entity attribute
//! - [`AlarmBitmap`], the 224-bit alarm vector carried by alarm notifications
//! - [`AttributeCodec`], the pluggable native <-> persisted-string conversion
//! - CBOR blob helpers used to persist device and class records
//!
//! ## Attribute strings
//!
//! The entity database never interprets attributes. It stores the string a
//! codec produces and detects changes by comparing those strings, so a
//! codec must be deterministic: equal values always encode to equal strings.
//!
//! ## Usage
//!
//! ```
//! use omci_codec::{AlarmAttributeCodec, AlarmBitmap, AttributeCodec, AttributeValue, ALARM_BITMAP_ATTRIBUTE};
//!
//! let codec = AlarmAttributeCodec::default();
//! let bitmap = AlarmBitmap::with_alarms(&[0]).unwrap();
//! let encoded = codec
//!     .encode(11, ALARM_BITMAP_ATTRIBUTE, &AttributeValue::Bitmap(bitmap))
//!     .unwrap();
//! assert_eq!(encoded, "13479973333575319897333507543509815336818572211270286240551805124608");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bitmap;
mod blob;
mod codec;
mod error;
mod value;

pub use bitmap::{AlarmBitmap, ALARM_BITMAP_BITS, ALARM_BITMAP_BYTES};
pub use blob::{from_cbor, to_cbor};
pub use codec::{
    AlarmAttributeCodec, AttributeCodec, DefaultAttributeCodec, ALARM_BITMAP_ATTRIBUTE,
};
pub use error::{CodecError, CodecResult};
pub use value::{AttributeMap, AttributeValue};
