//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes or a persisted string.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// A value does not have the type the attribute requires.
    #[error("wrong value type for attribute {attribute}: expected {expected}")]
    WrongType {
        /// Attribute name.
        attribute: String,
        /// Expected type name.
        expected: &'static str,
    },

    /// Alarm number outside the bitmap.
    #[error("alarm number {0} out of range (0..224)")]
    AlarmOutOfRange(usize),

    /// A decimal bitmap string does not fit in 224 bits.
    #[error("bitmap value exceeds 224 bits")]
    BitmapOverflow,
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a wrong type error.
    pub fn wrong_type(attribute: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            attribute: attribute.into(),
            expected,
        }
    }
}
