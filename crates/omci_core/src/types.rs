//! Identifier validation and timestamps.

use crate::error::{DatabaseError, DatabaseResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Returns the current time as a [`Timestamp`].
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Checks that `class_id` fits in 16 bits.
///
/// # Errors
///
/// Returns [`DatabaseError::InvalidArgument`] for values above 65535.
pub fn validate_class_id(class_id: u32) -> DatabaseResult<u16> {
    u16::try_from(class_id)
        .map_err(|_| DatabaseError::invalid_argument(format!("class id {class_id} out of range")))
}

/// Checks that `instance_id` fits in 16 bits.
///
/// # Errors
///
/// Returns [`DatabaseError::InvalidArgument`] for values above 65535.
pub fn validate_instance_id(instance_id: u32) -> DatabaseResult<u16> {
    u16::try_from(instance_id).map_err(|_| {
        DatabaseError::invalid_argument(format!("instance id {instance_id} out of range"))
    })
}

/// Advances an 8-bit MIB data sync or alarm sequence counter.
///
/// Zero is only ever produced by a reset, so the counter wraps from 255 to 1.
#[must_use]
pub const fn next_sequence(value: u8) -> u8 {
    if value == u8::MAX {
        1
    } else {
        value + 1
    }
}
