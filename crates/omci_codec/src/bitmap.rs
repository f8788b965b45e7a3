//! Fixed-width OMCI alarm bitmap.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Number of alarm bits in an OMCI alarm bitmap.
pub const ALARM_BITMAP_BITS: usize = 224;

/// Size of an alarm bitmap in bytes.
pub const ALARM_BITMAP_BYTES: usize = ALARM_BITMAP_BITS / 8;

/// A 224-bit alarm bitmap.
///
/// Alarm number `i` is bit `i` counted from the most significant end, so
/// alarm 0 is the top bit of the first byte. Persisted as the decimal
/// integer the bits form when read big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlarmBitmap([u8; ALARM_BITMAP_BYTES]);

impl AlarmBitmap {
    /// The bitmap with no alarm raised.
    pub const CLEAR: Self = Self([0; ALARM_BITMAP_BYTES]);

    /// Creates a bitmap from its big-endian bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ALARM_BITMAP_BYTES]) -> Self {
        Self(bytes)
    }

    /// Creates a bitmap with the given alarm numbers raised.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::AlarmOutOfRange`] for numbers >= 224.
    pub fn with_alarms(alarms: &[usize]) -> CodecResult<Self> {
        let mut bitmap = Self::CLEAR;
        for &alarm in alarms {
            bitmap.set(alarm, true)?;
        }
        Ok(bitmap)
    }

    /// Returns the big-endian bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ALARM_BITMAP_BYTES] {
        &self.0
    }

    /// Returns true if alarm `alarm` is raised. Out-of-range numbers are never raised.
    #[must_use]
    pub fn is_set(&self, alarm: usize) -> bool {
        alarm < ALARM_BITMAP_BITS && self.0[alarm / 8] & (0x80 >> (alarm % 8)) != 0
    }

    /// Raises or clears alarm `alarm`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::AlarmOutOfRange`] for numbers >= 224.
    pub fn set(&mut self, alarm: usize, raised: bool) -> CodecResult<()> {
        if alarm >= ALARM_BITMAP_BITS {
            return Err(CodecError::AlarmOutOfRange(alarm));
        }
        let mask = 0x80 >> (alarm % 8);
        if raised {
            self.0[alarm / 8] |= mask;
        } else {
            self.0[alarm / 8] &= !mask;
        }
        Ok(())
    }

    /// Returns true if no alarm is raised.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Returns the raised alarm numbers in ascending order.
    #[must_use]
    pub fn raised(&self) -> BTreeSet<usize> {
        (0..ALARM_BITMAP_BITS).filter(|&i| self.is_set(i)).collect()
    }

    /// Alarms raised in `self` that were not raised in `previous`.
    #[must_use]
    pub fn newly_raised(&self, previous: &Self) -> BTreeSet<usize> {
        self.masked(previous, |new, old| new & !old)
    }

    /// Alarms raised in `previous` that are no longer raised in `self`.
    #[must_use]
    pub fn newly_cleared(&self, previous: &Self) -> BTreeSet<usize> {
        self.masked(previous, |new, old| old & !new)
    }

    fn masked(&self, previous: &Self, op: impl Fn(u8, u8) -> u8) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for (index, (new, old)) in self.0.iter().zip(previous.0.iter()).enumerate() {
            let bits = op(*new, *old);
            for bit in 0..8 {
                if bits & (0x80 >> bit) != 0 {
                    out.insert(index * 8 + bit);
                }
            }
        }
        out
    }

    /// Renders the bitmap as a decimal integer.
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        let mut value = self.0;
        let mut digits = Vec::new();
        loop {
            let mut remainder = 0u32;
            let mut all_zero = true;
            for byte in &mut value {
                let acc = (remainder << 8) | u32::from(*byte);
                *byte = (acc / 10) as u8;
                remainder = acc % 10;
                all_zero &= *byte == 0;
            }
            digits.push(char::from(b'0' + remainder as u8));
            if all_zero {
                break;
            }
        }
        digits.iter().rev().collect()
    }

    /// Parses a decimal integer produced by [`to_decimal_string`](Self::to_decimal_string).
    ///
    /// # Errors
    ///
    /// Returns a decoding error for non-digit input and
    /// [`CodecError::BitmapOverflow`] when the value needs more than 224 bits.
    pub fn from_decimal_str(s: &str) -> CodecResult<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CodecError::decoding_failed("empty bitmap string"));
        }
        let mut value = [0u8; ALARM_BITMAP_BYTES];
        for c in s.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| CodecError::decoding_failed(format!("invalid digit '{c}'")))?;
            let mut carry = digit;
            for byte in value.iter_mut().rev() {
                let acc = u32::from(*byte) * 10 + carry;
                *byte = (acc & 0xff) as u8;
                carry = acc >> 8;
            }
            if carry != 0 {
                return Err(CodecError::BitmapOverflow);
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Debug for AlarmBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AlarmBitmap").field(&self.raised()).finish()
    }
}

impl fmt::Display for AlarmBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

impl FromStr for AlarmBitmap {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_decimal_str(s)
    }
}

impl Serialize for AlarmBitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for AlarmBitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_decimal_str(&s).map_err(serde::de::Error::custom)
    }
}
