//! Fixed-point quantization parameters
//!
//! The pipeline rescales 64-bit accumulators with a right shift followed by an
//! integer multiply, and applies a leaky activation to negative outputs the
//! same way. Both parameter pairs travel packed into a single integer field.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Post-scale: `(acc >> shift) * value`
///
/// Packed as `(value << 8) | shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostScale {
    pub value: i32,
    pub shift: u8,
}

impl PostScale {
    const VALUE_BITS: u32 = 24;

    /// Multiply by one, no shift
    pub const IDENTITY: Self = Self { value: 1, shift: 0 };

    pub fn new(value: i32, shift: u8) -> Self {
        Self { value, shift }
    }

    /// Pack into the instruction field, failing if `value` needs more than 24 bits
    pub fn pack(&self) -> Result<i32> {
        let limit = 1i32 << (Self::VALUE_BITS - 1);
        if self.value < -limit || self.value >= limit {
            return Err(Error::Configuration(format!(
                "post-scale value {} does not fit in {} signed bits",
                self.value,
                Self::VALUE_BITS
            )));
        }
        Ok((self.value << 8) | i32::from(self.shift))
    }

    pub fn unpack(packed: i32) -> Self {
        Self {
            value: packed >> 8,
            shift: (packed & 0xFF) as u8,
        }
    }

    /// Rescale an accumulator; shifts past 63 fill with the sign bit
    #[inline]
    pub fn apply(&self, acc: i64) -> i64 {
        (acc >> u32::from(self.shift).min(63)).wrapping_mul(i64::from(self.value))
    }
}

impl Default for PostScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Leaky activation: negative outputs become `(out >> shift) * scale`
///
/// Packed as `(scale << 6) | shift` into 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeakyRelu {
    pub scale: i16,
    pub shift: u8,
}

impl LeakyRelu {
    const SHIFT_BITS: u32 = 6;
    const SCALE_BITS: u32 = 16 - Self::SHIFT_BITS;

    /// Leaves negative values untouched
    pub const IDENTITY: Self = Self { scale: 1, shift: 0 };

    pub fn new(scale: i16, shift: u8) -> Self {
        Self { scale, shift }
    }

    pub fn pack(&self) -> Result<i16> {
        let limit = 1i16 << (Self::SCALE_BITS - 1);
        if self.scale < -limit || self.scale >= limit {
            return Err(Error::Configuration(format!(
                "leaky scale {} does not fit in {} signed bits",
                self.scale,
                Self::SCALE_BITS
            )));
        }
        if u32::from(self.shift) >= 1 << Self::SHIFT_BITS {
            return Err(Error::Configuration(format!(
                "leaky shift {} does not fit in {} bits",
                self.shift,
                Self::SHIFT_BITS
            )));
        }
        Ok((self.scale << Self::SHIFT_BITS) | i16::from(self.shift))
    }

    pub fn unpack(packed: i16) -> Self {
        Self {
            scale: packed >> Self::SHIFT_BITS,
            shift: (packed & 0x3F) as u8,
        }
    }

    #[inline]
    pub fn apply(&self, value: i64) -> i64 {
        if value < 0 {
            (value >> u32::from(self.shift).min(63)).wrapping_mul(i64::from(self.scale))
        } else {
            value
        }
    }
}

impl Default for LeakyRelu {
    fn default() -> Self {
        Self::IDENTITY
    }
}
