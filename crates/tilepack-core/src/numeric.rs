//! Element types understood by the hardware pipeline
//!
//! Two layers of constraints:
//!
//! - [`Element`]: anything that can be stored in a device buffer byte-for-byte
//!   (plain old data) and converted from the `f64` values carried by triplets.
//!   Conversions are checked: integers must be represented exactly, floats
//!   must stay finite.
//! - [`Quantized`]: integer element types with the wrap-around semantics the
//!   fixed-point reference arithmetic relies on.

use crate::{Error, Result};
use bytemuck::Pod;
use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// A value that can live in a device buffer
pub trait Element:
    Pod + Copy + Debug + Default + PartialEq + PartialOrd + Zero + NumCast + Send + Sync + 'static
{
    /// Short type name used in log output
    const NAME: &'static str;

    /// Widen to `f64` for comparisons
    fn as_f64(self) -> f64;

    /// Narrow from `f64`, failing instead of saturating, rounding or
    /// overflowing to infinity
    fn try_from_f64(value: f64) -> Result<Self>;
}

fn not_representable(value: f64, name: &str) -> Error {
    Error::Data(format!("value {value} is not representable as {name}"))
}

/// Integer element with two's-complement truncation
pub trait Quantized: Element {
    /// Sign- or zero-extend into the 64-bit accumulator domain
    fn to_i64(self) -> i64;

    /// Keep the low bits of `value`, exactly like a C narrowing cast
    fn wrap_from_i64(value: i64) -> Self;
}

macro_rules! impl_float_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const NAME: &'static str = stringify!($t);

                #[inline]
                fn as_f64(self) -> f64 {
                    self as f64
                }

                fn try_from_f64(value: f64) -> Result<Self> {
                    let narrowed = <$t as NumCast>::from(value)
                        .ok_or_else(|| not_representable(value, Self::NAME))?;
                    if !value.is_finite() || !narrowed.is_finite() {
                        return Err(not_representable(value, Self::NAME));
                    }
                    Ok(narrowed)
                }
            }
        )*
    };
}

macro_rules! impl_int_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const NAME: &'static str = stringify!($t);

                #[inline]
                fn as_f64(self) -> f64 {
                    self as f64
                }

                fn try_from_f64(value: f64) -> Result<Self> {
                    let narrowed = <$t as NumCast>::from(value)
                        .ok_or_else(|| not_representable(value, Self::NAME))?;
                    if narrowed as f64 != value {
                        return Err(not_representable(value, Self::NAME));
                    }
                    Ok(narrowed)
                }
            }

            impl Quantized for $t {
                #[inline]
                fn to_i64(self) -> i64 {
                    self as i64
                }

                #[inline]
                fn wrap_from_i64(value: i64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_float_element!(f32, f64);
impl_int_element!(i8, i16, i32, i64, u8, u16, u32);
