use std::fmt::Debug;
use std::ops::{Add, Sub};

/// Element type the SPECK engine codes: non-negative magnitudes compared against
/// power-of-two thresholds.
pub trait Magnitude:
    Copy + PartialOrd + Default + Debug + Send + Sync + Add<Output = Self> + Sub<Output = Self>
{
    /// Width of an integer magnitude type, `None` for reals.
    const BITS: Option<u32>;

    /// Exponent of the smallest representable power of two.
    const MIN_BITPLANE: i32;

    /// `2^exp` for `MIN_BITPLANE <= exp`. Integer types also need `exp < BITS`.
    fn pow2(exp: i32) -> Self;

    /// `⌊log2(self)⌋`, or `i32::MIN` for zero.
    fn max_coefficient_bits(self) -> i32;

    /// Exponent of the lowest set bit, or `i32::MAX` for zero.
    fn finest_bit(self) -> i32;

    fn to_f64(self) -> f64;
}

const F64_MANTISSA_BITS: u32 = f64::MANTISSA_DIGITS - 1;
const F64_MANTISSA_MASK: u64 = (1 << F64_MANTISSA_BITS) - 1;
const F64_EXP_BIAS: i32 = f64::MAX_EXP - 1;

/// Splits a positive finite value into its biased exponent field and mantissa field.
fn f64_fields(value: f64) -> (i32, u64) {
    let bits = value.to_bits();
    ((bits >> F64_MANTISSA_BITS) as i32 & 0x7ff, bits & F64_MANTISSA_MASK)
}

impl Magnitude for f64 {
    const BITS: Option<u32> = None;
    const MIN_BITPLANE: i32 = f64::MIN_EXP - f64::MANTISSA_DIGITS as i32;

    fn pow2(exp: i32) -> Self {
        if exp > -F64_EXP_BIAS {
            f64::from_bits(((exp + F64_EXP_BIAS) as u64) << F64_MANTISSA_BITS)
        } else {
            // subnormal
            f64::from_bits(1u64 << (exp - Self::MIN_BITPLANE))
        }
    }

    fn max_coefficient_bits(self) -> i32 {
        if self <= 0.0 || !self.is_finite() {
            return i32::MIN;
        }
        match f64_fields(self) {
            (0, mantissa) => Self::MIN_BITPLANE + mantissa.ilog2() as i32,
            (exp, _) => exp - F64_EXP_BIAS,
        }
    }

    fn finest_bit(self) -> i32 {
        if self <= 0.0 || !self.is_finite() {
            return i32::MAX;
        }
        match f64_fields(self) {
            (0, mantissa) => Self::MIN_BITPLANE + mantissa.trailing_zeros() as i32,
            (exp, mantissa) => {
                let significand = mantissa | (1 << F64_MANTISSA_BITS);
                exp - F64_EXP_BIAS - F64_MANTISSA_BITS as i32 + significand.trailing_zeros() as i32
            }
        }
    }

    fn to_f64(self) -> f64 {
        self
    }
}

macro_rules! impl_uint_magnitude {
    ($($t:ty),*) => {$(
        impl Magnitude for $t {
            const BITS: Option<u32> = Some(<$t>::BITS);
            const MIN_BITPLANE: i32 = 0;

            fn pow2(exp: i32) -> Self {
                1 << exp
            }

            fn max_coefficient_bits(self) -> i32 {
                match self.checked_ilog2() {
                    Some(e) => e as i32,
                    None => i32::MIN,
                }
            }

            fn finest_bit(self) -> i32 {
                if self == 0 {
                    i32::MAX
                } else {
                    self.trailing_zeros() as i32
                }
            }

            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    )*};
}

impl_uint_magnitude!(u8, u16, u32, u64);

/// Largest `max_coefficient_bits` over a slice, `i32::MIN` if all are zero.
pub fn max_coefficient_bits<T: Magnitude>(values: &[T]) -> i32 {
    values
        .iter()
        .map(|v| v.max_coefficient_bits())
        .max()
        .unwrap_or(i32::MIN)
}

/// Lowest bitplane a lossless encode must reach: the finest set bit of any
/// value, and never above bitplane 0.
pub fn lowest_bitplane<T: Magnitude>(values: &[T]) -> i32 {
    values
        .iter()
        .map(|v| v.finest_bit())
        .min()
        .unwrap_or(i32::MAX)
        .min(0)
}
