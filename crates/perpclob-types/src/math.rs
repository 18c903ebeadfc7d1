//! Exact integer and rational helpers.
//!
//! Every quantity that feeds a balance change is computed with
//! [`BigInt`] or [`BigRational`]. Rounding direction is always explicit.

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::constants::ONE_MILLION;
use crate::fault::{self, InvariantViolation};

/// Returns `(10^|exponent|, exponent < 0)`.
///
/// Callers multiply by the power when the flag is false and divide when it is true.
#[must_use]
pub fn big_pow10(exponent: i32) -> (BigInt, bool) {
    let power = num_traits::pow(BigInt::from(10u8), exponent.unsigned_abs() as usize);
    (power, exponent < 0)
}

/// `x * 10^exponent` as an exact rational.
#[must_use]
pub fn rat_mul_pow10(x: &BigInt, exponent: i32) -> BigRational {
    let (power, inverse) = big_pow10(exponent);
    if inverse {
        BigRational::new(x.clone(), power)
    } else {
        BigRational::from_integer(x * power)
    }
}

/// `x * ppm / 1_000_000`, rounded toward +inf when `round_up`, else toward -inf.
#[must_use]
pub fn mul_ppm_round(x: &BigInt, ppm: i32, round_up: bool) -> BigInt {
    let numerator = x * BigInt::from(ppm);
    let denominator = BigInt::from(ONE_MILLION);
    if round_up {
        numerator.div_ceil(&denominator)
    } else {
        numerator.div_floor(&denominator)
    }
}

/// `x * ppm / 1_000_000`, rounded down.
#[must_use]
pub fn int_mul_ppm(x: &BigInt, ppm: u32) -> BigInt {
    (x * BigInt::from(ppm)).div_floor(&BigInt::from(ONE_MILLION))
}

/// `r * ppm / 1_000_000`, exact.
#[must_use]
pub fn rat_mul_ppm(r: &BigRational, ppm: u32) -> BigRational {
    r * BigRational::new(BigInt::from(ppm), BigInt::from(ONE_MILLION))
}

/// Round a rational to an integer: ceiling when `round_up`, floor otherwise.
#[must_use]
pub fn rat_round(r: &BigRational, round_up: bool) -> BigInt {
    if round_up {
        r.ceil().to_integer()
    } else {
        r.floor().to_integer()
    }
}

/// Round `x` to a multiple of `multiple`, up or down. `multiple` must be positive.
#[must_use]
pub fn round_to_multiple(x: &BigInt, multiple: &BigInt, round_up: bool) -> BigInt {
    let quotient = if round_up {
        x.div_ceil(multiple)
    } else {
        x.div_floor(multiple)
    };
    quotient * multiple
}

/// Clamp `x` into `[lo, hi]`.
#[must_use]
pub fn clamp_int(x: BigInt, lo: &BigInt, hi: &BigInt) -> BigInt {
    if &x < lo {
        lo.clone()
    } else if &x > hi {
        hi.clone()
    } else {
        x
    }
}

/// Clamp a rational into `[0, 1]`.
#[must_use]
pub fn clamp_unit(r: BigRational) -> BigRational {
    if r.is_negative() {
        BigRational::zero()
    } else if r > BigRational::one() {
        BigRational::one()
    } else {
        r
    }
}

/// Sign of `x` as `-1`, `0` or `1`.
#[must_use]
pub fn sign(x: &BigInt) -> i8 {
    if x.is_positive() {
        1
    } else if x.is_negative() {
        -1
    } else {
        0
    }
}

/// Quote quantums for `base_quantums` filled at `subticks`.
///
/// `base_quantums * subticks * 10^exponent`, truncated.
#[must_use]
pub fn fill_amount_to_quote_quantums(subticks: u64, base_quantums: u64, exponent: i32) -> BigInt {
    let product = BigInt::from(base_quantums) * BigInt::from(subticks);
    let (power, inverse) = big_pow10(exponent);
    if inverse { product / power } else { product * power }
}

/// Narrow to `u64` or raise a conversion fault.
#[must_use]
pub fn must_u64(x: &BigInt, what: &'static str) -> u64 {
    match x.to_u64() {
        Some(v) => v,
        None => fault::raise(InvariantViolation::ConversionOverflow {
            value: x.to_string(),
            target: what,
        }),
    }
}
