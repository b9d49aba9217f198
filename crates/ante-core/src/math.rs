//! Fixed-point helpers.
//!
//! Multipliers and decay fractions are fixed-point values with
//! [`FIXED_ONE`](crate::constants::FIXED_ONE) as denominator. Amounts are
//! plain `u128` base units. Every helper is exact (floor division) and
//! reports overflow instead of wrapping.

use crate::error::MathError;

/// Computes `floor(a * b / c)` exactly.
///
/// Uses the direct 128-bit product when it fits, otherwise the
/// `a = q*c + r` decomposition so that `a*b/c = q*b + r*b/c`, trying both
/// operand orders before giving up with [`MathError::Overflow`].
///
/// # Examples
///
/// ```
/// use ante_core::math::mul_div;
/// assert_eq!(mul_div(10, 3, 4).unwrap(), 7);
/// assert_eq!(mul_div(u128::MAX, 2, 4).unwrap(), u128::MAX / 2);
/// ```
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128, MathError> {
    if c == 0 {
        return Err(MathError::DivisionByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        return Ok(product / c);
    }
    split_mul_div(a, b, c)
        .or_else(|| split_mul_div(b, a, c))
        .ok_or(MathError::Overflow)
}

fn split_mul_div(a: u128, b: u128, c: u128) -> Option<u128> {
    let q = a / c;
    let r = a % c;
    let whole = q.checked_mul(b)?;
    let frac = r.checked_mul(b)? / c;
    whole.checked_add(frac)
}

/// `amount * pct / 100`, floored.
pub fn percent_of(amount: u128, pct: u128) -> Result<u128, MathError> {
    mul_div(amount, pct, crate::constants::PERCENT_PRECISION)
}

pub fn checked_add(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

pub fn checked_sub(a: u128, b: u128) -> Result<u128, MathError> {
    a.checked_sub(b).ok_or(MathError::Overflow)
}
