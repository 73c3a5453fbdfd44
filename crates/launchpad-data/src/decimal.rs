//! Fixed-point decimal helpers for price and market-cap derivation.
//!
//! Every operation works on exact `BigInt` mantissas. Division and scale
//! reduction truncate toward zero; nothing here rounds half-even or goes
//! through `f64`.

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};

/// Fractional digits kept for token price and market cap.
pub const METRIC_SCALE: i64 = 18;

fn pow10(exp: u64) -> BigInt {
    BigInt::from(10u32).pow(exp as u32)
}

/// Converts an unsigned on-chain integer to a `BigInt`.
pub fn u256_to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Interprets `value` as a fixed-point number with `decimals` fractional digits.
///
/// `from_units(1_500_000, 6)` is `1.5`.
pub fn from_units(value: U256, decimals: u32) -> BigDecimal {
    BigDecimal::new(u256_to_bigint(value), i64::from(decimals))
}

/// Reduces (or pads) `value` to exactly `scale` fractional digits, dropping
/// excess digits toward zero.
pub fn truncate(value: &BigDecimal, scale: i64) -> BigDecimal {
    let (mantissa, exp) = value.as_bigint_and_exponent();
    if exp <= scale {
        let pad = (scale - exp) as u64;
        BigDecimal::new(mantissa * pow10(pad), scale)
    } else {
        let cut = (exp - scale) as u64;
        // BigInt division truncates toward zero.
        BigDecimal::new(mantissa / pow10(cut), scale)
    }
}

/// `numerator / denominator` truncated to `scale` fractional digits.
///
/// Returns `None` when the denominator is zero.
pub fn div_truncated(
    numerator: &BigDecimal,
    denominator: &BigDecimal,
    scale: i64,
) -> Option<BigDecimal> {
    let (num, num_exp) = numerator.as_bigint_and_exponent();
    let (den, den_exp) = denominator.as_bigint_and_exponent();
    if den.sign() == Sign::NoSign {
        return None;
    }

    // num * 10^-num_exp / (den * 10^-den_exp) at 10^-scale resolution is
    // num * 10^(den_exp + scale - num_exp) / den.
    let shift = den_exp + scale - num_exp;
    let quotient = if shift >= 0 {
        (num * pow10(shift as u64)) / den
    } else {
        num / (den * pow10(shift.unsigned_abs()))
    };
    Some(BigDecimal::new(quotient, scale))
}

/// `a * b` truncated to `scale` fractional digits.
pub fn mul_truncated(a: &BigDecimal, b: &BigDecimal, scale: i64) -> BigDecimal {
    truncate(&(a * b), scale)
}

/// Renders `value` in positional notation with exactly `scale` fractional
/// digits, e.g. `0.750000000000000000`.
pub fn to_plain_string(value: &BigDecimal, scale: i64) -> String {
    let (mantissa, _) = truncate(value, scale).as_bigint_and_exponent();
    let negative = mantissa.sign() == Sign::Minus;
    let digits = mantissa.magnitude().to_str_radix(10);

    let scale = scale.max(0) as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale + 1 - digits.len()), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);

    let mut out = String::with_capacity(padded.len() + 2);
    if negative {
        out.push('-');
    }
    out.push_str(int_part);
    if scale > 0 {
        out.push('.');
        out.push_str(frac_part);
    }
    out
}
