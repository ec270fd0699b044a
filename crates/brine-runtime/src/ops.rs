//! Wasm numeric operations that require runtime checks.
//!
//! ## Float-to-integer truncation
//!
//! Rust's `as` cast for float-to-integer is **saturating** (NaN maps to 0).
//! That is exactly the semantics of the `trunc_sat` family, which therefore
//! never traps. The plain `trunc` family must instead trap: NaN input is an
//! `InvalidConversionToInteger`, an out-of-range input an `IntegerOverflow`.
//!
//! ## Integer division / remainder
//!
//! `checked_div` returns `None` for both divide-by-zero and signed overflow
//! (`i32::MIN / -1`); the two cases trap with different reasons, so the
//! divisor is checked first. `rem_s` of `MIN` by `-1` is defined as 0.
//!
//! ## Float min / max
//!
//! Wasm `min`/`max` propagate NaN and order `-0.0` below `+0.0`, unlike
//! `f32::min`, which returns the non-NaN operand.

use crate::{Trap, TrapResult};

// ── Float → i32 trapping truncation ──────────────────────────────────────────

/// Wasm `i32.trunc_f32_s`.
#[inline(never)]
pub fn i32_trunc_f32_s(v: f32) -> TrapResult<i32> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 2147483648.0f32 || v < -2147483648.0f32 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as i32)
}

/// Wasm `i32.trunc_f32_u`.
///
/// The lower bound is `<= -1.0` (not `< 0.0`) because `-0.5` truncates to 0,
/// which is a valid unsigned value.
#[inline(never)]
pub fn i32_trunc_f32_u(v: f32) -> TrapResult<i32> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 4294967296.0f32 || v <= -1.0f32 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as u32 as i32)
}

/// Wasm `i32.trunc_f64_s`.
#[inline(never)]
pub fn i32_trunc_f64_s(v: f64) -> TrapResult<i32> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 2147483648.0f64 || v <= -2147483649.0f64 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as i32)
}

/// Wasm `i32.trunc_f64_u`.
#[inline(never)]
pub fn i32_trunc_f64_u(v: f64) -> TrapResult<i32> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 4294967296.0f64 || v <= -1.0f64 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as u32 as i32)
}

// ── Float → i64 trapping truncation ──────────────────────────────────────────

/// Wasm `i64.trunc_f32_s`.
#[inline(never)]
pub fn i64_trunc_f32_s(v: f32) -> TrapResult<i64> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 9223372036854775808.0f32 || v < -9223372036854775808.0f32 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as i64)
}

/// Wasm `i64.trunc_f32_u`.
#[inline(never)]
pub fn i64_trunc_f32_u(v: f32) -> TrapResult<i64> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 18446744073709551616.0f32 || v <= -1.0f32 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as u64 as i64)
}

/// Wasm `i64.trunc_f64_s`.
#[inline(never)]
pub fn i64_trunc_f64_s(v: f64) -> TrapResult<i64> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 9223372036854775808.0f64 || v < -9223372036854775808.0f64 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as i64)
}

/// Wasm `i64.trunc_f64_u`.
#[inline(never)]
pub fn i64_trunc_f64_u(v: f64) -> TrapResult<i64> {
    if v.is_nan() {
        return Err(Trap::InvalidConversionToInteger);
    }
    if v >= 18446744073709551616.0f64 || v <= -1.0f64 {
        return Err(Trap::IntegerOverflow);
    }
    Ok(v as u64 as i64)
}

// ── Saturating truncation (never traps) ──────────────────────────────────────

/// Wasm `i32.trunc_sat_f32_s`.
#[inline]
pub fn i32_trunc_sat_f32_s(v: f32) -> i32 {
    v as i32
}

/// Wasm `i32.trunc_sat_f32_u`.
#[inline]
pub fn i32_trunc_sat_f32_u(v: f32) -> i32 {
    v as u32 as i32
}

/// Wasm `i32.trunc_sat_f64_s`.
#[inline]
pub fn i32_trunc_sat_f64_s(v: f64) -> i32 {
    v as i32
}

/// Wasm `i32.trunc_sat_f64_u`.
#[inline]
pub fn i32_trunc_sat_f64_u(v: f64) -> i32 {
    v as u32 as i32
}

/// Wasm `i64.trunc_sat_f32_s`.
#[inline]
pub fn i64_trunc_sat_f32_s(v: f32) -> i64 {
    v as i64
}

/// Wasm `i64.trunc_sat_f32_u`.
#[inline]
pub fn i64_trunc_sat_f32_u(v: f32) -> i64 {
    v as u64 as i64
}

/// Wasm `i64.trunc_sat_f64_s`.
#[inline]
pub fn i64_trunc_sat_f64_s(v: f64) -> i64 {
    v as i64
}

/// Wasm `i64.trunc_sat_f64_u`.
#[inline]
pub fn i64_trunc_sat_f64_u(v: f64) -> i64 {
    v as u64 as i64
}

// ── i32 division / remainder ──────────────────────────────────────────────────

/// Wasm `i32.div_s`: traps on zero divisor and on `i32::MIN / -1`.
#[inline(never)]
pub fn i32_div_s(lhs: i32, rhs: i32) -> TrapResult<i32> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    lhs.checked_div(rhs).ok_or(Trap::IntegerOverflow)
}

/// Wasm `i32.div_u`.
#[inline(never)]
pub fn i32_div_u(lhs: i32, rhs: i32) -> TrapResult<i32> {
    (lhs as u32)
        .checked_div(rhs as u32)
        .map(|v| v as i32)
        .ok_or(Trap::IntegerDivideByZero)
}

/// Wasm `i32.rem_s`: traps on zero divisor; `i32::MIN rem_s -1 = 0`.
#[inline(never)]
pub fn i32_rem_s(lhs: i32, rhs: i32) -> TrapResult<i32> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

/// Wasm `i32.rem_u`.
#[inline(never)]
pub fn i32_rem_u(lhs: i32, rhs: i32) -> TrapResult<i32> {
    (lhs as u32)
        .checked_rem(rhs as u32)
        .map(|v| v as i32)
        .ok_or(Trap::IntegerDivideByZero)
}

// ── i64 division / remainder ──────────────────────────────────────────────────

/// Wasm `i64.div_s`: traps on zero divisor and on `i64::MIN / -1`.
#[inline(never)]
pub fn i64_div_s(lhs: i64, rhs: i64) -> TrapResult<i64> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    lhs.checked_div(rhs).ok_or(Trap::IntegerOverflow)
}

/// Wasm `i64.div_u`.
#[inline(never)]
pub fn i64_div_u(lhs: i64, rhs: i64) -> TrapResult<i64> {
    (lhs as u64)
        .checked_div(rhs as u64)
        .map(|v| v as i64)
        .ok_or(Trap::IntegerDivideByZero)
}

/// Wasm `i64.rem_s`: traps on zero divisor; `i64::MIN rem_s -1 = 0`.
#[inline(never)]
pub fn i64_rem_s(lhs: i64, rhs: i64) -> TrapResult<i64> {
    if rhs == 0 {
        return Err(Trap::IntegerDivideByZero);
    }
    Ok(lhs.wrapping_rem(rhs))
}

/// Wasm `i64.rem_u`.
#[inline(never)]
pub fn i64_rem_u(lhs: i64, rhs: i64) -> TrapResult<i64> {
    (lhs as u64)
        .checked_rem(rhs as u64)
        .map(|v| v as i64)
        .ok_or(Trap::IntegerDivideByZero)
}

// ── Float min / max ───────────────────────────────────────────────────────────

/// Wasm `f32.min`.
#[inline]
pub fn f32_min(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::NAN;
    }
    if a == b {
        // Only differs for ±0: pick the negative one.
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

/// Wasm `f32.max`.
#[inline]
pub fn f32_max(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        return f32::NAN;
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

/// Wasm `f64.min`.
#[inline]
pub fn f64_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == b {
        return if a.is_sign_negative() { a } else { b };
    }
    if a < b {
        a
    } else {
        b
    }
}

/// Wasm `f64.max`.
#[inline]
pub fn f64_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == b {
        return if a.is_sign_positive() { a } else { b };
    }
    if a > b {
        a
    } else {
        b
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── trapping truncation ──

    #[test]
    fn i32_trunc_f32_s_in_range() {
        assert_eq!(i32_trunc_f32_s(1.9f32), Ok(1));
        assert_eq!(i32_trunc_f32_s(-1.9f32), Ok(-1));
        assert_eq!(i32_trunc_f32_s(-2147483648.0f32), Ok(i32::MIN));
    }

    #[test]
    fn i32_trunc_f32_s_nan_is_invalid_conversion() {
        assert_eq!(
            i32_trunc_f32_s(f32::NAN),
            Err(Trap::InvalidConversionToInteger)
        );
    }

    #[test]
    fn i32_trunc_f32_s_overflow() {
        // 2^31 is one past i32::MAX
        assert_eq!(i32_trunc_f32_s(2147483648.0f32), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_f32_s(f32::NEG_INFINITY), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn i32_trunc_f32_u_bounds() {
        // trunc(-0.5) = 0, which is valid for unsigned
        assert_eq!(i32_trunc_f32_u(-0.5f32), Ok(0));
        assert_eq!(i32_trunc_f32_u(-1.0f32), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_f32_u(4294967296.0f32), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn i32_trunc_f64_s_bounds() {
        assert_eq!(i32_trunc_f64_s(2147483647.0f64), Ok(i32::MAX));
        assert_eq!(i32_trunc_f64_s(-2147483648.9f64), Ok(i32::MIN));
        assert_eq!(i32_trunc_f64_s(2147483648.0f64), Err(Trap::IntegerOverflow));
        assert_eq!(i32_trunc_f64_s(-2147483649.0f64), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn i32_trunc_f64_u_max() {
        // u32::MAX reinterpreted as i32 = -1
        assert_eq!(i32_trunc_f64_u(4294967295.0f64), Ok(-1i32));
        assert_eq!(i32_trunc_f64_u(-0.9f64), Ok(0));
    }

    #[test]
    fn i64_trunc_bounds() {
        assert_eq!(
            i64_trunc_f64_s(9223372036854774784.0f64),
            Ok(9223372036854774784i64)
        );
        assert_eq!(
            i64_trunc_f64_s(9223372036854775808.0f64),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(i64_trunc_f32_u(-1.0f32), Err(Trap::IntegerOverflow));
        assert_eq!(
            i64_trunc_f64_u(f64::NAN),
            Err(Trap::InvalidConversionToInteger)
        );
    }

    // ── saturating truncation ──

    #[test]
    fn trunc_sat_clamps() {
        assert_eq!(i32_trunc_sat_f32_s(f32::NAN), 0);
        assert_eq!(i32_trunc_sat_f32_s(f32::INFINITY), i32::MAX);
        assert_eq!(i32_trunc_sat_f64_u(-5.0), 0);
        assert_eq!(i32_trunc_sat_f64_u(1e20), -1);
        assert_eq!(i64_trunc_sat_f32_s(f32::NEG_INFINITY), i64::MIN);
        assert_eq!(i64_trunc_sat_f64_u(f64::INFINITY), -1);
    }

    // ── division ──

    #[test]
    fn i32_div_s_cases() {
        assert_eq!(i32_div_s(-10, 3), Ok(-3));
        assert_eq!(i32_div_s(5, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(i32_div_s(i32::MIN, -1), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn i32_div_u_large() {
        // u32::MAX / 1 = u32::MAX, reinterpreted as i32 = -1
        assert_eq!(i32_div_u(-1i32, 1), Ok(-1i32));
        assert_eq!(i32_div_u(5, 0), Err(Trap::IntegerDivideByZero));
    }

    #[test]
    fn i32_rem_s_min_over_neg_one() {
        assert_eq!(i32_rem_s(i32::MIN, -1), Ok(0));
        assert_eq!(i32_rem_s(-10, 3), Ok(-1));
        assert_eq!(i32_rem_s(5, 0), Err(Trap::IntegerDivideByZero));
    }

    #[test]
    fn i32_rem_u_cases() {
        assert_eq!(i32_rem_u(-1, 10), Ok(5)); // 4294967295 % 10
        assert_eq!(i32_rem_u(5, 0), Err(Trap::IntegerDivideByZero));
    }

    #[test]
    fn i64_division_cases() {
        assert_eq!(i64_div_s(100, 7), Ok(14));
        assert_eq!(i64_div_s(i64::MIN, -1), Err(Trap::IntegerOverflow));
        assert_eq!(i64_div_u(17, 5), Ok(3));
        assert_eq!(i64_rem_s(i64::MIN, -1), Ok(0));
        assert_eq!(i64_rem_u(17, 0), Err(Trap::IntegerDivideByZero));
    }

    // ── min / max ──

    #[test]
    fn min_max_signed_zero() {
        assert!(f32_min(0.0, -0.0).is_sign_negative());
        assert!(f32_max(-0.0, 0.0).is_sign_positive());
        assert!(f64_min(-0.0, 0.0).is_sign_negative());
        assert!(f64_max(0.0, -0.0).is_sign_positive());
    }

    #[test]
    fn min_max_propagate_nan() {
        assert!(f32_min(1.0, f32::NAN).is_nan());
        assert!(f64_max(f64::NAN, 1.0).is_nan());
        assert_eq!(f64_min(1.0, 2.0), 1.0);
        assert_eq!(f32_max(1.0, 2.0), 2.0);
    }
}
