//! Numeric instruction semantics.
//!
//! Floats are handled as raw bits where the operation is a pure bit
//! manipulation (`abs`, `neg`, `copysign`, reinterpretations) so NaN
//! payloads pass through unchanged.

use brine_runtime::{ops, TrapResult};

use crate::instr::{Convert, FBinop, FRelop, FUnop, IBinop, IRelop, IUnop};
use crate::value::Value;

const F32_SIGN: u32 = 1 << 31;
const F64_SIGN: u64 = 1 << 63;

// ── Integers ──────────────────────────────────────────────────────────────

pub fn i32_unop(op: IUnop, v: i32) -> i32 {
    match op {
        IUnop::Clz => v.leading_zeros() as i32,
        IUnop::Ctz => v.trailing_zeros() as i32,
        IUnop::Popcnt => v.count_ones() as i32,
        IUnop::Extend8S => v as i8 as i32,
        IUnop::Extend16S => v as i16 as i32,
        IUnop::Extend32S => v,
    }
}

pub fn i64_unop(op: IUnop, v: i64) -> i64 {
    match op {
        IUnop::Clz => v.leading_zeros() as i64,
        IUnop::Ctz => v.trailing_zeros() as i64,
        IUnop::Popcnt => v.count_ones() as i64,
        IUnop::Extend8S => v as i8 as i64,
        IUnop::Extend16S => v as i16 as i64,
        IUnop::Extend32S => v as i32 as i64,
    }
}

pub fn i32_binop(op: IBinop, a: i32, b: i32) -> TrapResult<i32> {
    Ok(match op {
        IBinop::Add => a.wrapping_add(b),
        IBinop::Sub => a.wrapping_sub(b),
        IBinop::Mul => a.wrapping_mul(b),
        IBinop::DivS => ops::i32_div_s(a, b)?,
        IBinop::DivU => ops::i32_div_u(a, b)?,
        IBinop::RemS => ops::i32_rem_s(a, b)?,
        IBinop::RemU => ops::i32_rem_u(a, b)?,
        IBinop::And => a & b,
        IBinop::Or => a | b,
        IBinop::Xor => a ^ b,
        IBinop::Shl => a.wrapping_shl(b as u32),
        IBinop::ShrS => a.wrapping_shr(b as u32),
        IBinop::ShrU => (a as u32).wrapping_shr(b as u32) as i32,
        IBinop::Rotl => a.rotate_left(b as u32 % 32),
        IBinop::Rotr => a.rotate_right(b as u32 % 32),
    })
}

pub fn i64_binop(op: IBinop, a: i64, b: i64) -> TrapResult<i64> {
    Ok(match op {
        IBinop::Add => a.wrapping_add(b),
        IBinop::Sub => a.wrapping_sub(b),
        IBinop::Mul => a.wrapping_mul(b),
        IBinop::DivS => ops::i64_div_s(a, b)?,
        IBinop::DivU => ops::i64_div_u(a, b)?,
        IBinop::RemS => ops::i64_rem_s(a, b)?,
        IBinop::RemU => ops::i64_rem_u(a, b)?,
        IBinop::And => a & b,
        IBinop::Or => a | b,
        IBinop::Xor => a ^ b,
        IBinop::Shl => a.wrapping_shl(b as u32),
        IBinop::ShrS => a.wrapping_shr(b as u32),
        IBinop::ShrU => (a as u64).wrapping_shr(b as u32) as i64,
        IBinop::Rotl => a.rotate_left((b as u64 % 64) as u32),
        IBinop::Rotr => a.rotate_right((b as u64 % 64) as u32),
    })
}

pub fn i32_relop(op: IRelop, a: i32, b: i32) -> bool {
    let (ua, ub) = (a as u32, b as u32);
    match op {
        IRelop::Eq => a == b,
        IRelop::Ne => a != b,
        IRelop::LtS => a < b,
        IRelop::LtU => ua < ub,
        IRelop::GtS => a > b,
        IRelop::GtU => ua > ub,
        IRelop::LeS => a <= b,
        IRelop::LeU => ua <= ub,
        IRelop::GeS => a >= b,
        IRelop::GeU => ua >= ub,
    }
}

pub fn i64_relop(op: IRelop, a: i64, b: i64) -> bool {
    let (ua, ub) = (a as u64, b as u64);
    match op {
        IRelop::Eq => a == b,
        IRelop::Ne => a != b,
        IRelop::LtS => a < b,
        IRelop::LtU => ua < ub,
        IRelop::GtS => a > b,
        IRelop::GtU => ua > ub,
        IRelop::LeS => a <= b,
        IRelop::LeU => ua <= ub,
        IRelop::GeS => a >= b,
        IRelop::GeU => ua >= ub,
    }
}

// ── Floats ────────────────────────────────────────────────────────────────

pub fn f32_unop(op: FUnop, bits: u32) -> u32 {
    let v = f32::from_bits(bits);
    match op {
        FUnop::Abs => bits & !F32_SIGN,
        FUnop::Neg => bits ^ F32_SIGN,
        FUnop::Ceil => v.ceil().to_bits(),
        FUnop::Floor => v.floor().to_bits(),
        FUnop::Trunc => v.trunc().to_bits(),
        FUnop::Nearest => v.round_ties_even().to_bits(),
        FUnop::Sqrt => v.sqrt().to_bits(),
    }
}

pub fn f64_unop(op: FUnop, bits: u64) -> u64 {
    let v = f64::from_bits(bits);
    match op {
        FUnop::Abs => bits & !F64_SIGN,
        FUnop::Neg => bits ^ F64_SIGN,
        FUnop::Ceil => v.ceil().to_bits(),
        FUnop::Floor => v.floor().to_bits(),
        FUnop::Trunc => v.trunc().to_bits(),
        FUnop::Nearest => v.round_ties_even().to_bits(),
        FUnop::Sqrt => v.sqrt().to_bits(),
    }
}

pub fn f32_binop(op: FBinop, a: u32, b: u32) -> u32 {
    let (x, y) = (f32::from_bits(a), f32::from_bits(b));
    match op {
        FBinop::Add => (x + y).to_bits(),
        FBinop::Sub => (x - y).to_bits(),
        FBinop::Mul => (x * y).to_bits(),
        FBinop::Div => (x / y).to_bits(),
        FBinop::Min => ops::f32_min(x, y).to_bits(),
        FBinop::Max => ops::f32_max(x, y).to_bits(),
        FBinop::Copysign => (a & !F32_SIGN) | (b & F32_SIGN),
    }
}

pub fn f64_binop(op: FBinop, a: u64, b: u64) -> u64 {
    let (x, y) = (f64::from_bits(a), f64::from_bits(b));
    match op {
        FBinop::Add => (x + y).to_bits(),
        FBinop::Sub => (x - y).to_bits(),
        FBinop::Mul => (x * y).to_bits(),
        FBinop::Div => (x / y).to_bits(),
        FBinop::Min => ops::f64_min(x, y).to_bits(),
        FBinop::Max => ops::f64_max(x, y).to_bits(),
        FBinop::Copysign => (a & !F64_SIGN) | (b & F64_SIGN),
    }
}

pub fn f32_relop(op: FRelop, a: u32, b: u32) -> bool {
    let (x, y) = (f32::from_bits(a), f32::from_bits(b));
    match op {
        FRelop::Eq => x == y,
        FRelop::Ne => x != y,
        FRelop::Lt => x < y,
        FRelop::Gt => x > y,
        FRelop::Le => x <= y,
        FRelop::Ge => x >= y,
    }
}

pub fn f64_relop(op: FRelop, a: u64, b: u64) -> bool {
    let (x, y) = (f64::from_bits(a), f64::from_bits(b));
    match op {
        FRelop::Eq => x == y,
        FRelop::Ne => x != y,
        FRelop::Lt => x < y,
        FRelop::Gt => x > y,
        FRelop::Le => x <= y,
        FRelop::Ge => x >= y,
    }
}

// ── Conversions ───────────────────────────────────────────────────────────

/// Apply a conversion. `None` if `v` is not of the operand type.
pub fn convert(op: Convert, v: Value) -> Option<TrapResult<Value>> {
    use Convert::*;
    let out = match (op, v) {
        (I32WrapI64, Value::I64(x)) => Ok(Value::I32(x as i32)),
        (I64ExtendI32S, Value::I32(x)) => Ok(Value::I64(x as i64)),
        (I64ExtendI32U, Value::I32(x)) => Ok(Value::I64(x as u32 as i64)),

        (I32TruncF32S, Value::F32(b)) => ops::i32_trunc_f32_s(f32::from_bits(b)).map(Value::I32),
        (I32TruncF32U, Value::F32(b)) => ops::i32_trunc_f32_u(f32::from_bits(b)).map(Value::I32),
        (I32TruncF64S, Value::F64(b)) => ops::i32_trunc_f64_s(f64::from_bits(b)).map(Value::I32),
        (I32TruncF64U, Value::F64(b)) => ops::i32_trunc_f64_u(f64::from_bits(b)).map(Value::I32),
        (I64TruncF32S, Value::F32(b)) => ops::i64_trunc_f32_s(f32::from_bits(b)).map(Value::I64),
        (I64TruncF32U, Value::F32(b)) => ops::i64_trunc_f32_u(f32::from_bits(b)).map(Value::I64),
        (I64TruncF64S, Value::F64(b)) => ops::i64_trunc_f64_s(f64::from_bits(b)).map(Value::I64),
        (I64TruncF64U, Value::F64(b)) => ops::i64_trunc_f64_u(f64::from_bits(b)).map(Value::I64),

        (I32TruncSatF32S, Value::F32(b)) => Ok(Value::I32(ops::i32_trunc_sat_f32_s(f32::from_bits(b)))),
        (I32TruncSatF32U, Value::F32(b)) => Ok(Value::I32(ops::i32_trunc_sat_f32_u(f32::from_bits(b)))),
        (I32TruncSatF64S, Value::F64(b)) => Ok(Value::I32(ops::i32_trunc_sat_f64_s(f64::from_bits(b)))),
        (I32TruncSatF64U, Value::F64(b)) => Ok(Value::I32(ops::i32_trunc_sat_f64_u(f64::from_bits(b)))),
        (I64TruncSatF32S, Value::F32(b)) => Ok(Value::I64(ops::i64_trunc_sat_f32_s(f32::from_bits(b)))),
        (I64TruncSatF32U, Value::F32(b)) => Ok(Value::I64(ops::i64_trunc_sat_f32_u(f32::from_bits(b)))),
        (I64TruncSatF64S, Value::F64(b)) => Ok(Value::I64(ops::i64_trunc_sat_f64_s(f64::from_bits(b)))),
        (I64TruncSatF64U, Value::F64(b)) => Ok(Value::I64(ops::i64_trunc_sat_f64_u(f64::from_bits(b)))),

        (F32ConvertI32S, Value::I32(x)) => Ok(Value::f32(x as f32)),
        (F32ConvertI32U, Value::I32(x)) => Ok(Value::f32(x as u32 as f32)),
        (F32ConvertI64S, Value::I64(x)) => Ok(Value::f32(x as f32)),
        (F32ConvertI64U, Value::I64(x)) => Ok(Value::f32(x as u64 as f32)),
        (F32DemoteF64, Value::F64(b)) => Ok(Value::f32(f64::from_bits(b) as f32)),
        (F64ConvertI32S, Value::I32(x)) => Ok(Value::f64(x as f64)),
        (F64ConvertI32U, Value::I32(x)) => Ok(Value::f64(x as u32 as f64)),
        (F64ConvertI64S, Value::I64(x)) => Ok(Value::f64(x as f64)),
        (F64ConvertI64U, Value::I64(x)) => Ok(Value::f64(x as u64 as f64)),
        (F64PromoteF32, Value::F32(b)) => Ok(Value::f64(f32::from_bits(b) as f64)),

        (I32ReinterpretF32, Value::F32(b)) => Ok(Value::I32(b as i32)),
        (I64ReinterpretF64, Value::F64(b)) => Ok(Value::I64(b as i64)),
        (F32ReinterpretI32, Value::I32(x)) => Ok(Value::F32(x as u32)),
        (F64ReinterpretI64, Value::I64(x)) => Ok(Value::F64(x as u64)),
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use brine_runtime::Trap;

    #[test]
    fn shifts_mask_their_count() {
        assert_eq!(i32_binop(IBinop::Shl, 1, 33), Ok(2));
        assert_eq!(i32_binop(IBinop::ShrU, -1, 31), Ok(1));
        assert_eq!(i32_binop(IBinop::ShrS, i32::MIN, 31), Ok(-1));
        assert_eq!(i64_binop(IBinop::Shl, 1, 65), Ok(2));
        assert_eq!(i32_binop(IBinop::Rotl, 0x8000_0000u32 as i32, 1), Ok(1));
        assert_eq!(i64_binop(IBinop::Rotr, 1, -1), Ok(2));
    }

    #[test]
    fn division_traps_propagate() {
        assert_eq!(i32_binop(IBinop::DivS, 1, 0), Err(Trap::IntegerDivideByZero));
        assert_eq!(i64_binop(IBinop::DivS, i64::MIN, -1), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn bit_counting() {
        assert_eq!(i32_unop(IUnop::Clz, 1), 31);
        assert_eq!(i32_unop(IUnop::Ctz, 0), 32);
        assert_eq!(i64_unop(IUnop::Popcnt, -1), 64);
        assert_eq!(i64_unop(IUnop::Extend32S, 0x8000_0000), -2147483648);
        assert_eq!(i32_unop(IUnop::Extend8S, 0x80), -128);
    }

    #[test]
    fn unsigned_comparisons() {
        assert!(i32_relop(IRelop::GtU, -1, 1));
        assert!(!i32_relop(IRelop::GtS, -1, 1));
        assert!(i64_relop(IRelop::LeU, 0, -1));
    }

    #[test]
    fn neg_and_abs_keep_nan_payload() {
        let nan = 0x7fc0_0001u32;
        assert_eq!(f32_unop(FUnop::Neg, nan), 0xffc0_0001);
        assert_eq!(f32_unop(FUnop::Abs, 0xffc0_0001), nan);
        assert_eq!(f64_binop(FBinop::Copysign, 1.0f64.to_bits(), (-0.0f64).to_bits()), (-1.0f64).to_bits());
    }

    #[test]
    fn nearest_rounds_half_to_even() {
        assert_eq!(f32_unop(FUnop::Nearest, 2.5f32.to_bits()), 2.0f32.to_bits());
        assert_eq!(f64_unop(FUnop::Nearest, (-3.5f64).to_bits()), (-4.0f64).to_bits());
        assert_eq!(f64_unop(FUnop::Nearest, (-0.5f64).to_bits()), (-0.0f64).to_bits());
    }

    #[test]
    fn nan_comparisons_are_false() {
        let nan = f32::NAN.to_bits();
        assert!(!f32_relop(FRelop::Eq, nan, nan));
        assert!(f32_relop(FRelop::Ne, nan, nan));
    }

    #[test]
    fn conversions() {
        assert_eq!(convert(Convert::I32WrapI64, Value::I64(0x1_0000_0005)), Some(Ok(Value::I32(5))));
        assert_eq!(convert(Convert::I64ExtendI32U, Value::I32(-1)), Some(Ok(Value::I64(0xffff_ffff))));
        assert_eq!(
            convert(Convert::I32TruncF32S, Value::f32(f32::NAN)),
            Some(Err(Trap::InvalidConversionToInteger))
        );
        assert_eq!(convert(Convert::I32TruncSatF64U, Value::f64(-3.0)), Some(Ok(Value::I32(0))));
        assert_eq!(convert(Convert::F64ConvertI64U, Value::I64(-1)), Some(Ok(Value::f64(18446744073709551616.0))));
        assert_eq!(convert(Convert::F32ReinterpretI32, Value::I32(0x3f80_0000)), Some(Ok(Value::f32(1.0))));
        assert_eq!(convert(Convert::I32WrapI64, Value::I32(0)), None);
    }
}
