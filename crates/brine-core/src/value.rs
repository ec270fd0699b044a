//! Runtime values.

use std::fmt;

use brine_runtime::RefSlot;

use crate::store::FuncAddr;
use crate::types::{RefType, ValType};

/// A Wasm value.
///
/// Floats are stored as raw bits so NaN payloads survive a round trip and
/// values can be compared with `==`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    FuncRef(Option<FuncAddr>),
    /// Opaque host reference, compared by identity.
    ExternRef(Option<u32>),
}

impl Value {
    pub fn f32(v: f32) -> Self {
        Value::F32(v.to_bits())
    }

    pub fn f64(v: f64) -> Self {
        Value::F64(v.to_bits())
    }

    /// Zero value (or null reference) of `ty`, used for fresh locals.
    pub fn default_for(ty: ValType) -> Self {
        match ty {
            ValType::I32 => Value::I32(0),
            ValType::I64 => Value::I64(0),
            ValType::F32 => Value::F32(0),
            ValType::F64 => Value::F64(0),
            ValType::FuncRef => Value::FuncRef(None),
            ValType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn null(ty: RefType) -> Self {
        Value::default_for(ty.into())
    }

    pub fn ty(&self) -> ValType {
        match self {
            Value::I32(_) => ValType::I32,
            Value::I64(_) => ValType::I64,
            Value::F32(_) => ValType::F32,
            Value::F64(_) => ValType::F64,
            Value::FuncRef(_) => ValType::FuncRef,
            Value::ExternRef(_) => ValType::ExternRef,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(bits) => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn is_null_ref(&self) -> bool {
        matches!(self, Value::FuncRef(None) | Value::ExternRef(None))
    }

    /// Table slot for a reference value; `None` for numeric values.
    pub(crate) fn to_slot(self) -> Option<RefSlot> {
        match self {
            Value::FuncRef(r) => Some(r.map(|a| a.0)),
            Value::ExternRef(r) => Some(r),
            _ => None,
        }
    }

    /// Reference value read back from a slot of a table of type `ty`.
    pub(crate) fn from_slot(ty: RefType, slot: RefSlot) -> Self {
        match ty {
            RefType::Func => Value::FuncRef(slot.map(FuncAddr)),
            RefType::Extern => Value::ExternRef(slot),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::f32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::f64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}:i32"),
            Value::I64(v) => write!(f, "{v}:i64"),
            Value::F32(bits) => write!(f, "{}:f32", f32::from_bits(*bits)),
            Value::F64(bits) => write!(f, "{}:f64", f64::from_bits(*bits)),
            Value::FuncRef(None) => f.write_str("null:funcref"),
            Value::FuncRef(Some(addr)) => write!(f, "func@{}:funcref", addr.0),
            Value::ExternRef(None) => f.write_str("null:externref"),
            Value::ExternRef(Some(h)) => write!(f, "{h}:externref"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_bits_compare_equal() {
        let a = Value::f32(f32::NAN);
        assert_eq!(a, Value::F32(f32::NAN.to_bits()));
        assert!(a.as_f32().is_some_and(f32::is_nan));
    }

    #[test]
    fn defaults_are_zero_or_null() {
        assert_eq!(Value::default_for(ValType::I64), Value::I64(0));
        assert!(Value::default_for(ValType::FuncRef).is_null_ref());
        assert_eq!(Value::null(RefType::Extern), Value::ExternRef(None));
    }

    #[test]
    fn slots_keep_reference_kind() {
        let v = Value::ExternRef(Some(7));
        let slot = v.to_slot();
        assert_eq!(slot, Some(Some(7)));
        assert_eq!(Value::from_slot(RefType::Extern, Some(7)), v);
        assert_eq!(Value::I32(1).to_slot(), None);
    }
}
