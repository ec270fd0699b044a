//! Decoded instruction set.
//!
//! Function bodies are decoded once into a flat `Vec<Instr>`. Structured
//! control instructions carry the indices of their matching `else`/`end`,
//! resolved by the decoder, so neither the validator nor the interpreter
//! ever rescans bytecode.

use crate::types::{BlockType, RefType, ValType};

/// `memarg` immediate: alignment exponent and static offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemArg {
    pub align: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ── Control ──
    Unreachable,
    Nop,
    /// `end` is the index of the matching `End`.
    Block { ty: BlockType, end: u32 },
    Loop { ty: BlockType },
    /// `else_` is the index of the matching `Else`, if any.
    If {
        ty: BlockType,
        else_: Option<u32>,
        end: u32,
    },
    Else { end: u32 },
    End,
    Br(u32),
    BrIf(u32),
    BrTable { targets: Box<[u32]>, default: u32 },
    Return,
    Call(u32),
    CallIndirect { type_index: u32, table: u32 },

    // ── Parametric ──
    Drop,
    Select,
    SelectTyped(Box<[ValType]>),

    // ── Variables ──
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // ── Tables ──
    TableGet(u32),
    TableSet(u32),
    TableSize(u32),
    TableGrow(u32),
    TableFill(u32),
    TableCopy { dst: u32, src: u32 },
    TableInit { elem: u32, table: u32 },
    ElemDrop(u32),

    // ── Memory ──
    Load(LoadKind, MemArg),
    Store(StoreKind, MemArg),
    MemorySize,
    MemoryGrow,
    MemoryInit(u32),
    DataDrop(u32),
    MemoryCopy,
    MemoryFill,

    // ── Numeric ──
    I32Const(i32),
    I64Const(i64),
    /// Raw bits, so NaN payloads are preserved.
    F32Const(u32),
    F64Const(u64),
    I32Eqz,
    I64Eqz,
    I32Unop(IUnop),
    I64Unop(IUnop),
    I32Binop(IBinop),
    I64Binop(IBinop),
    I32Relop(IRelop),
    I64Relop(IRelop),
    F32Unop(FUnop),
    F64Unop(FUnop),
    F32Binop(FBinop),
    F64Binop(FBinop),
    F32Relop(FRelop),
    F64Relop(FRelop),
    Convert(Convert),

    // ── References ──
    RefNull(RefType),
    RefIsNull,
    RefFunc(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IUnop {
    Clz,
    Ctz,
    Popcnt,
    Extend8S,
    Extend16S,
    /// `i64.extend32_s` only.
    Extend32S,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IBinop {
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IRelop {
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FUnop {
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FBinop {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Copysign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FRelop {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// Conversions between numeric types, named `<result>_<op>_<operand>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convert {
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl Convert {
    /// `(operand, result)` types.
    pub fn signature(self) -> (ValType, ValType) {
        use Convert::*;
        use ValType::*;
        match self {
            I32WrapI64 => (I64, I32),
            I32TruncF32S | I32TruncF32U | I32TruncSatF32S | I32TruncSatF32U => (F32, I32),
            I32TruncF64S | I32TruncF64U | I32TruncSatF64S | I32TruncSatF64U => (F64, I32),
            I64ExtendI32S | I64ExtendI32U => (I32, I64),
            I64TruncF32S | I64TruncF32U | I64TruncSatF32S | I64TruncSatF32U => (F32, I64),
            I64TruncF64S | I64TruncF64U | I64TruncSatF64S | I64TruncSatF64U => (F64, I64),
            F32ConvertI32S | F32ConvertI32U => (I32, F32),
            F32ConvertI64S | F32ConvertI64U => (I64, F32),
            F32DemoteF64 => (F64, F32),
            F64ConvertI32S | F64ConvertI32U => (I32, F64),
            F64ConvertI64S | F64ConvertI64U => (I64, F64),
            F64PromoteF32 => (F32, F64),
            I32ReinterpretF32 => (F32, I32),
            I64ReinterpretF64 => (F64, I64),
            F32ReinterpretI32 => (I32, F32),
            F64ReinterpretI64 => (I64, F64),
        }
    }
}

/// Load flavours: value type plus access width and extension.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    I32,
    I64,
    F32,
    F64,
    I32_8S,
    I32_8U,
    I32_16S,
    I32_16U,
    I64_8S,
    I64_8U,
    I64_16S,
    I64_16U,
    I64_32S,
    I64_32U,
}

impl LoadKind {
    /// Access width in bytes.
    pub fn width(self) -> u32 {
        match self {
            LoadKind::I32_8S | LoadKind::I32_8U | LoadKind::I64_8S | LoadKind::I64_8U => 1,
            LoadKind::I32_16S | LoadKind::I32_16U | LoadKind::I64_16S | LoadKind::I64_16U => 2,
            LoadKind::I32 | LoadKind::F32 | LoadKind::I64_32S | LoadKind::I64_32U => 4,
            LoadKind::I64 | LoadKind::F64 => 8,
        }
    }

    pub fn result(self) -> ValType {
        match self {
            LoadKind::I32 | LoadKind::I32_8S | LoadKind::I32_8U | LoadKind::I32_16S | LoadKind::I32_16U => {
                ValType::I32
            }
            LoadKind::F32 => ValType::F32,
            LoadKind::F64 => ValType::F64,
            _ => ValType::I64,
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    I32,
    I64,
    F32,
    F64,
    I32_8,
    I32_16,
    I64_8,
    I64_16,
    I64_32,
}

impl StoreKind {
    pub fn width(self) -> u32 {
        match self {
            StoreKind::I32_8 | StoreKind::I64_8 => 1,
            StoreKind::I32_16 | StoreKind::I64_16 => 2,
            StoreKind::I32 | StoreKind::F32 | StoreKind::I64_32 => 4,
            StoreKind::I64 | StoreKind::F64 => 8,
        }
    }

    pub fn operand(self) -> ValType {
        match self {
            StoreKind::I32 | StoreKind::I32_8 | StoreKind::I32_16 => ValType::I32,
            StoreKind::F32 => ValType::F32,
            StoreKind::F64 => ValType::F64,
            StoreKind::I64 | StoreKind::I64_8 | StoreKind::I64_16 | StoreKind::I64_32 => ValType::I64,
        }
    }
}

/// A constant expression: an instruction sequence terminated by `End`.
/// Whether it is actually constant is checked by the validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr(pub Vec<Instr>);

impl ConstExpr {
    /// The single instruction before `End`, for the common one-instruction
    /// initialisers.
    pub fn single(&self) -> Option<&Instr> {
        match self.0.as_slice() {
            [instr, Instr::End] => Some(instr),
            _ => None,
        }
    }
}
