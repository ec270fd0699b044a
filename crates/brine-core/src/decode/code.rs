//! Instruction decoding for function bodies and constant expressions.

use crate::binary::{val_type_from_byte, Reader, Result};
use crate::error::DecodeError;
use crate::instr::{
    Convert, FBinop, FRelop, FUnop, IBinop, IRelop, IUnop, Instr, LoadKind, MemArg, StoreKind,
};
use crate::module::FuncBody;
use crate::types::BlockType;

/// Upper bound on declared locals per function.
pub const MAX_LOCALS: u64 = 50_000;

/// An open structured instruction awaiting its `end`.
enum Open {
    Block(usize),
    Loop,
    If(usize),
    /// The `else` of the `if` at `if_at`.
    Else { if_at: usize, else_at: usize },
}

/// Decodes an instruction sequence up to and including the `end` that
/// closes the outermost level, patching block targets as it goes.
pub(crate) struct ExprDecoder {
    has_data_count: bool,
}

impl ExprDecoder {
    pub fn new(has_data_count: bool) -> Self {
        Self { has_data_count }
    }

    pub fn read_expr(&self, r: &mut Reader<'_>) -> Result<Vec<Instr>> {
        let mut instrs = Vec::new();
        let mut open: Vec<Open> = Vec::new();
        loop {
            let offset = r.offset();
            let opcode = r.read_u8()?;
            let at = instrs.len();
            let target = at as u32;
            let instr = match opcode {
                0x02 => {
                    open.push(Open::Block(at));
                    Instr::Block {
                        ty: read_block_type(r)?,
                        end: 0,
                    }
                }
                0x03 => {
                    open.push(Open::Loop);
                    Instr::Loop {
                        ty: read_block_type(r)?,
                    }
                }
                0x04 => {
                    open.push(Open::If(at));
                    Instr::If {
                        ty: read_block_type(r)?,
                        else_: None,
                        end: 0,
                    }
                }
                0x05 => {
                    let Some(Open::If(if_at)) = open.pop() else {
                        return Err(DecodeError::new("else without matching if", offset));
                    };
                    if let Some(Instr::If { else_, .. }) = instrs.get_mut(if_at) {
                        *else_ = Some(target);
                    }
                    open.push(Open::Else {
                        if_at,
                        else_at: at,
                    });
                    Instr::Else { end: 0 }
                }
                0x0b => {
                    match open.pop() {
                        None => {
                            instrs.push(Instr::End);
                            return Ok(instrs);
                        }
                        Some(Open::Loop) => {}
                        Some(Open::Block(start)) | Some(Open::If(start)) => {
                            patch_end(&mut instrs, start, target);
                        }
                        Some(Open::Else { if_at, else_at }) => {
                            patch_end(&mut instrs, if_at, target);
                            patch_end(&mut instrs, else_at, target);
                        }
                    }
                    Instr::End
                }
                _ => self.read_plain(r, opcode, offset)?,
            };
            instrs.push(instr);
        }
    }

    /// Every instruction other than structured control.
    fn read_plain(&self, r: &mut Reader<'_>, opcode: u8, offset: usize) -> Result<Instr> {
        use Instr::*;
        let instr = match opcode {
            0x00 => Unreachable,
            0x01 => Nop,
            0x0c => Br(r.read_var_u32()?),
            0x0d => BrIf(r.read_var_u32()?),
            0x0e => {
                let targets = r.read_vec(|r| r.read_var_u32())?;
                BrTable {
                    targets: targets.into_boxed_slice(),
                    default: r.read_var_u32()?,
                }
            }
            0x0f => Return,
            0x10 => Call(r.read_var_u32()?),
            0x11 => {
                let type_index = r.read_var_u32()?;
                let table = r.read_var_u32()?;
                CallIndirect { type_index, table }
            }

            0x1a => Drop,
            0x1b => Select,
            0x1c => SelectTyped(r.read_vec(|r| r.read_val_type())?.into_boxed_slice()),

            0x20 => LocalGet(r.read_var_u32()?),
            0x21 => LocalSet(r.read_var_u32()?),
            0x22 => LocalTee(r.read_var_u32()?),
            0x23 => GlobalGet(r.read_var_u32()?),
            0x24 => GlobalSet(r.read_var_u32()?),
            0x25 => TableGet(r.read_var_u32()?),
            0x26 => TableSet(r.read_var_u32()?),

            0x28..=0x35 => {
                let kind = match opcode {
                    0x28 => LoadKind::I32,
                    0x29 => LoadKind::I64,
                    0x2a => LoadKind::F32,
                    0x2b => LoadKind::F64,
                    0x2c => LoadKind::I32_8S,
                    0x2d => LoadKind::I32_8U,
                    0x2e => LoadKind::I32_16S,
                    0x2f => LoadKind::I32_16U,
                    0x30 => LoadKind::I64_8S,
                    0x31 => LoadKind::I64_8U,
                    0x32 => LoadKind::I64_16S,
                    0x33 => LoadKind::I64_16U,
                    0x34 => LoadKind::I64_32S,
                    _ => LoadKind::I64_32U,
                };
                Load(kind, read_memarg(r)?)
            }
            0x36..=0x3e => {
                let kind = match opcode {
                    0x36 => StoreKind::I32,
                    0x37 => StoreKind::I64,
                    0x38 => StoreKind::F32,
                    0x39 => StoreKind::F64,
                    0x3a => StoreKind::I32_8,
                    0x3b => StoreKind::I32_16,
                    0x3c => StoreKind::I64_8,
                    0x3d => StoreKind::I64_16,
                    _ => StoreKind::I64_32,
                };
                Store(kind, read_memarg(r)?)
            }
            0x3f => {
                zero_byte(r)?;
                MemorySize
            }
            0x40 => {
                zero_byte(r)?;
                MemoryGrow
            }

            0x41 => I32Const(r.read_var_i32()?),
            0x42 => I64Const(r.read_var_i64()?),
            0x43 => F32Const(r.read_u32_le()?),
            0x44 => F64Const(r.read_u64_le()?),

            0x45 => I32Eqz,
            0x46..=0x4f => I32Relop(irelop(opcode - 0x46)),
            0x50 => I64Eqz,
            0x51..=0x5a => I64Relop(irelop(opcode - 0x51)),
            0x5b..=0x60 => F32Relop(frelop(opcode - 0x5b)),
            0x61..=0x66 => F64Relop(frelop(opcode - 0x61)),

            0x67..=0x69 => I32Unop(iunop(opcode - 0x67)),
            0x6a..=0x78 => I32Binop(ibinop(opcode - 0x6a)),
            0x79..=0x7b => I64Unop(iunop(opcode - 0x79)),
            0x7c..=0x8a => I64Binop(ibinop(opcode - 0x7c)),
            0x8b..=0x91 => F32Unop(funop(opcode - 0x8b)),
            0x92..=0x98 => F32Binop(fbinop(opcode - 0x92)),
            0x99..=0x9f => F64Unop(funop(opcode - 0x99)),
            0xa0..=0xa6 => F64Binop(fbinop(opcode - 0xa0)),

            0xa7..=0xbf => Convert(convert(opcode)),

            0xc0 => I32Unop(IUnop::Extend8S),
            0xc1 => I32Unop(IUnop::Extend16S),
            0xc2 => I64Unop(IUnop::Extend8S),
            0xc3 => I64Unop(IUnop::Extend16S),
            0xc4 => I64Unop(IUnop::Extend32S),

            0xd0 => RefNull(r.read_ref_type()?),
            0xd1 => RefIsNull,
            0xd2 => RefFunc(r.read_var_u32()?),

            0xfc => self.read_prefixed(r)?,

            _ => {
                return Err(DecodeError::new(
                    format!("illegal opcode 0x{opcode:02x}"),
                    offset,
                ))
            }
        };
        Ok(instr)
    }

    /// `0xfc`-prefixed instructions.
    fn read_prefixed(&self, r: &mut Reader<'_>) -> Result<Instr> {
        use Instr::*;
        let offset = r.offset();
        let sub = r.read_var_u32()?;
        let instr = match sub {
            0 => Convert(self::Convert::I32TruncSatF32S),
            1 => Convert(self::Convert::I32TruncSatF32U),
            2 => Convert(self::Convert::I32TruncSatF64S),
            3 => Convert(self::Convert::I32TruncSatF64U),
            4 => Convert(self::Convert::I64TruncSatF32S),
            5 => Convert(self::Convert::I64TruncSatF32U),
            6 => Convert(self::Convert::I64TruncSatF64S),
            7 => Convert(self::Convert::I64TruncSatF64U),
            8 => {
                let data = r.read_var_u32()?;
                self.require_data_count(offset)?;
                zero_byte(r)?;
                MemoryInit(data)
            }
            9 => {
                let data = r.read_var_u32()?;
                self.require_data_count(offset)?;
                DataDrop(data)
            }
            10 => {
                zero_byte(r)?;
                zero_byte(r)?;
                MemoryCopy
            }
            11 => {
                zero_byte(r)?;
                MemoryFill
            }
            12 => {
                let elem = r.read_var_u32()?;
                let table = r.read_var_u32()?;
                TableInit { elem, table }
            }
            13 => ElemDrop(r.read_var_u32()?),
            14 => {
                let dst = r.read_var_u32()?;
                let src = r.read_var_u32()?;
                TableCopy { dst, src }
            }
            15 => TableGrow(r.read_var_u32()?),
            16 => TableSize(r.read_var_u32()?),
            17 => TableFill(r.read_var_u32()?),
            _ => {
                return Err(DecodeError::new(
                    format!("illegal opcode 0xfc 0x{sub:x}"),
                    offset,
                ))
            }
        };
        Ok(instr)
    }

    fn require_data_count(&self, offset: usize) -> Result<()> {
        if self.has_data_count {
            Ok(())
        } else {
            Err(DecodeError::new("data count section required", offset))
        }
    }
}

/// Decode one entry of the code section (the size prefix already consumed).
pub(crate) fn read_func_body(r: &mut Reader<'_>, has_data_count: bool) -> Result<FuncBody> {
    let groups = r.read_vec(|r| Ok((r.read_var_u32()?, r.read_val_type()?)))?;
    let total: u64 = groups.iter().map(|(n, _)| *n as u64).sum();
    if total > MAX_LOCALS {
        return Err(r.error("too many locals"));
    }
    let locals = groups
        .into_iter()
        .flat_map(|(n, ty)| std::iter::repeat(ty).take(n as usize))
        .collect();
    let instrs = ExprDecoder::new(has_data_count).read_expr(r)?;
    if !r.is_empty() {
        return Err(r.error("section size mismatch: bytes after function end"));
    }
    Ok(FuncBody { locals, instrs })
}

fn patch_end(instrs: &mut [Instr], at: usize, end: u32) {
    match instrs.get_mut(at) {
        Some(Instr::Block { end: e, .. })
        | Some(Instr::If { end: e, .. })
        | Some(Instr::Else { end: e }) => *e = end,
        _ => {}
    }
}

fn read_block_type(r: &mut Reader<'_>) -> Result<BlockType> {
    let byte = r.peek_u8()?;
    if byte == 0x40 {
        r.read_u8()?;
        return Ok(BlockType::Empty);
    }
    if let Some(ty) = val_type_from_byte(byte) {
        r.read_u8()?;
        return Ok(BlockType::Value(ty));
    }
    let offset = r.offset();
    let index = r.read_var_s33()?;
    u32::try_from(index)
        .map(BlockType::Func)
        .map_err(|_| DecodeError::new("malformed block type", offset))
}

fn read_memarg(r: &mut Reader<'_>) -> Result<MemArg> {
    let align = r.read_var_u32()?;
    let offset = r.read_var_u32()?;
    Ok(MemArg { align, offset })
}

/// Reserved immediate of the memory instructions.
fn zero_byte(r: &mut Reader<'_>) -> Result<()> {
    let offset = r.offset();
    match r.read_u8()? {
        0 => Ok(()),
        _ => Err(DecodeError::new("zero byte expected", offset)),
    }
}

fn irelop(n: u8) -> IRelop {
    use IRelop::*;
    [Eq, Ne, LtS, LtU, GtS, GtU, LeS, LeU, GeS, GeU][n as usize]
}

fn frelop(n: u8) -> FRelop {
    use FRelop::*;
    [Eq, Ne, Lt, Gt, Le, Ge][n as usize]
}

fn iunop(n: u8) -> IUnop {
    use IUnop::*;
    [Clz, Ctz, Popcnt][n as usize]
}

fn ibinop(n: u8) -> IBinop {
    use IBinop::*;
    [
        Add, Sub, Mul, DivS, DivU, RemS, RemU, And, Or, Xor, Shl, ShrS, ShrU, Rotl, Rotr,
    ][n as usize]
}

fn funop(n: u8) -> FUnop {
    use FUnop::*;
    [Abs, Neg, Ceil, Floor, Trunc, Nearest, Sqrt][n as usize]
}

fn fbinop(n: u8) -> FBinop {
    use FBinop::*;
    [Add, Sub, Mul, Div, Min, Max, Copysign][n as usize]
}

fn convert(opcode: u8) -> Convert {
    use Convert::*;
    const TABLE: [Convert; 25] = [
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
    ];
    TABLE[(opcode - 0xa7) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(bytes: &[u8]) -> Result<Vec<Instr>> {
        ExprDecoder::new(true).read_expr(&mut Reader::new(bytes))
    }

    #[test]
    fn block_targets_are_resolved() {
        // block (result i32) i32.const 1 end end
        let instrs = expr(&[0x02, 0x7f, 0x41, 0x01, 0x0b, 0x0b]).unwrap();
        assert_eq!(
            instrs,
            vec![
                Instr::Block {
                    ty: BlockType::Value(crate::types::ValType::I32),
                    end: 2
                },
                Instr::I32Const(1),
                Instr::End,
                Instr::End,
            ]
        );
    }

    #[test]
    fn if_else_targets_are_resolved() {
        // i32.const 0 if nop else nop end end
        let instrs = expr(&[0x41, 0x00, 0x04, 0x40, 0x01, 0x05, 0x01, 0x0b, 0x0b]).unwrap();
        assert_eq!(
            instrs[1],
            Instr::If {
                ty: BlockType::Empty,
                else_: Some(3),
                end: 5
            }
        );
        assert_eq!(instrs[3], Instr::Else { end: 5 });
    }

    #[test]
    fn stray_else_is_malformed() {
        let err = expr(&[0x05, 0x0b]).unwrap_err();
        assert_eq!(err.message, "else without matching if");
    }

    #[test]
    fn unterminated_body_is_malformed() {
        let err = expr(&[0x02, 0x40, 0x0b]).unwrap_err();
        assert_eq!(err.message, "unexpected end");
    }

    #[test]
    fn memory_size_reserved_byte_must_be_zero() {
        assert!(expr(&[0x3f, 0x00, 0x1a, 0x0b]).is_ok());
        let err = expr(&[0x3f, 0x01, 0x1a, 0x0b]).unwrap_err();
        assert_eq!(err.message, "zero byte expected");
    }

    #[test]
    fn memory_init_requires_data_count() {
        let bytes = [0x41, 0, 0x41, 0, 0x41, 0, 0xfc, 0x08, 0x00, 0x00, 0x0b];
        assert!(ExprDecoder::new(true)
            .read_expr(&mut Reader::new(&bytes))
            .is_ok());
        let err = ExprDecoder::new(false)
            .read_expr(&mut Reader::new(&bytes))
            .unwrap_err();
        assert_eq!(err.message, "data count section required");
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let err = expr(&[0x06, 0x0b]).unwrap_err();
        assert_eq!(err.message, "illegal opcode 0x06");
    }

    #[test]
    fn too_many_locals() {
        // two groups of 0xffff_ffff i64 locals
        let bytes = [
            0x02, 0xff, 0xff, 0xff, 0xff, 0x0f, 0x7e, 0xff, 0xff, 0xff, 0xff, 0x0f, 0x7e, 0x0b,
        ];
        let err = read_func_body(&mut Reader::new(&bytes), false).unwrap_err();
        assert_eq!(err.message, "too many locals");
    }

    #[test]
    fn opcode_tables_line_up() {
        assert_eq!(convert(0xa7), Convert::I32WrapI64);
        assert_eq!(convert(0xbf), Convert::F64ReinterpretI64);
        assert_eq!(ibinop(0x78 - 0x6a), IBinop::Rotr);
        assert_eq!(irelop(0x4f - 0x46), IRelop::GeU);
        assert_eq!(funop(0x91 - 0x8b), FUnop::Sqrt);
        assert_eq!(fbinop(0x98 - 0x92), FBinop::Copysign);
    }
}
