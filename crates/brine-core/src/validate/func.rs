//! Function body type checking.
//!
//! Classic operand-stack / control-stack algorithm. An operand of `None`
//! is the *unknown* type that appears once a frame becomes unreachable; it
//! matches any expected type.

use super::{err, Context, Result};
use crate::instr::{Instr, MemArg};
use crate::types::{BlockType, FuncType, RefType, ValType};

type Operand = Option<ValType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    start: Vec<ValType>,
    end: Vec<ValType>,
    height: usize,
    unreachable: bool,
}

impl Frame {
    /// Types a branch to this frame carries.
    fn label_types(&self) -> &[ValType] {
        if self.kind == FrameKind::Loop {
            &self.start
        } else {
            &self.end
        }
    }
}

pub(crate) struct FuncValidator<'c> {
    ctx: &'c Context<'c>,
    locals: Vec<ValType>,
    operands: Vec<Operand>,
    frames: Vec<Frame>,
}

impl<'c> FuncValidator<'c> {
    /// `locals` covers parameters followed by declared locals.
    pub fn new(ctx: &'c Context<'c>, ty: &FuncType, locals: Vec<ValType>) -> Self {
        let mut v = Self {
            ctx,
            locals,
            operands: Vec::new(),
            frames: Vec::new(),
        };
        v.push_frame(FrameKind::Func, Vec::new(), ty.results.clone());
        v
    }

    pub fn validate(mut self, instrs: &[Instr]) -> Result<()> {
        check_targets(instrs)?;
        for instr in instrs {
            if self.frames.is_empty() {
                return Err(err("operators remaining after end of function"));
            }
            self.instr(instr)?;
        }
        if !self.frames.is_empty() {
            return Err(err("function body must end with end"));
        }
        Ok(())
    }

    // ── Operand stack ─────────────────────────────────────────────────

    fn push(&mut self, ty: ValType) {
        self.operands.push(Some(ty));
    }

    fn push_operand(&mut self, op: Operand) {
        self.operands.push(op);
    }

    fn push_all(&mut self, tys: &[ValType]) {
        self.operands.extend(tys.iter().copied().map(Some));
    }

    fn pop(&mut self) -> Result<Operand> {
        let frame = self.current();
        if self.operands.len() == frame.height {
            if frame.unreachable {
                return Ok(None);
            }
            return Err(err("type mismatch: operand stack underflow"));
        }
        Ok(self.operands.pop().flatten())
    }

    fn pop_expect(&mut self, expected: ValType) -> Result<Operand> {
        match self.pop()? {
            Some(actual) if actual != expected => Err(err(format!(
                "type mismatch: expected {expected}, found {actual}"
            ))),
            op => Ok(op),
        }
    }

    fn pop_all(&mut self, tys: &[ValType]) -> Result<Vec<Operand>> {
        let mut popped = Vec::with_capacity(tys.len());
        for ty in tys.iter().rev() {
            popped.push(self.pop_expect(*ty)?);
        }
        popped.reverse();
        Ok(popped)
    }

    // ── Control stack ─────────────────────────────────────────────────

    fn current(&self) -> &Frame {
        // The function frame is only popped by the final `end`, after which
        // `validate` stops feeding instructions.
        &self.frames[self.frames.len() - 1]
    }

    fn push_frame(&mut self, kind: FrameKind, start: Vec<ValType>, end: Vec<ValType>) {
        let height = self.operands.len();
        self.push_all(&start);
        self.frames.push(Frame {
            kind,
            start,
            end,
            height,
            unreachable: false,
        });
    }

    fn pop_frame(&mut self) -> Result<Frame> {
        let end = self.current().end.clone();
        self.pop_all(&end)?;
        if self.operands.len() != self.current().height {
            return Err(err("type mismatch: values remaining on stack at end of block"));
        }
        self.frames
            .pop()
            .ok_or_else(|| err("control frame underflow"))
    }

    fn mark_unreachable(&mut self) {
        let height = self.current().height;
        self.operands.truncate(height);
        if let Some(frame) = self.frames.last_mut() {
            frame.unreachable = true;
        }
    }

    fn label(&self, depth: u32) -> Result<&Frame> {
        let depth = depth as usize;
        if depth >= self.frames.len() {
            return Err(err("unknown label"));
        }
        Ok(&self.frames[self.frames.len() - 1 - depth])
    }

    fn label_types(&self, depth: u32) -> Result<Vec<ValType>> {
        Ok(self.label(depth)?.label_types().to_vec())
    }

    fn block_type(&self, ty: BlockType) -> Result<(Vec<ValType>, Vec<ValType>)> {
        match ty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Value(t) => Ok((Vec::new(), vec![t])),
            BlockType::Func(index) => {
                let ty = self.ctx.func_type(index)?;
                Ok((ty.params.clone(), ty.results.clone()))
            }
        }
    }

    // ── Instructions ──────────────────────────────────────────────────

    fn instr(&mut self, instr: &Instr) -> Result<()> {
        use ValType::{F32, F64, I32, I64};
        match instr {
            Instr::Unreachable => self.mark_unreachable(),
            Instr::Nop => {}
            Instr::Block { ty, .. } => {
                let (params, results) = self.block_type(*ty)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::Block, params, results);
            }
            Instr::Loop { ty } => {
                let (params, results) = self.block_type(*ty)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::Loop, params, results);
            }
            Instr::If { ty, .. } => {
                let (params, results) = self.block_type(*ty)?;
                self.pop_expect(I32)?;
                self.pop_all(&params)?;
                self.push_frame(FrameKind::If, params, results);
            }
            Instr::Else { .. } => {
                if self.current().kind != FrameKind::If {
                    return Err(err("else found outside of an if block"));
                }
                let frame = self.pop_frame()?;
                self.push_frame(FrameKind::Else, frame.start, frame.end);
            }
            Instr::End => {
                let frame = self.pop_frame()?;
                if frame.kind == FrameKind::If && frame.start != frame.end {
                    return Err(err("type mismatch: if without else must not change the stack"));
                }
                if !self.frames.is_empty() {
                    self.push_all(&frame.end);
                }
            }
            Instr::Br(depth) => {
                let tys = self.label_types(*depth)?;
                self.pop_all(&tys)?;
                self.mark_unreachable();
            }
            Instr::BrIf(depth) => {
                self.pop_expect(I32)?;
                let tys = self.label_types(*depth)?;
                self.pop_all(&tys)?;
                self.push_all(&tys);
            }
            Instr::BrTable { targets, default } => {
                self.pop_expect(I32)?;
                let default_tys = self.label_types(*default)?;
                for depth in targets.iter() {
                    let tys = self.label_types(*depth)?;
                    if tys.len() != default_tys.len() {
                        return Err(err("type mismatch: br_table targets differ in arity"));
                    }
                    let popped = self.pop_all(&tys)?;
                    for op in popped {
                        self.push_operand(op);
                    }
                }
                self.pop_all(&default_tys)?;
                self.mark_unreachable();
            }
            Instr::Return => {
                let results = self.frames[0].end.clone();
                self.pop_all(&results)?;
                self.mark_unreachable();
            }
            Instr::Call(func) => {
                let ty = self.ctx.func(*func)?.clone();
                self.pop_all(&ty.params)?;
                self.push_all(&ty.results);
            }
            Instr::CallIndirect { type_index, table } => {
                if self.ctx.table(*table)?.elem != RefType::Func {
                    return Err(err("type mismatch: call_indirect requires a funcref table"));
                }
                let ty = self.ctx.func_type(*type_index)?.clone();
                self.pop_expect(I32)?;
                self.pop_all(&ty.params)?;
                self.push_all(&ty.results);
            }

            Instr::Drop => {
                self.pop()?;
            }
            Instr::Select => {
                self.pop_expect(I32)?;
                let t1 = self.pop()?;
                let t2 = self.pop()?;
                let is_num = |t: Operand| t.map_or(true, ValType::is_num);
                if !is_num(t1) || !is_num(t2) {
                    return Err(err("type mismatch: select without type requires numeric operands"));
                }
                if let (Some(a), Some(b)) = (t1, t2) {
                    if a != b {
                        return Err(err("type mismatch: select operands differ"));
                    }
                }
                self.push_operand(t1.or(t2));
            }
            Instr::SelectTyped(tys) => {
                let [ty] = &tys[..] else {
                    return Err(err("invalid result arity"));
                };
                self.pop_expect(I32)?;
                self.pop_expect(*ty)?;
                self.pop_expect(*ty)?;
                self.push(*ty);
            }

            Instr::LocalGet(index) => {
                let ty = self.local(*index)?;
                self.push(ty);
            }
            Instr::LocalSet(index) => {
                let ty = self.local(*index)?;
                self.pop_expect(ty)?;
            }
            Instr::LocalTee(index) => {
                let ty = self.local(*index)?;
                self.pop_expect(ty)?;
                self.push(ty);
            }
            Instr::GlobalGet(index) => {
                let ty = self.ctx.global(*index)?.content;
                self.push(ty);
            }
            Instr::GlobalSet(index) => {
                let global = *self.ctx.global(*index)?;
                if !global.mutable {
                    return Err(err("global is immutable"));
                }
                self.pop_expect(global.content)?;
            }

            Instr::TableGet(table) => {
                let elem = self.ctx.table(*table)?.elem.into();
                self.pop_expect(I32)?;
                self.push(elem);
            }
            Instr::TableSet(table) => {
                let elem = self.ctx.table(*table)?.elem.into();
                self.pop_expect(elem)?;
                self.pop_expect(I32)?;
            }
            Instr::TableSize(table) => {
                self.ctx.table(*table)?;
                self.push(I32);
            }
            Instr::TableGrow(table) => {
                let elem = self.ctx.table(*table)?.elem.into();
                self.pop_expect(I32)?;
                self.pop_expect(elem)?;
                self.push(I32);
            }
            Instr::TableFill(table) => {
                let elem = self.ctx.table(*table)?.elem.into();
                self.pop_expect(I32)?;
                self.pop_expect(elem)?;
                self.pop_expect(I32)?;
            }
            Instr::TableCopy { dst, src } => {
                let dst_ty = self.ctx.table(*dst)?.elem;
                let src_ty = self.ctx.table(*src)?.elem;
                if dst_ty != src_ty {
                    return Err(err("type mismatch: table.copy between tables of different types"));
                }
                self.pop_all(&[I32, I32, I32])?;
            }
            Instr::TableInit { elem, table } => {
                let seg_ty = self.ctx.elem(*elem)?;
                let table_ty = self.ctx.table(*table)?.elem;
                if seg_ty != table_ty {
                    return Err(err("type mismatch: table.init element type"));
                }
                self.pop_all(&[I32, I32, I32])?;
            }
            Instr::ElemDrop(elem) => {
                self.ctx.elem(*elem)?;
            }

            Instr::Load(kind, memarg) => {
                self.ctx.memory(0)?;
                check_align(memarg, kind.width())?;
                self.pop_expect(I32)?;
                self.push(kind.result());
            }
            Instr::Store(kind, memarg) => {
                self.ctx.memory(0)?;
                check_align(memarg, kind.width())?;
                self.pop_expect(kind.operand())?;
                self.pop_expect(I32)?;
            }
            Instr::MemorySize => {
                self.ctx.memory(0)?;
                self.push(I32);
            }
            Instr::MemoryGrow => {
                self.ctx.memory(0)?;
                self.pop_expect(I32)?;
                self.push(I32);
            }
            Instr::MemoryInit(data) => {
                self.ctx.memory(0)?;
                self.ctx.data(*data)?;
                self.pop_all(&[I32, I32, I32])?;
            }
            Instr::DataDrop(data) => {
                self.ctx.data(*data)?;
            }
            Instr::MemoryCopy | Instr::MemoryFill => {
                self.ctx.memory(0)?;
                self.pop_all(&[I32, I32, I32])?;
            }

            Instr::I32Const(_) => self.push(I32),
            Instr::I64Const(_) => self.push(I64),
            Instr::F32Const(_) => self.push(F32),
            Instr::F64Const(_) => self.push(F64),
            Instr::I32Eqz => self.test_op(I32)?,
            Instr::I64Eqz => self.test_op(I64)?,
            Instr::I32Unop(_) => self.unary_op(I32)?,
            Instr::I64Unop(_) => self.unary_op(I64)?,
            Instr::F32Unop(_) => self.unary_op(F32)?,
            Instr::F64Unop(_) => self.unary_op(F64)?,
            Instr::I32Binop(_) => self.binary_op(I32)?,
            Instr::I64Binop(_) => self.binary_op(I64)?,
            Instr::F32Binop(_) => self.binary_op(F32)?,
            Instr::F64Binop(_) => self.binary_op(F64)?,
            Instr::I32Relop(_) => self.compare_op(I32)?,
            Instr::I64Relop(_) => self.compare_op(I64)?,
            Instr::F32Relop(_) => self.compare_op(F32)?,
            Instr::F64Relop(_) => self.compare_op(F64)?,
            Instr::Convert(op) => {
                let (from, to) = op.signature();
                self.pop_expect(from)?;
                self.push(to);
            }

            Instr::RefNull(ty) => self.push((*ty).into()),
            Instr::RefIsNull => {
                if let Some(t) = self.pop()? {
                    if !t.is_ref() {
                        return Err(err(format!("type mismatch: expected reference, found {t}")));
                    }
                }
                self.push(I32);
            }
            Instr::RefFunc(func) => {
                self.ctx.func(*func)?;
                if !self.ctx.refs.contains(func) {
                    return Err(err("undeclared function reference"));
                }
                self.push(ValType::FuncRef);
            }
        }
        Ok(())
    }

    fn local(&self, index: u32) -> Result<ValType> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| err(format!("unknown local {index}")))
    }

    fn unary_op(&mut self, ty: ValType) -> Result<()> {
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn binary_op(&mut self, ty: ValType) -> Result<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ty);
        Ok(())
    }

    fn test_op(&mut self, ty: ValType) -> Result<()> {
        self.pop_expect(ty)?;
        self.push(ValType::I32);
        Ok(())
    }

    fn compare_op(&mut self, ty: ValType) -> Result<()> {
        self.pop_expect(ty)?;
        self.pop_expect(ty)?;
        self.push(ValType::I32);
        Ok(())
    }
}

fn check_align(memarg: &MemArg, width: u32) -> Result<()> {
    if memarg.align >= 32 || (1u32 << memarg.align) > width {
        return Err(err("alignment must not be larger than natural"));
    }
    Ok(())
}

/// The executor jumps straight to the `else`/`end` indices stored in
/// structured instructions; each must name its matching delimiter.
fn check_targets(instrs: &[Instr]) -> Result<()> {
    let mismatch = || err("block target does not match its delimiter");
    let mut open: Vec<usize> = Vec::new();
    for (at, instr) in instrs.iter().enumerate() {
        let here = u32::try_from(at).map_err(|_| mismatch())?;
        match instr {
            Instr::Block { .. } | Instr::Loop { .. } | Instr::If { .. } => open.push(at),
            Instr::Else { .. } => match open.last().map(|&i| &instrs[i]) {
                Some(Instr::If { else_: Some(e), .. }) if *e == here => open.push(at),
                _ => return Err(mismatch()),
            },
            Instr::End => {
                let Some(top) = open.pop() else { continue };
                let matched = match &instrs[top] {
                    Instr::Block { end, .. } => *end == here,
                    Instr::Loop { .. } => true,
                    Instr::If { else_: None, end, .. } => *end == here,
                    Instr::Else { end } => {
                        *end == here
                            && matches!(
                                open.pop().map(|i| &instrs[i]),
                                Some(Instr::If { end, .. }) if *end == here
                            )
                    }
                    _ => false,
                };
                if !matched {
                    return Err(mismatch());
                }
            }
            _ => {}
        }
    }
    Ok(())
}
