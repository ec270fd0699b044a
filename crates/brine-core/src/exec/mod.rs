//! The interpreter.
//!
//! A single non-recursive loop drives every Wasm frame of an invocation.
//! Operands and locals share one value stack; each frame's locals start at
//! `locals_base`. Structured control uses a label stack whose entries
//! record the branch arity, the operand height to unwind to, and the
//! continuation index. The matching `else`/`end` indices were resolved by
//! the decoder, so branches never scan bytecode.

mod numeric;

use std::sync::Arc;

use brine_runtime::{RefSlot, Trap};
use tracing::trace;

use crate::error::{Error, Result};
use crate::instr::{Instr, LoadKind, MemArg, StoreKind};
use crate::module::Module;
use crate::store::{FuncAddr, FuncInst, InstanceData, Store};
use crate::types::BlockType;
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
struct Label {
    /// Values carried by a branch to this label.
    arity: usize,
    /// Operand height below the block's parameters.
    height: usize,
    /// Instruction index a branch continues at.
    cont: usize,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    instance: u32,
    def: u32,
    pc: usize,
    locals_base: usize,
    label_base: usize,
    arity: usize,
}

enum Flow {
    Next,
    Jump(usize),
    Call(FuncAddr),
    Return,
}

/// Run `addr` to completion. Arguments must already match its type.
pub(crate) fn invoke(store: &mut Store, addr: FuncAddr, args: &[Value]) -> Result<Vec<Value>> {
    let mut machine = Machine {
        store,
        stack: args.to_vec(),
        labels: Vec::new(),
        frames: Vec::new(),
    };
    machine.call(addr)?;
    machine.run()?;
    Ok(machine.stack)
}

fn corrupt() -> Error {
    Error::Host("operand stack does not match validated types".into())
}

fn block_arity(module: &Module, ty: BlockType) -> (usize, usize) {
    match ty {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::Func(index) => module
            .types
            .get(index as usize)
            .map_or((0, 0), |ty| (ty.params.len(), ty.results.len())),
    }
}

fn effective_address(base: i32, arg: &MemArg) -> u64 {
    base as u32 as u64 + arg.offset as u64
}

struct Machine<'s> {
    store: &'s mut Store,
    stack: Vec<Value>,
    labels: Vec<Label>,
    frames: Vec<Frame>,
}

impl Machine<'_> {
    // ── Operand stack ─────────────────────────────────────────────────

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(corrupt)
    }

    #[inline]
    fn pop_i32(&mut self) -> Result<i32> {
        match self.pop()? {
            Value::I32(v) => Ok(v),
            _ => Err(corrupt()),
        }
    }

    #[inline]
    fn pop_u32(&mut self) -> Result<u32> {
        Ok(self.pop_i32()? as u32)
    }

    #[inline]
    fn pop_i64(&mut self) -> Result<i64> {
        match self.pop()? {
            Value::I64(v) => Ok(v),
            _ => Err(corrupt()),
        }
    }

    #[inline]
    fn pop_f32(&mut self) -> Result<u32> {
        match self.pop()? {
            Value::F32(bits) => Ok(bits),
            _ => Err(corrupt()),
        }
    }

    #[inline]
    fn pop_f64(&mut self) -> Result<u64> {
        match self.pop()? {
            Value::F64(bits) => Ok(bits),
            _ => Err(corrupt()),
        }
    }

    fn pop_slot(&mut self) -> Result<RefSlot> {
        self.pop()?.to_slot().ok_or_else(corrupt)
    }

    // ── Index spaces ──────────────────────────────────────────────────

    fn inst(&self, instance: u32) -> &InstanceData {
        &self.store.instances[instance as usize]
    }

    fn table(&self, instance: u32, index: u32) -> usize {
        self.inst(instance).tables[index as usize].0 as usize
    }

    fn memory(&self, instance: u32) -> usize {
        self.inst(instance).memories[0].0 as usize
    }

    fn global(&self, instance: u32, index: u32) -> usize {
        self.inst(instance).globals[index as usize].0 as usize
    }

    fn elem(&self, instance: u32, index: u32) -> usize {
        self.inst(instance).elems[index as usize] as usize
    }

    fn data(&self, instance: u32, index: u32) -> usize {
        self.inst(instance).datas[index as usize] as usize
    }

    // ── Calls ─────────────────────────────────────────────────────────

    /// Enter `addr`. Host functions run to completion here; Wasm functions
    /// get a frame that `run` picks up.
    fn call(&mut self, addr: FuncAddr) -> Result<()> {
        trace!(func = addr.0, depth = self.frames.len(), "call");
        let (instance, def, params, arity) = match &self.store.funcs[addr.0 as usize] {
            FuncInst::Host { ty, func } => {
                let func = Arc::clone(func);
                let expected = ty.results.clone();
                let split = self.stack.len().saturating_sub(ty.params.len());
                let args = self.stack.split_off(split);
                let results = func(&args)?;
                let well_typed = results.len() == expected.len()
                    && results.iter().zip(&expected).all(|(v, ty)| v.ty() == *ty)
                    && results.iter().all(|v| self.store.check_value(v).is_ok());
                if !well_typed {
                    return Err(Trap::HostFailure.into());
                }
                self.stack.extend(results);
                return Ok(());
            }
            FuncInst::Wasm { ty, instance, def } => {
                (*instance, *def, ty.params.len(), ty.results.len())
            }
        };

        if self.frames.len() >= self.store.config.max_call_depth {
            return Err(Error::Exhaustion("call stack exhausted".into()));
        }
        let module = Arc::clone(&self.inst(instance).module);
        let locals = &module.code[def as usize].locals;
        if self.stack.len() + locals.len() > self.store.config.max_value_stack {
            return Err(Error::Exhaustion("value stack exhausted".into()));
        }
        let locals_base = self.stack.len() - params;
        self.stack
            .extend(locals.iter().map(|ty| Value::default_for(*ty)));
        self.frames.push(Frame {
            instance,
            def,
            pc: 0,
            locals_base,
            label_base: self.labels.len(),
            arity,
        });
        Ok(())
    }

    fn ret(&mut self) {
        if let Some(frame) = self.frames.pop() {
            let keep = self.stack.len() - frame.arity;
            self.stack.drain(frame.locals_base..keep);
            self.labels.truncate(frame.label_base);
        }
    }

    /// Branch to the label `depth` levels out. The outermost label of a
    /// frame is the function body itself, so branching to it returns.
    fn branch(&mut self, frame: &Frame, depth: u32) -> Flow {
        let depth = depth as usize;
        let in_frame = self.labels.len() - frame.label_base;
        if depth >= in_frame {
            return Flow::Return;
        }
        let target = self.labels.len() - 1 - depth;
        let label = self.labels[target];
        self.labels.truncate(target);
        let keep = self.stack.len() - label.arity;
        self.stack.drain(label.height..keep);
        Flow::Jump(label.cont)
    }

    fn run(&mut self) -> Result<()> {
        while let Some(&frame) = self.frames.last() {
            let module = Arc::clone(&self.inst(frame.instance).module);
            let code = &module.code[frame.def as usize].instrs;
            let mut pc = frame.pc;
            loop {
                match self.step(&module, &frame, &code[pc], pc)? {
                    Flow::Next => pc += 1,
                    Flow::Jump(to) => pc = to,
                    Flow::Call(addr) => {
                        if let Some(current) = self.frames.last_mut() {
                            current.pc = pc + 1;
                        }
                        self.call(addr)?;
                        break;
                    }
                    Flow::Return => {
                        self.ret();
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, module: &Module, frame: &Frame, instr: &Instr, pc: usize) -> Result<Flow> {
        let instance = frame.instance;
        match instr {
            // ── Control ──
            Instr::Unreachable => return Err(Trap::Unreachable.into()),
            Instr::Nop => {}
            Instr::Block { ty, end } => {
                let (params, results) = block_arity(module, *ty);
                self.labels.push(Label {
                    arity: results,
                    height: self.stack.len() - params,
                    cont: *end as usize + 1,
                });
            }
            Instr::Loop { ty } => {
                let (params, _) = block_arity(module, *ty);
                self.labels.push(Label {
                    arity: params,
                    height: self.stack.len() - params,
                    cont: pc,
                });
            }
            Instr::If { ty, else_, end } => {
                let cond = self.pop_i32()?;
                let (params, results) = block_arity(module, *ty);
                let label = Label {
                    arity: results,
                    height: self.stack.len() - params,
                    cont: *end as usize + 1,
                };
                if cond != 0 {
                    self.labels.push(label);
                } else if let Some(else_) = else_ {
                    self.labels.push(label);
                    return Ok(Flow::Jump(*else_ as usize + 1));
                } else {
                    return Ok(Flow::Jump(*end as usize + 1));
                }
            }
            // Falling into `else` ends the then-arm; the `end` pops the label.
            Instr::Else { end } => return Ok(Flow::Jump(*end as usize)),
            Instr::End => {
                if self.labels.len() > frame.label_base {
                    self.labels.pop();
                } else {
                    return Ok(Flow::Return);
                }
            }
            Instr::Br(depth) => return Ok(self.branch(frame, *depth)),
            Instr::BrIf(depth) => {
                if self.pop_i32()? != 0 {
                    return Ok(self.branch(frame, *depth));
                }
            }
            Instr::BrTable { targets, default } => {
                let index = self.pop_u32()? as usize;
                let depth = targets.get(index).copied().unwrap_or(*default);
                return Ok(self.branch(frame, depth));
            }
            Instr::Return => return Ok(Flow::Return),
            Instr::Call(index) => {
                return Ok(Flow::Call(self.inst(instance).funcs[*index as usize]));
            }
            Instr::CallIndirect { type_index, table } => {
                let table = self.table(instance, *table);
                let index = self.pop_u32()?;
                let slot = self.store.tables[table]
                    .table
                    .get(index)
                    .map_err(|_| Trap::UndefinedElement)?;
                let callee = FuncAddr(slot.ok_or(Trap::UninitializedElement)?);
                let expected = &module.types[*type_index as usize];
                if self.store.funcs[callee.0 as usize].ty() != expected {
                    return Err(Trap::IndirectCallTypeMismatch.into());
                }
                return Ok(Flow::Call(callee));
            }

            // ── Parametric ──
            Instr::Drop => {
                self.pop()?;
            }
            Instr::Select | Instr::SelectTyped(_) => {
                let cond = self.pop_i32()?;
                let second = self.pop()?;
                let first = self.pop()?;
                self.push(if cond != 0 { first } else { second });
            }

            // ── Variables ──
            Instr::LocalGet(index) => {
                let value = self.stack[frame.locals_base + *index as usize];
                self.push(value);
            }
            Instr::LocalSet(index) => {
                let value = self.pop()?;
                self.stack[frame.locals_base + *index as usize] = value;
            }
            Instr::LocalTee(index) => {
                let value = *self.stack.last().ok_or_else(corrupt)?;
                self.stack[frame.locals_base + *index as usize] = value;
            }
            Instr::GlobalGet(index) => {
                let value = self.store.globals[self.global(instance, *index)].value;
                self.push(value);
            }
            Instr::GlobalSet(index) => {
                let global = self.global(instance, *index);
                let value = self.pop()?;
                self.store.globals[global].value = value;
            }

            // ── Tables ──
            Instr::TableGet(index) => {
                let table = self.table(instance, *index);
                let i = self.pop_u32()?;
                let inst = &self.store.tables[table];
                let value = Value::from_slot(inst.elem, inst.table.get(i)?);
                self.push(value);
            }
            Instr::TableSet(index) => {
                let table = self.table(instance, *index);
                let value = self.pop_slot()?;
                let i = self.pop_u32()?;
                self.store.tables[table].table.set(i, value)?;
            }
            Instr::TableSize(index) => {
                let table = self.table(instance, *index);
                let size = self.store.tables[table].table.size();
                self.push(Value::I32(size as i32));
            }
            Instr::TableGrow(index) => {
                let table = self.table(instance, *index);
                let delta = self.pop_u32()?;
                let init = self.pop_slot()?;
                let old = self.store.tables[table].table.grow(delta, init);
                self.push(Value::I32(old));
            }
            Instr::TableFill(index) => {
                let table = self.table(instance, *index);
                let len = self.pop_u32()?;
                let value = self.pop_slot()?;
                let dst = self.pop_u32()?;
                self.store.tables[table].table.fill(dst, value, len)?;
            }
            Instr::TableCopy { dst, src } => {
                let (dst_table, src_table) = (self.table(instance, *dst), self.table(instance, *src));
                let len = self.pop_u32()?;
                let s = self.pop_u32()?;
                let d = self.pop_u32()?;
                if dst_table == src_table {
                    self.store.tables[dst_table].table.copy_within(d, s, len)?;
                } else {
                    let items = self.store.tables[src_table].table.slice(s, len)?.to_vec();
                    self.store.tables[dst_table].table.init(d, &items, 0, len)?;
                }
            }
            Instr::TableInit { elem, table } => {
                let (elem, table) = (self.elem(instance, *elem), self.table(instance, *table));
                let len = self.pop_u32()?;
                let s = self.pop_u32()?;
                let d = self.pop_u32()?;
                let Store { tables, elems, .. } = &mut *self.store;
                tables[table].table.init(d, &elems[elem].items, s, len)?;
            }
            Instr::ElemDrop(index) => {
                let elem = self.elem(instance, *index);
                self.store.elems[elem].items = Vec::new();
            }

            // ── Memory ──
            Instr::Load(kind, arg) => {
                let memory = self.memory(instance);
                let addr = effective_address(self.pop_i32()?, arg);
                let mem = &self.store.memories[memory];
                let value = match kind {
                    LoadKind::I32 => Value::I32(i32::from_le_bytes(mem.read(addr)?)),
                    LoadKind::I64 => Value::I64(i64::from_le_bytes(mem.read(addr)?)),
                    LoadKind::F32 => Value::F32(u32::from_le_bytes(mem.read(addr)?)),
                    LoadKind::F64 => Value::F64(u64::from_le_bytes(mem.read(addr)?)),
                    LoadKind::I32_8S => Value::I32(i8::from_le_bytes(mem.read(addr)?) as i32),
                    LoadKind::I32_8U => Value::I32(u8::from_le_bytes(mem.read(addr)?) as i32),
                    LoadKind::I32_16S => Value::I32(i16::from_le_bytes(mem.read(addr)?) as i32),
                    LoadKind::I32_16U => Value::I32(u16::from_le_bytes(mem.read(addr)?) as i32),
                    LoadKind::I64_8S => Value::I64(i8::from_le_bytes(mem.read(addr)?) as i64),
                    LoadKind::I64_8U => Value::I64(u8::from_le_bytes(mem.read(addr)?) as i64),
                    LoadKind::I64_16S => Value::I64(i16::from_le_bytes(mem.read(addr)?) as i64),
                    LoadKind::I64_16U => Value::I64(u16::from_le_bytes(mem.read(addr)?) as i64),
                    LoadKind::I64_32S => Value::I64(i32::from_le_bytes(mem.read(addr)?) as i64),
                    LoadKind::I64_32U => Value::I64(u32::from_le_bytes(mem.read(addr)?) as i64),
                };
                self.push(value);
            }
            Instr::Store(kind, arg) => {
                let memory = self.memory(instance);
                let value = self.pop()?;
                let addr = effective_address(self.pop_i32()?, arg);
                let mem = &mut self.store.memories[memory];
                match (kind, value) {
                    (StoreKind::I32, Value::I32(v)) => mem.write(addr, v.to_le_bytes())?,
                    (StoreKind::I64, Value::I64(v)) => mem.write(addr, v.to_le_bytes())?,
                    (StoreKind::F32, Value::F32(bits)) => mem.write(addr, bits.to_le_bytes())?,
                    (StoreKind::F64, Value::F64(bits)) => mem.write(addr, bits.to_le_bytes())?,
                    (StoreKind::I32_8, Value::I32(v)) => mem.write(addr, (v as u8).to_le_bytes())?,
                    (StoreKind::I32_16, Value::I32(v)) => mem.write(addr, (v as u16).to_le_bytes())?,
                    (StoreKind::I64_8, Value::I64(v)) => mem.write(addr, (v as u8).to_le_bytes())?,
                    (StoreKind::I64_16, Value::I64(v)) => mem.write(addr, (v as u16).to_le_bytes())?,
                    (StoreKind::I64_32, Value::I64(v)) => mem.write(addr, (v as u32).to_le_bytes())?,
                    _ => return Err(corrupt()),
                }
            }
            Instr::MemorySize => {
                let memory = self.memory(instance);
                let pages = self.store.memories[memory].page_count();
                self.push(Value::I32(pages as i32));
            }
            Instr::MemoryGrow => {
                let memory = self.memory(instance);
                let delta = self.pop_u32()?;
                let old = self.store.memories[memory].grow(delta);
                self.push(Value::I32(old));
            }
            Instr::MemoryInit(index) => {
                let (memory, data) = (self.memory(instance), self.data(instance, *index));
                let len = self.pop_u32()?;
                let s = self.pop_u32()?;
                let d = self.pop_u32()?;
                let Store { memories, datas, .. } = &mut *self.store;
                memories[memory].init(d, &datas[data], s, len)?;
            }
            Instr::DataDrop(index) => {
                let data = self.data(instance, *index);
                self.store.datas[data] = Vec::new();
            }
            Instr::MemoryCopy => {
                let memory = self.memory(instance);
                let len = self.pop_u32()?;
                let s = self.pop_u32()?;
                let d = self.pop_u32()?;
                self.store.memories[memory].copy_within(d, s, len)?;
            }
            Instr::MemoryFill => {
                let memory = self.memory(instance);
                let len = self.pop_u32()?;
                let value = self.pop_i32()?;
                let d = self.pop_u32()?;
                self.store.memories[memory].fill(d, value as u8, len)?;
            }

            // ── Numeric ──
            Instr::I32Const(v) => self.push(Value::I32(*v)),
            Instr::I64Const(v) => self.push(Value::I64(*v)),
            Instr::F32Const(bits) => self.push(Value::F32(*bits)),
            Instr::F64Const(bits) => self.push(Value::F64(*bits)),
            Instr::I32Eqz => {
                let v = self.pop_i32()?;
                self.push(Value::I32((v == 0) as i32));
            }
            Instr::I64Eqz => {
                let v = self.pop_i64()?;
                self.push(Value::I32((v == 0) as i32));
            }
            Instr::I32Unop(op) => {
                let v = self.pop_i32()?;
                self.push(Value::I32(numeric::i32_unop(*op, v)));
            }
            Instr::I64Unop(op) => {
                let v = self.pop_i64()?;
                self.push(Value::I64(numeric::i64_unop(*op, v)));
            }
            Instr::I32Binop(op) => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                self.push(Value::I32(numeric::i32_binop(*op, a, b)?));
            }
            Instr::I64Binop(op) => {
                let b = self.pop_i64()?;
                let a = self.pop_i64()?;
                self.push(Value::I64(numeric::i64_binop(*op, a, b)?));
            }
            Instr::I32Relop(op) => {
                let b = self.pop_i32()?;
                let a = self.pop_i32()?;
                self.push(Value::I32(numeric::i32_relop(*op, a, b) as i32));
            }
            Instr::I64Relop(op) => {
                let b = self.pop_i64()?;
                let a = self.pop_i64()?;
                self.push(Value::I32(numeric::i64_relop(*op, a, b) as i32));
            }
            Instr::F32Unop(op) => {
                let v = self.pop_f32()?;
                self.push(Value::F32(numeric::f32_unop(*op, v)));
            }
            Instr::F64Unop(op) => {
                let v = self.pop_f64()?;
                self.push(Value::F64(numeric::f64_unop(*op, v)));
            }
            Instr::F32Binop(op) => {
                let b = self.pop_f32()?;
                let a = self.pop_f32()?;
                self.push(Value::F32(numeric::f32_binop(*op, a, b)));
            }
            Instr::F64Binop(op) => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.push(Value::F64(numeric::f64_binop(*op, a, b)));
            }
            Instr::F32Relop(op) => {
                let b = self.pop_f32()?;
                let a = self.pop_f32()?;
                self.push(Value::I32(numeric::f32_relop(*op, a, b) as i32));
            }
            Instr::F64Relop(op) => {
                let b = self.pop_f64()?;
                let a = self.pop_f64()?;
                self.push(Value::I32(numeric::f64_relop(*op, a, b) as i32));
            }
            Instr::Convert(op) => {
                let v = self.pop()?;
                let out = numeric::convert(*op, v).ok_or_else(corrupt)??;
                self.push(out);
            }

            // ── References ──
            Instr::RefNull(ty) => self.push(Value::null(*ty)),
            Instr::RefIsNull => {
                let v = self.pop()?;
                self.push(Value::I32(v.is_null_ref() as i32));
            }
            Instr::RefFunc(index) => {
                let addr = self.inst(instance).funcs[*index as usize];
                self.push(Value::FuncRef(Some(addr)));
            }
        }
        Ok(Flow::Next)
    }
}
