//! Module validator.
//!
//! Checks everything that needs the type context: index spaces, limits,
//! constant expressions, exports, the start function and every function
//! body. A module that passes is safe to instantiate and run without
//! further type checks.

mod func;

use std::collections::HashSet;

use tracing::debug;

use crate::error::ValidationError;
use crate::instr::{ConstExpr, Instr};
use crate::module::{DataMode, ElemMode, ImportDesc, Module};
use crate::types::{ExternKind, FuncType, GlobalType, Limits, MemoryType, RefType, TableType, ValType};
use func::FuncValidator;

pub type Result<T> = std::result::Result<T, ValidationError>;

pub(crate) fn err(message: impl Into<String>) -> ValidationError {
    ValidationError::new(message)
}

/// Index spaces of the module under validation.
pub(crate) struct Context<'m> {
    types: &'m [FuncType],
    /// Type index of every function, imports first.
    funcs: Vec<u32>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    globals: Vec<GlobalType>,
    num_imported_globals: u32,
    elems: Vec<RefType>,
    data_count: Option<u32>,
    /// Functions that may be named by `ref.func` inside function bodies.
    refs: HashSet<u32>,
}

impl<'m> Context<'m> {
    fn new(module: &'m Module) -> Self {
        Self {
            types: &module.types,
            funcs: module.func_type_indices(),
            tables: module.all_tables(),
            memories: module.all_memories(),
            globals: module.all_globals(),
            num_imported_globals: module.num_imported_globals(),
            elems: module.elems.iter().map(|e| e.ty).collect(),
            data_count: module.data_count,
            refs: declared_refs(module),
        }
    }

    pub fn func_type(&self, index: u32) -> Result<&'m FuncType> {
        self.types
            .get(index as usize)
            .ok_or_else(|| err(format!("unknown type {index}")))
    }

    pub fn func(&self, index: u32) -> Result<&'m FuncType> {
        let ty = self
            .funcs
            .get(index as usize)
            .ok_or_else(|| err(format!("unknown function {index}")))?;
        self.func_type(*ty)
    }

    pub fn table(&self, index: u32) -> Result<&TableType> {
        self.tables
            .get(index as usize)
            .ok_or_else(|| err(format!("unknown table {index}")))
    }

    pub fn memory(&self, index: u32) -> Result<&MemoryType> {
        self.memories
            .get(index as usize)
            .ok_or_else(|| err(format!("unknown memory {index}")))
    }

    pub fn global(&self, index: u32) -> Result<&GlobalType> {
        self.globals
            .get(index as usize)
            .ok_or_else(|| err(format!("unknown global {index}")))
    }

    pub fn elem(&self, index: u32) -> Result<RefType> {
        self.elems
            .get(index as usize)
            .copied()
            .ok_or_else(|| err(format!("unknown elem segment {index}")))
    }

    pub fn data(&self, index: u32) -> Result<()> {
        match self.data_count {
            Some(count) if index < count => Ok(()),
            _ => Err(err(format!("unknown data segment {index}"))),
        }
    }

    /// Type-check a constant expression producing a single `expected`.
    fn const_expr(&self, expr: &ConstExpr, expected: ValType) -> Result<()> {
        let mut stack = Vec::new();
        for instr in &expr.0 {
            let ty = match instr {
                Instr::I32Const(_) => ValType::I32,
                Instr::I64Const(_) => ValType::I64,
                Instr::F32Const(_) => ValType::F32,
                Instr::F64Const(_) => ValType::F64,
                Instr::RefNull(t) => (*t).into(),
                Instr::RefFunc(f) => {
                    self.func(*f)?;
                    ValType::FuncRef
                }
                Instr::GlobalGet(g) => {
                    if *g >= self.num_imported_globals {
                        return Err(err(format!("unknown global {g}")));
                    }
                    let global = self.global(*g)?;
                    if global.mutable {
                        return Err(err("constant expression required"));
                    }
                    global.content
                }
                Instr::End => break,
                _ => return Err(err("constant expression required")),
            };
            stack.push(ty);
        }
        if stack != [expected] {
            return Err(err(format!(
                "type mismatch: constant expression must produce {expected}"
            )));
        }
        Ok(())
    }
}

/// Functions referenced outside function bodies: element items, exports
/// and global initialisers.
fn declared_refs(module: &Module) -> HashSet<u32> {
    let exprs = module
        .elems
        .iter()
        .flat_map(|e| e.items.iter())
        .chain(module.globals.iter().map(|g| &g.init));
    let mut refs: HashSet<u32> = exprs
        .flat_map(|e| e.0.iter())
        .filter_map(|i| match i {
            Instr::RefFunc(f) => Some(*f),
            _ => None,
        })
        .collect();
    refs.extend(
        module
            .exports
            .iter()
            .filter(|e| e.kind == ExternKind::Func)
            .map(|e| e.index),
    );
    refs
}

fn check_table_limits(limits: &Limits) -> Result<()> {
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(err("size minimum must not be greater than maximum"));
        }
    }
    Ok(())
}

fn check_memory_limits(limits: &Limits) -> Result<()> {
    let pages = brine_runtime::MAX_PAGES;
    if limits.min > pages || limits.max.is_some_and(|m| m > pages) {
        return Err(err("memory size must be at most 65536 pages (4GiB)"));
    }
    check_table_limits(limits)
}

/// Validate a decoded module.
pub fn validate(module: &Module) -> Result<()> {
    let ctx = Context::new(module);

    for import in &module.imports {
        match &import.desc {
            ImportDesc::Func(ty) => {
                ctx.func_type(*ty)?;
            }
            ImportDesc::Table(t) => check_table_limits(&t.limits)?,
            ImportDesc::Memory(m) => check_memory_limits(&m.limits)?,
            ImportDesc::Global(_) => {}
        }
    }
    for ty in &module.funcs {
        ctx.func_type(*ty)?;
    }
    for table in &module.tables {
        check_table_limits(&table.limits)?;
    }
    for memory in &module.memories {
        check_memory_limits(&memory.limits)?;
    }
    if ctx.memories.len() > 1 {
        return Err(err("multiple memories"));
    }

    for global in &module.globals {
        ctx.const_expr(&global.init, global.ty.content)?;
    }

    for seg in &module.elems {
        for item in &seg.items {
            ctx.const_expr(item, seg.ty.into())?;
        }
        if let ElemMode::Active { table, offset } = &seg.mode {
            if ctx.table(*table)?.elem != seg.ty {
                return Err(err("type mismatch: element segment does not match table type"));
            }
            ctx.const_expr(offset, ValType::I32)?;
        }
    }

    for seg in &module.datas {
        if let DataMode::Active { memory, offset } = &seg.mode {
            ctx.memory(*memory)?;
            ctx.const_expr(offset, ValType::I32)?;
        }
    }

    if let Some(start) = module.start {
        let ty = ctx.func(start)?;
        if !ty.params.is_empty() || !ty.results.is_empty() {
            return Err(err("start function must have type [] -> []"));
        }
    }

    let mut names = HashSet::new();
    for export in &module.exports {
        if !names.insert(export.name.as_str()) {
            return Err(err("duplicate export name"));
        }
        match export.kind {
            ExternKind::Func => ctx.func(export.index).map(drop)?,
            ExternKind::Table => ctx.table(export.index).map(drop)?,
            ExternKind::Memory => ctx.memory(export.index).map(drop)?,
            ExternKind::Global => ctx.global(export.index).map(drop)?,
        }
    }

    if module.funcs.len() != module.code.len() {
        return Err(err("function and code section have inconsistent lengths"));
    }
    let num_imported = module.num_imported_funcs();
    for (i, (ty, body)) in module.funcs.iter().zip(&module.code).enumerate() {
        let index = num_imported + i as u32;
        let ty = ctx.func_type(*ty)?;
        let locals = ty.params.iter().chain(&body.locals).copied().collect();
        FuncValidator::new(&ctx, ty, locals)
            .validate(&body.instrs)
            .map_err(|e| {
                debug!(func = index, error = %e, "function failed validation");
                e.in_func(index)
            })?;
    }
    Ok(())
}
