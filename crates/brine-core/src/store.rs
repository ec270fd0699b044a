//! The store: every function, table, memory, global and segment that any
//! instance has allocated.
//!
//! Entities live in flat address spaces owned by the [`Store`]. Instances
//! hold only addresses into them, so an exported table or memory can be
//! imported by another instance and both see the same state. Addresses are
//! never reused; entities live as long as the store.

use std::fmt;
use std::sync::Arc;

use brine_runtime::{LinearMemory, RefSlot, Table, Trap};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::module::Module;
use crate::types::{ExternKind, FuncType, GlobalType, Limits, MemoryType, RefType, TableType, ValType};
use crate::value::Value;

/// Address of a function in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncAddr(pub(crate) u32);

/// Address of a table in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableAddr(pub(crate) u32);

/// Address of a linear memory in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddr(pub(crate) u32);

/// Address of a global in a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalAddr(pub(crate) u32);

/// An exportable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extern {
    Func(FuncAddr),
    Table(TableAddr),
    Memory(MemoryAddr),
    Global(GlobalAddr),
}

impl Extern {
    pub fn kind(&self) -> ExternKind {
        match self {
            Extern::Func(_) => ExternKind::Func,
            Extern::Table(_) => ExternKind::Table,
            Extern::Memory(_) => ExternKind::Memory,
            Extern::Global(_) => ExternKind::Global,
        }
    }
}

impl From<FuncAddr> for Extern {
    fn from(addr: FuncAddr) -> Self {
        Extern::Func(addr)
    }
}

impl From<TableAddr> for Extern {
    fn from(addr: TableAddr) -> Self {
        Extern::Table(addr)
    }
}

impl From<MemoryAddr> for Extern {
    fn from(addr: MemoryAddr) -> Self {
        Extern::Memory(addr)
    }
}

impl From<GlobalAddr> for Extern {
    fn from(addr: GlobalAddr) -> Self {
        Extern::Global(addr)
    }
}

/// Host function callable from Wasm.
///
/// Receives the arguments in parameter order and returns the results. An
/// `Err` aborts the calling invocation with that trap.
pub type HostFunc = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync>;

pub(crate) enum FuncInst {
    Wasm {
        ty: FuncType,
        instance: u32,
        /// Index into the module's code section.
        def: u32,
    },
    Host {
        ty: FuncType,
        func: HostFunc,
    },
}

impl FuncInst {
    pub(crate) fn ty(&self) -> &FuncType {
        match self {
            FuncInst::Wasm { ty, .. } | FuncInst::Host { ty, .. } => ty,
        }
    }
}

impl fmt::Debug for FuncInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuncInst::Wasm { ty, instance, def } => f
                .debug_struct("Wasm")
                .field("ty", ty)
                .field("instance", instance)
                .field("def", def)
                .finish(),
            FuncInst::Host { ty, .. } => f.debug_struct("Host").field("ty", ty).finish_non_exhaustive(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TableInst {
    pub(crate) elem: RefType,
    pub(crate) table: Table,
}

#[derive(Debug)]
pub(crate) struct GlobalInst {
    pub(crate) ty: GlobalType,
    pub(crate) value: Value,
}

/// Element segment contents; emptied by `elem.drop`.
#[derive(Debug)]
pub(crate) struct ElemInst {
    pub(crate) items: Vec<RefSlot>,
}

/// Per-instance index spaces, mapping module indices to store addresses.
#[derive(Debug)]
pub(crate) struct InstanceData {
    pub(crate) module: Arc<Module>,
    pub(crate) funcs: Vec<FuncAddr>,
    pub(crate) tables: Vec<TableAddr>,
    pub(crate) memories: Vec<MemoryAddr>,
    pub(crate) globals: Vec<GlobalAddr>,
    /// Store indices of this instance's element segments.
    pub(crate) elems: Vec<u32>,
    /// Store indices of this instance's data segments.
    pub(crate) datas: Vec<u32>,
    pub(crate) exports: Vec<(String, Extern)>,
}

/// Owner of all runtime state.
#[derive(Debug, Default)]
pub struct Store {
    pub(crate) config: Config,
    pub(crate) funcs: Vec<FuncInst>,
    pub(crate) tables: Vec<TableInst>,
    pub(crate) memories: Vec<LinearMemory>,
    pub(crate) globals: Vec<GlobalInst>,
    pub(crate) elems: Vec<ElemInst>,
    pub(crate) datas: Vec<Vec<u8>>,
    pub(crate) instances: Vec<InstanceData>,
}

/// First address of `count` entities appended after `len` existing ones.
pub(crate) fn reserve(len: usize, count: usize, what: &str) -> Result<u32> {
    len.checked_add(count)
        .and_then(|end| u32::try_from(end).ok())
        .map(|_| len as u32)
        .ok_or_else(|| Error::Exhaustion(format!("too many {what} in store")))
}

impl Store {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Host allocation ───────────────────────────────────────────────

    /// Register a host function of type `ty`.
    pub fn host_func<F>(&mut self, ty: FuncType, func: F) -> Result<FuncAddr>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, Trap> + Send + Sync + 'static,
    {
        let addr = FuncAddr(reserve(self.funcs.len(), 1, "functions")?);
        debug!(addr = addr.0, ty = %ty, "allocated host function");
        self.funcs.push(FuncInst::Host {
            ty,
            func: Arc::new(func),
        });
        Ok(addr)
    }

    /// Create a standalone table with every slot set to `init`.
    pub fn alloc_table(&mut self, ty: TableType, init: Value) -> Result<TableAddr> {
        if init.ty() != ValType::from(ty.elem) {
            return Err(Error::Host(format!(
                "table initialiser {init} does not match element type {}",
                ValType::from(ty.elem)
            )));
        }
        self.check_value(&init)?;
        let table = self.new_table(ty, init.to_slot().unwrap_or(None))?;
        let addr = TableAddr(reserve(self.tables.len(), 1, "tables")?);
        debug!(addr = addr.0, limits = %ty.limits, "allocated table");
        self.tables.push(table);
        Ok(addr)
    }

    /// Build a table under this store's limits without publishing it.
    pub(crate) fn new_table(&self, ty: TableType, init: RefSlot) -> Result<TableInst> {
        let table = Table::try_new(
            ty.limits.min,
            ty.limits.max,
            self.config.max_table_elements,
            init,
        )?;
        Ok(TableInst {
            elem: ty.elem,
            table,
        })
    }

    /// Create a standalone zero-filled memory.
    pub fn alloc_memory(&mut self, ty: MemoryType) -> Result<MemoryAddr> {
        let memory = self.new_memory(ty)?;
        let addr = MemoryAddr(reserve(self.memories.len(), 1, "memories")?);
        debug!(addr = addr.0, limits = %ty.limits, "allocated memory");
        self.memories.push(memory);
        Ok(addr)
    }

    pub(crate) fn new_memory(&self, ty: MemoryType) -> Result<LinearMemory> {
        Ok(LinearMemory::try_new(
            ty.limits.min,
            ty.limits.max,
            self.config.max_memory_pages,
        )?)
    }

    /// Create a standalone global holding `value`.
    pub fn alloc_global(&mut self, ty: GlobalType, value: Value) -> Result<GlobalAddr> {
        if value.ty() != ty.content {
            return Err(Error::Host(format!(
                "global initialiser {value} does not match type {}",
                ty.content
            )));
        }
        self.check_value(&value)?;
        let addr = GlobalAddr(reserve(self.globals.len(), 1, "globals")?);
        self.globals.push(GlobalInst { ty, value });
        Ok(addr)
    }

    // ── Accessors ─────────────────────────────────────────────────────

    /// Reject function references that do not name a function of this
    /// store, such as addresses handed out by another store.
    pub(crate) fn check_value(&self, value: &Value) -> Result<()> {
        match value {
            Value::FuncRef(Some(addr)) if addr.0 as usize >= self.funcs.len() => Err(Error::Host(
                format!("function reference {} does not belong to this store", addr.0),
            )),
            _ => Ok(()),
        }
    }

    pub(crate) fn func_inst(&self, addr: FuncAddr) -> Result<&FuncInst> {
        self.funcs
            .get(addr.0 as usize)
            .ok_or_else(|| Error::Host(format!("unknown function address {}", addr.0)))
    }

    pub(crate) fn table_inst(&self, addr: TableAddr) -> Result<&TableInst> {
        self.tables
            .get(addr.0 as usize)
            .ok_or_else(|| Error::Host(format!("unknown table address {}", addr.0)))
    }

    pub(crate) fn global_inst(&self, addr: GlobalAddr) -> Result<&GlobalInst> {
        self.globals
            .get(addr.0 as usize)
            .ok_or_else(|| Error::Host(format!("unknown global address {}", addr.0)))
    }

    pub fn func_type(&self, addr: FuncAddr) -> Result<&FuncType> {
        Ok(self.func_inst(addr)?.ty())
    }

    /// Current type of a table; `min` is the current size.
    pub fn table_type(&self, addr: TableAddr) -> Result<TableType> {
        let inst = self.table_inst(addr)?;
        Ok(TableType {
            elem: inst.elem,
            limits: Limits {
                min: inst.table.size(),
                max: inst.table.max(),
            },
        })
    }

    pub fn table_size(&self, addr: TableAddr) -> Result<u32> {
        Ok(self.table_inst(addr)?.table.size())
    }

    pub fn table_get(&self, addr: TableAddr, index: u32) -> Result<Value> {
        let inst = self.table_inst(addr)?;
        let slot = inst.table.get(index)?;
        Ok(Value::from_slot(inst.elem, slot))
    }

    pub fn table_set(&mut self, addr: TableAddr, index: u32, value: Value) -> Result<()> {
        let elem = self.table_inst(addr)?.elem;
        if value.ty() != ValType::from(elem) {
            return Err(Error::Host(format!(
                "cannot store {value} in a {} table",
                ValType::from(elem)
            )));
        }
        self.check_value(&value)?;
        let slot = value.to_slot().unwrap_or(None);
        self.tables[addr.0 as usize].table.set(index, slot)?;
        Ok(())
    }

    /// Current type of a memory; `min` is the current page count.
    pub fn memory_type(&self, addr: MemoryAddr) -> Result<MemoryType> {
        let memory = self.memory(addr)?;
        Ok(MemoryType {
            limits: Limits {
                min: memory.page_count(),
                max: memory.max_pages(),
            },
        })
    }

    pub fn memory(&self, addr: MemoryAddr) -> Result<&LinearMemory> {
        self.memories
            .get(addr.0 as usize)
            .ok_or_else(|| Error::Host(format!("unknown memory address {}", addr.0)))
    }

    pub fn memory_mut(&mut self, addr: MemoryAddr) -> Result<&mut LinearMemory> {
        self.memories
            .get_mut(addr.0 as usize)
            .ok_or_else(|| Error::Host(format!("unknown memory address {}", addr.0)))
    }

    pub fn global_type(&self, addr: GlobalAddr) -> Result<GlobalType> {
        Ok(self.global_inst(addr)?.ty)
    }

    pub fn global_get(&self, addr: GlobalAddr) -> Result<Value> {
        Ok(self.global_inst(addr)?.value)
    }

    /// Overwrite a mutable global from the host.
    pub fn global_set(&mut self, addr: GlobalAddr, value: Value) -> Result<()> {
        let ty = self.global_inst(addr)?.ty;
        if !ty.mutable {
            return Err(Error::Host("cannot set an immutable global".into()));
        }
        if value.ty() != ty.content {
            return Err(Error::Host(format!(
                "cannot store {value} in a global of type {}",
                ty.content
            )));
        }
        self.check_value(&value)?;
        self.globals[addr.0 as usize].value = value;
        Ok(())
    }

    // ── Invocation ────────────────────────────────────────────────────

    /// Call the function at `addr` with `args`.
    ///
    /// Arguments are checked against the function type. A trap aborts the
    /// call; side effects already made on memories, tables and globals
    /// persist.
    pub fn invoke(&mut self, addr: FuncAddr, args: &[Value]) -> Result<Vec<Value>> {
        let ty = self.func_inst(addr)?.ty();
        let arg_types: Vec<_> = args.iter().map(Value::ty).collect();
        if arg_types != ty.params {
            return Err(Error::Host(format!(
                "argument mismatch: function expects {ty}, got {arg_types:?}"
            )));
        }
        for arg in args {
            self.check_value(arg)?;
        }
        crate::exec::invoke(self, addr, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(min: u32, max: Option<u32>) -> Limits {
        Limits { min, max }
    }

    #[test]
    fn host_func_is_invocable() {
        let mut store = Store::default();
        let ty = FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
        let add = store
            .host_func(ty, |args| match args {
                [Value::I32(a), Value::I32(b)] => Ok(vec![Value::I32(a.wrapping_add(*b))]),
                _ => Err(Trap::HostFailure),
            })
            .unwrap();
        let out = store.invoke(add, &[Value::I32(2), Value::I32(40)]).unwrap();
        assert_eq!(out, vec![Value::I32(42)]);
    }

    #[test]
    fn invoke_rejects_wrong_arguments() {
        let mut store = Store::default();
        let f = store
            .host_func(FuncType::new([ValType::I64], []), |_| Ok(vec![]))
            .unwrap();
        let err = store.invoke(f, &[Value::I32(1)]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Host);
    }

    #[test]
    fn standalone_table_reports_current_type() {
        let mut store = Store::default();
        let ty = TableType {
            elem: RefType::Extern,
            limits: limits(2, Some(4)),
        };
        let t = store.alloc_table(ty, Value::ExternRef(Some(9))).unwrap();
        assert_eq!(store.table_get(t, 1).unwrap(), Value::ExternRef(Some(9)));
        assert_eq!(store.table_type(t).unwrap(), ty);
        assert!(store.table_get(t, 2).is_err());
        assert!(store.table_set(t, 0, Value::I32(0)).is_err());
    }

    #[test]
    fn oversized_memory_is_exhaustion() {
        let mut store = Store::new(Config {
            max_memory_pages: 4,
            ..Config::default()
        });
        let err = store
            .alloc_memory(MemoryType {
                limits: limits(5, None),
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Exhaustion);
    }

    #[test]
    fn immutable_globals_reject_host_writes() {
        let mut store = Store::default();
        let ty = GlobalType {
            content: ValType::I32,
            mutable: false,
        };
        let g = store.alloc_global(ty, Value::I32(666)).unwrap();
        assert!(store.global_set(g, Value::I32(1)).is_err());
        assert_eq!(store.global_get(g).unwrap(), Value::I32(666));

        let m = store
            .alloc_global(GlobalType { mutable: true, ..ty }, Value::I32(0))
            .unwrap();
        store.global_set(m, Value::I32(5)).unwrap();
        assert_eq!(store.global_get(m).unwrap(), Value::I32(5));
        assert!(store.global_set(m, Value::I64(5)).is_err());
    }
}
