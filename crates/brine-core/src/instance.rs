//! Module instantiation and the [`Instance`] handle.

use std::sync::Arc;

use brine_runtime::RefSlot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::imports::Imports;
use crate::instr::{ConstExpr, Instr};
use crate::module::{DataMode, ElemMode, Module, ValidatedModule};
use crate::store::{
    reserve, ElemInst, Extern, FuncAddr, FuncInst, GlobalAddr, GlobalInst, InstanceData,
    MemoryAddr, Store, TableAddr,
};
use crate::types::ExternKind;
use crate::value::Value;

/// Handle to an instantiated module inside a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance(pub(crate) u32);

impl Instance {
    fn data<'s>(&self, store: &'s Store) -> &'s InstanceData {
        &store.instances[self.0 as usize]
    }

    pub fn module<'s>(&self, store: &'s Store) -> &'s Arc<Module> {
        &self.data(store).module
    }

    pub fn export(&self, store: &Store, name: &str) -> Option<Extern> {
        self.data(store)
            .exports
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, item)| *item)
    }

    /// Exports in declaration order.
    pub fn exports<'s>(&self, store: &'s Store) -> impl Iterator<Item = (&'s str, Extern)> + 's {
        self.data(store)
            .exports
            .iter()
            .map(|(name, item)| (name.as_str(), *item))
    }

    fn missing(name: &str, kind: ExternKind) -> Error {
        Error::Host(format!("unknown {kind} export \"{name}\""))
    }

    pub fn func(&self, store: &Store, name: &str) -> Result<FuncAddr> {
        match self.export(store, name) {
            Some(Extern::Func(addr)) => Ok(addr),
            _ => Err(Self::missing(name, ExternKind::Func)),
        }
    }

    pub fn table(&self, store: &Store, name: &str) -> Result<TableAddr> {
        match self.export(store, name) {
            Some(Extern::Table(addr)) => Ok(addr),
            _ => Err(Self::missing(name, ExternKind::Table)),
        }
    }

    pub fn memory(&self, store: &Store, name: &str) -> Result<MemoryAddr> {
        match self.export(store, name) {
            Some(Extern::Memory(addr)) => Ok(addr),
            _ => Err(Self::missing(name, ExternKind::Memory)),
        }
    }

    pub fn global(&self, store: &Store, name: &str) -> Result<GlobalAddr> {
        match self.export(store, name) {
            Some(Extern::Global(addr)) => Ok(addr),
            _ => Err(Self::missing(name, ExternKind::Global)),
        }
    }

    /// Invoke the exported function `name`.
    pub fn call(&self, store: &mut Store, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let addr = self.func(store, name)?;
        store.invoke(addr, args)
    }

    /// Current value of the exported global `name`.
    pub fn global_value(&self, store: &Store, name: &str) -> Result<Value> {
        store.global_get(self.global(store, name)?)
    }
}

/// Index spaces under construction. Constant expressions are evaluated
/// against these before the instance is published to the store.
struct Spaces<'a> {
    funcs: &'a [FuncAddr],
    globals: &'a [GlobalAddr],
}

impl Spaces<'_> {
    fn eval(&self, store: &Store, expr: &ConstExpr) -> Result<Value> {
        let mut stack = Vec::with_capacity(1);
        for instr in &expr.0 {
            let value = match instr {
                Instr::I32Const(v) => Value::I32(*v),
                Instr::I64Const(v) => Value::I64(*v),
                Instr::F32Const(bits) => Value::F32(*bits),
                Instr::F64Const(bits) => Value::F64(*bits),
                Instr::RefNull(ty) => Value::null(*ty),
                Instr::RefFunc(index) => Value::FuncRef(Some(self.func(*index)?)),
                Instr::GlobalGet(index) => {
                    let addr = self
                        .globals
                        .get(*index as usize)
                        .ok_or_else(|| Error::Host(format!("unknown global {index}")))?;
                    store.global_get(*addr)?
                }
                Instr::End => break,
                other => {
                    return Err(Error::Host(format!(
                        "non-constant instruction {other:?} in initialiser"
                    )))
                }
            };
            stack.push(value);
        }
        stack
            .pop()
            .ok_or_else(|| Error::Host("empty constant expression".into()))
    }

    fn func(&self, index: u32) -> Result<FuncAddr> {
        self.funcs
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::Host(format!("unknown function {index}")))
    }

    fn offset(&self, store: &Store, expr: &ConstExpr) -> Result<u32> {
        match self.eval(store, expr)? {
            Value::I32(v) => Ok(v as u32),
            other => Err(Error::Host(format!("segment offset {other} is not an i32"))),
        }
    }
}

impl Store {
    /// Instantiate a validated module, resolving its imports from `imports`.
    ///
    /// Runs, in order: import resolution, allocation of functions, tables,
    /// memories and globals, active element then data segment
    /// initialisation, and the start function. Nothing is added to the
    /// store until every import and initialiser has been checked. A trap
    /// during segment initialisation or in the start function yields
    /// [`Error::Uninstantiable`]; writes performed before the trap remain
    /// visible through any imported table or memory.
    pub fn instantiate(&mut self, module: &ValidatedModule, imports: &Imports) -> Result<Instance> {
        let resolved = imports.resolve(module, self)?;
        let id = reserve(self.instances.len(), 1, "instances")?;

        let mut funcs = Vec::new();
        let mut tables = Vec::new();
        let mut memories = Vec::new();
        let mut globals = Vec::new();
        for item in resolved {
            match item {
                Extern::Func(addr) => funcs.push(addr),
                Extern::Table(addr) => tables.push(addr),
                Extern::Memory(addr) => memories.push(addr),
                Extern::Global(addr) => globals.push(addr),
            }
        }

        // Defined entities take the next free addresses up front.
        let base = reserve(self.funcs.len(), module.funcs.len(), "functions")?;
        let mut new_funcs = Vec::with_capacity(module.funcs.len());
        for (def, type_index) in module.funcs.iter().enumerate() {
            let ty = module
                .types
                .get(*type_index as usize)
                .cloned()
                .ok_or_else(|| Error::Host(format!("unknown type {type_index}")))?;
            new_funcs.push(FuncInst::Wasm {
                ty,
                instance: id,
                def: def as u32,
            });
            funcs.push(FuncAddr(base + def as u32));
        }
        let base = reserve(self.tables.len(), module.tables.len(), "tables")?;
        let mut new_tables = Vec::with_capacity(module.tables.len());
        for (i, ty) in module.tables.iter().enumerate() {
            new_tables.push(self.new_table(*ty, None)?);
            tables.push(TableAddr(base + i as u32));
        }
        let base = reserve(self.memories.len(), module.memories.len(), "memories")?;
        let mut new_memories = Vec::with_capacity(module.memories.len());
        for (i, ty) in module.memories.iter().enumerate() {
            new_memories.push(self.new_memory(*ty)?);
            memories.push(MemoryAddr(base + i as u32));
        }
        let base = reserve(self.globals.len(), module.globals.len(), "globals")?;
        let mut new_globals = Vec::with_capacity(module.globals.len());
        for (i, global) in module.globals.iter().enumerate() {
            let spaces = Spaces {
                funcs: &funcs,
                globals: &globals,
            };
            let value = spaces.eval(self, &global.init)?;
            new_globals.push(GlobalInst {
                ty: global.ty,
                value,
            });
            globals.push(GlobalAddr(base + i as u32));
        }

        let spaces = Spaces {
            funcs: &funcs,
            globals: &globals,
        };
        let base = reserve(self.elems.len(), module.elems.len(), "element segments")?;
        let mut new_elems = Vec::with_capacity(module.elems.len());
        for segment in &module.elems {
            // declarative segments are dropped on instantiation
            let items = match segment.mode {
                ElemMode::Declarative => Vec::new(),
                _ => segment
                    .items
                    .iter()
                    .map(|expr| spaces.eval(self, expr).map(|v| v.to_slot().unwrap_or(None)))
                    .collect::<Result<Vec<RefSlot>>>()?,
            };
            new_elems.push(ElemInst { items });
        }
        let elems: Vec<u32> = (base..).take(module.elems.len()).collect();
        let base = reserve(self.datas.len(), module.datas.len(), "data segments")?;
        let new_datas: Vec<Vec<u8>> = module.datas.iter().map(|s| s.bytes.clone()).collect();
        let datas: Vec<u32> = (base..).take(module.datas.len()).collect();

        let exports = module
            .exports
            .iter()
            .map(|export| {
                let index = export.index as usize;
                let item = match export.kind {
                    ExternKind::Func => funcs.get(index).copied().map(Extern::Func),
                    ExternKind::Table => tables.get(index).copied().map(Extern::Table),
                    ExternKind::Memory => memories.get(index).copied().map(Extern::Memory),
                    ExternKind::Global => globals.get(index).copied().map(Extern::Global),
                };
                item.map(|item| (export.name.clone(), item)).ok_or_else(|| {
                    Error::Host(format!("export \"{}\" refers to a missing {}", export.name, export.kind))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut active_elems = Vec::new();
        for (i, segment) in module.elems.iter().enumerate() {
            if let ElemMode::Active { table, offset } = &segment.mode {
                let table = tables
                    .get(*table as usize)
                    .copied()
                    .ok_or_else(|| Error::Host(format!("unknown table {table}")))?;
                active_elems.push((i, table, spaces.offset(self, offset)?));
            }
        }
        let mut active_datas = Vec::new();
        for (i, segment) in module.datas.iter().enumerate() {
            if let DataMode::Active { memory, offset } = &segment.mode {
                let memory = memories
                    .get(*memory as usize)
                    .copied()
                    .ok_or_else(|| Error::Host(format!("unknown memory {memory}")))?;
                active_datas.push((i, memory, spaces.offset(self, offset)?));
            }
        }
        let start = module.start.map(|index| spaces.func(index)).transpose()?;

        self.funcs.extend(new_funcs);
        self.tables.extend(new_tables);
        self.memories.extend(new_memories);
        self.globals.extend(new_globals);
        self.elems.extend(new_elems);
        self.datas.extend(new_datas);
        self.instances.push(InstanceData {
            module: Arc::clone(module.shared()),
            funcs,
            tables,
            memories,
            globals,
            elems,
            datas,
            exports,
        });
        let instance = Instance(id);
        debug!(instance = id, name = ?module.names.module, "allocated instance");

        for (i, table, offset) in active_elems {
            let elem = self.instances[id as usize].elems[i] as usize;
            let items = std::mem::take(&mut self.elems[elem].items);
            trace!(segment = i, offset, len = items.len(), "initialising table");
            self.tables[table.0 as usize]
                .table
                .init(offset, &items, 0, items.len() as u32)
                .map_err(Error::Uninstantiable)?;
        }
        for (i, memory, offset) in active_datas {
            let data = self.instances[id as usize].datas[i] as usize;
            let bytes = std::mem::take(&mut self.datas[data]);
            trace!(segment = i, offset, len = bytes.len(), "initialising memory");
            self.memories[memory.0 as usize]
                .init(offset, &bytes, 0, bytes.len() as u32)
                .map_err(Error::Uninstantiable)?;
        }

        if let Some(start) = start {
            debug!(instance = id, func = start.0, "running start function");
            self.invoke(start, &[]).map_err(|err| match err {
                Error::Trap(trap) => Error::Uninstantiable(trap),
                other => other,
            })?;
        }
        Ok(instance)
    }
}
