//! Decoded module representation.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::ValidationError;
use crate::instr::{ConstExpr, Instr};
use crate::types::{ExternKind, FuncType, GlobalType, MemoryType, RefType, TableType, ValType};

/// A decoded WebAssembly module.
///
/// Produced by [`decode`](crate::decode::decode). It must pass validation
/// and become a [`ValidatedModule`] before it can be instantiated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Type section: function signatures.
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type index of each defined (non-imported) function.
    pub funcs: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elems: Vec<ElemSegment>,
    pub datas: Vec<DataSegment>,
    /// Value of the data count section, if present.
    pub data_count: Option<u32>,
    /// Bodies of the defined functions, parallel to `funcs`.
    pub code: Vec<FuncBody>,
    /// Contents of the `name` custom section, when it decoded cleanly.
    pub names: Names,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImportDesc {
    /// Type index.
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternKind {
        match self {
            ImportDesc::Func(_) => ExternKind::Func,
            ImportDesc::Table(_) => ExternKind::Table,
            ImportDesc::Memory(_) => ExternKind::Memory,
            ImportDesc::Global(_) => ExternKind::Global,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElemMode {
    Passive,
    Active { table: u32, offset: ConstExpr },
    Declarative,
}

/// Element segment. Function-index encodings are normalised to
/// `ref.func` expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct ElemSegment {
    pub ty: RefType,
    pub mode: ElemMode,
    pub items: Vec<ConstExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Passive,
    Active { memory: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

/// A function body: declared locals (expanded, parameters excluded) and the
/// decoded instruction sequence, which always ends with the body's `End`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncBody {
    pub locals: Vec<ValType>,
    pub instrs: Vec<Instr>,
}

/// Debug names from the `name` custom section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Names {
    pub module: Option<String>,
    pub funcs: BTreeMap<u32, String>,
}

impl Module {
    fn imports_of(&self, kind: ExternKind) -> impl Iterator<Item = &ImportDesc> {
        self.imports
            .iter()
            .map(|i| &i.desc)
            .filter(move |d| d.kind() == kind)
    }

    pub fn num_imported_funcs(&self) -> u32 {
        self.imports_of(ExternKind::Func).count() as u32
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imports_of(ExternKind::Global).count() as u32
    }

    /// Type index of every function in the function index space.
    pub fn func_type_indices(&self) -> Vec<u32> {
        self.imports_of(ExternKind::Func)
            .filter_map(|d| match d {
                ImportDesc::Func(t) => Some(*t),
                _ => None,
            })
            .chain(self.funcs.iter().copied())
            .collect()
    }

    /// Signature of function `index` (imports first).
    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        let ty = *self.func_type_indices().get(index as usize)?;
        self.types.get(ty as usize)
    }

    /// Every table in the table index space.
    pub fn all_tables(&self) -> Vec<TableType> {
        self.imports_of(ExternKind::Table)
            .filter_map(|d| match d {
                ImportDesc::Table(t) => Some(*t),
                _ => None,
            })
            .chain(self.tables.iter().copied())
            .collect()
    }

    pub fn all_memories(&self) -> Vec<MemoryType> {
        self.imports_of(ExternKind::Memory)
            .filter_map(|d| match d {
                ImportDesc::Memory(m) => Some(*m),
                _ => None,
            })
            .chain(self.memories.iter().copied())
            .collect()
    }

    pub fn all_globals(&self) -> Vec<GlobalType> {
        self.imports_of(ExternKind::Global)
            .filter_map(|d| match d {
                ImportDesc::Global(g) => Some(*g),
                _ => None,
            })
            .chain(self.globals.iter().map(|g| g.ty))
            .collect()
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }
}

/// A module that passed [`validate`](crate::validate::validate).
///
/// The only form [`Store::instantiate`](crate::Store::instantiate) accepts.
/// Obtained from [`compile`](crate::compile) or [`ValidatedModule::new`];
/// dereferences to the underlying [`Module`] and is cheap to clone.
#[derive(Debug, Clone)]
pub struct ValidatedModule(Arc<Module>);

impl ValidatedModule {
    /// Validate `module` and seal it against further changes.
    pub fn new(module: Module) -> Result<Self, ValidationError> {
        crate::validate::validate(&module)?;
        Ok(Self(Arc::new(module)))
    }

    pub(crate) fn shared(&self) -> &Arc<Module> {
        &self.0
    }
}

impl Deref for ValidatedModule {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.0
    }
}
