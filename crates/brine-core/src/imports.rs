//! Import resolution.
//!
//! An [`Imports`] registry maps `(module, name)` pairs to store entities.
//! Instantiation looks every import of a module up in it and checks the
//! provided entity against the declared type.

use std::collections::HashMap;

use crate::error::{LinkError, Result};
use crate::instance::Instance;
use crate::module::{Import, ImportDesc, Module};
use crate::store::{Extern, Store};
use crate::types::ValType;

/// Names and parameter types of the conventional `spectest.print*` host
/// functions. None of them return results.
pub const PRINT_FUNCS: &[(&str, &[ValType])] = &[
    ("print", &[]),
    ("print_i32", &[ValType::I32]),
    ("print_i64", &[ValType::I64]),
    ("print_f32", &[ValType::F32]),
    ("print_f64", &[ValType::F64]),
    ("print_i32_f32", &[ValType::I32, ValType::F32]),
    ("print_f64_f64", &[ValType::F64, ValType::F64]),
];

/// Name-keyed registry of entities available for import.
#[derive(Debug, Clone, Default)]
pub struct Imports {
    entries: HashMap<(String, String), Extern>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `item` importable as `module.name`, replacing any earlier
    /// definition.
    pub fn define(&mut self, module: &str, name: &str, item: impl Into<Extern>) -> &mut Self {
        self.entries
            .insert((module.to_owned(), name.to_owned()), item.into());
        self
    }

    /// Make every export of `instance` importable under module name `name`.
    pub fn register(&mut self, name: &str, instance: Instance, store: &Store) -> &mut Self {
        for (export, item) in instance.exports(store) {
            self.define(name, export, item);
        }
        self
    }

    pub fn get(&self, module: &str, name: &str) -> Option<Extern> {
        self.entries
            .get(&(module.to_owned(), name.to_owned()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every import of `module`, in declaration order.
    pub(crate) fn resolve(&self, module: &Module, store: &Store) -> Result<Vec<Extern>, LinkError> {
        module
            .imports
            .iter()
            .map(|import| {
                let item = self
                    .get(&import.module, &import.name)
                    .ok_or_else(|| LinkError::UnknownImport {
                        module: import.module.clone(),
                        name: import.name.clone(),
                    })?;
                check_import(module, import, item, store)?;
                Ok(item)
            })
            .collect()
    }
}

fn check_import(module: &Module, import: &Import, item: Extern, store: &Store) -> Result<(), LinkError> {
    let incompatible = |reason: String| LinkError::IncompatibleImportType {
        module: import.module.clone(),
        name: import.name.clone(),
        reason,
    };
    let lookup = |err: crate::Error| incompatible(err.to_string());

    match (&import.desc, item) {
        (ImportDesc::Func(type_index), Extern::Func(addr)) => {
            let expected = module
                .types
                .get(*type_index as usize)
                .ok_or_else(|| incompatible(format!("unknown type {type_index}")))?;
            let actual = store.func_type(addr).map_err(lookup)?;
            if actual != expected {
                return Err(incompatible(format!("expected {expected}, found {actual}")));
            }
        }
        (ImportDesc::Table(expected), Extern::Table(addr)) => {
            let actual = store.table_type(addr).map_err(lookup)?;
            if actual.elem != expected.elem || !actual.limits.matches(&expected.limits) {
                return Err(incompatible(format!(
                    "expected table {} {}, found {} {}",
                    crate::types::ValType::from(expected.elem),
                    expected.limits,
                    crate::types::ValType::from(actual.elem),
                    actual.limits
                )));
            }
        }
        (ImportDesc::Memory(expected), Extern::Memory(addr)) => {
            let actual = store.memory_type(addr).map_err(lookup)?;
            if !actual.limits.matches(&expected.limits) {
                return Err(incompatible(format!(
                    "expected memory {}, found {}",
                    expected.limits, actual.limits
                )));
            }
        }
        (ImportDesc::Global(expected), Extern::Global(addr)) => {
            let actual = store.global_type(addr).map_err(lookup)?;
            if actual != *expected {
                return Err(incompatible(format!(
                    "expected global {}{}, found {}{}",
                    mutability(expected.mutable),
                    expected.content,
                    mutability(actual.mutable),
                    actual.content
                )));
            }
        }
        (desc, item) => {
            return Err(incompatible(format!(
                "expected {}, found {}",
                desc.kind(),
                item.kind()
            )));
        }
    }
    Ok(())
}

fn mutability(mutable: bool) -> &'static str {
    if mutable {
        "mut "
    } else {
        ""
    }
}
