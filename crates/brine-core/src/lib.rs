//! brine-core: a small WebAssembly interpreter.
//!
//! The pipeline is: [`decode`] raw bytes into a [`Module`], validate it into
//! a [`ValidatedModule`], then [`Store::instantiate`] that against an
//! [`Imports`] registry and call its exports through the returned
//! [`Instance`]. [`compile`] does the first two steps at once.

pub mod binary;
pub mod config;
pub mod decode;
pub mod error;
mod exec;
pub mod imports;
pub mod instance;
pub mod instr;
pub mod module;
pub mod store;
pub mod types;
pub mod validate;
pub mod value;

pub use brine_runtime::{LinearMemory, Trap, MAX_PAGES, PAGE_SIZE};
pub use config::Config;
pub use decode::decode;
pub use error::{DecodeError, Error, ErrorKind, LinkError, Result, ValidationError};
pub use imports::{Imports, PRINT_FUNCS};
pub use instance::Instance;
pub use module::{Module, ValidatedModule};
pub use store::{Extern, FuncAddr, GlobalAddr, HostFunc, MemoryAddr, Store, TableAddr};
pub use types::{ExternKind, FuncType, GlobalType, Limits, MemoryType, RefType, TableType, ValType};
pub use validate::validate;
pub use value::Value;

/// Decode and validate a binary module.
///
/// # Example
/// ```no_run
/// use brine_core::{compile, Imports, Store, Value};
///
/// let bytes = std::fs::read("add.wasm").unwrap();
/// let module = compile(&bytes).unwrap();
/// let mut store = Store::default();
/// let instance = store.instantiate(&module, &Imports::new()).unwrap();
/// let sum = instance.call(&mut store, "add", &[Value::I32(1), Value::I32(2)]).unwrap();
/// assert_eq!(sum, vec![Value::I32(3)]);
/// ```
pub fn compile(bytes: &[u8]) -> Result<ValidatedModule> {
    let module = decode(bytes)?;
    Ok(ValidatedModule::new(module)?)
}

/// Whether `bytes` is a well-formed and valid module.
pub fn validate_bytes(bytes: &[u8]) -> bool {
    compile(bytes).is_ok()
}
