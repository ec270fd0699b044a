//! Test tooling for the brine interpreter.
//!
//! Provides the `spectest` host module the reference test suite imports
//! from, a [`Harness`] that keeps a store and a registry of named
//! instances, and `assert_*` helpers mirroring the reference suite's
//! assertion forms.

use anyhow::{Context, Result};
use brine_core::{
    compile, Config, ErrorKind, FuncType, GlobalType, Imports, Instance, Limits, MemoryType,
    RefType, Store, TableType, ValType, Value, PRINT_FUNCS,
};
use brine_runtime::Trap;
use tracing::info;

/// Compile WAT source to a binary module.
pub fn wasm(wat: &str) -> Result<Vec<u8>> {
    wat::parse_str(wat).context("failed to parse WAT fixture")
}

/// Allocate the `spectest` module in `store` and return a registry that
/// exposes it.
///
/// Print functions log their arguments instead of writing to stdout.
pub fn spectest(store: &mut Store) -> brine_core::Result<Imports> {
    use ValType::{F32, F64, I32, I64};

    let mut imports = Imports::new();
    for (name, params) in PRINT_FUNCS {
        let ty = FuncType::new(params.iter().copied(), []);
        let func = store.host_func(ty, move |args: &[Value]| {
            let line: Vec<String> = args.iter().map(ToString::to_string).collect();
            info!(target: "spectest", "{name}: {}", line.join(" "));
            Ok(Vec::new())
        })?;
        imports.define("spectest", name, func);
    }

    let constant = |content| GlobalType {
        content,
        mutable: false,
    };
    let globals = [
        ("global_i32", constant(I32), Value::I32(666)),
        ("global_i64", constant(I64), Value::I64(666)),
        ("global_f32", constant(F32), Value::f32(666.6)),
        ("global_f64", constant(F64), Value::f64(666.6)),
    ];
    for (name, ty, value) in globals {
        let global = store.alloc_global(ty, value)?;
        imports.define("spectest", name, global);
    }

    let table = store.alloc_table(
        TableType {
            elem: RefType::Func,
            limits: Limits {
                min: 10,
                max: Some(20),
            },
        },
        Value::FuncRef(None),
    )?;
    imports.define("spectest", "table", table);

    let memory = store.alloc_memory(MemoryType {
        limits: Limits {
            min: 1,
            max: Some(2),
        },
    })?;
    imports.define("spectest", "memory", memory);

    Ok(imports)
}

/// A store plus the registry of everything importable into it.
pub struct Harness {
    pub store: Store,
    pub imports: Imports,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let mut store = Store::new(config);
        let imports = spectest(&mut store).context("failed to build spectest module")?;
        Ok(Self { store, imports })
    }

    /// Compile and instantiate a WAT module, failing on any error.
    pub fn instantiate(&mut self, wat: &str) -> Result<Instance> {
        let bytes = wasm(wat)?;
        let instance = self
            .try_instantiate(&bytes)
            .context("failed to instantiate fixture")?;
        Ok(instance)
    }

    /// Compile and instantiate a binary module, returning the engine error.
    pub fn try_instantiate(&mut self, bytes: &[u8]) -> brine_core::Result<Instance> {
        let module = compile(bytes)?;
        self.store.instantiate(&module, &self.imports)
    }

    /// Make `instance`'s exports importable as module `name`.
    pub fn register(&mut self, name: &str, instance: Instance) {
        self.imports.register(name, instance, &self.store);
    }

    pub fn invoke(
        &mut self,
        instance: Instance,
        name: &str,
        args: &[Value],
    ) -> brine_core::Result<Vec<Value>> {
        instance.call(&mut self.store, name, args)
    }

    pub fn get(&self, instance: Instance, name: &str) -> brine_core::Result<Value> {
        instance.global_value(&self.store, name)
    }
}

#[track_caller]
fn assert_kind<T: std::fmt::Debug>(result: brine_core::Result<T>, kind: ErrorKind, needle: &str) {
    match result {
        Ok(value) => panic!("expected {kind:?} error containing {needle:?}, got Ok({value:?})"),
        Err(err) => {
            assert_eq!(err.kind(), kind, "unexpected error category: {err}");
            assert!(
                err.to_string().contains(needle),
                "error {err:?} does not mention {needle:?}"
            );
        }
    }
}

/// The bytes must fail to decode with a message containing `needle`.
#[track_caller]
pub fn assert_malformed(bytes: &[u8], needle: &str) {
    assert_kind(compile(bytes), ErrorKind::Malformed, needle);
}

/// The module must decode but fail validation with a message containing
/// `needle`.
#[track_caller]
pub fn assert_invalid(wat: &str, needle: &str) {
    let bytes = match wasm(wat) {
        Ok(bytes) => bytes,
        Err(err) => panic!("fixture does not parse: {err:#}"),
    };
    assert_kind(compile(&bytes), ErrorKind::Invalid, needle);
}

/// Like [`assert_invalid`] for modules the text format cannot express.
#[track_caller]
pub fn assert_invalid_bytes(bytes: &[u8], needle: &str) {
    assert_kind(compile(bytes), ErrorKind::Invalid, needle);
}

#[track_caller]
pub fn assert_unlinkable(harness: &mut Harness, wat: &str, needle: &str) {
    let bytes = match wasm(wat) {
        Ok(bytes) => bytes,
        Err(err) => panic!("fixture does not parse: {err:#}"),
    };
    assert_kind(harness.try_instantiate(&bytes), ErrorKind::Unlinkable, needle);
}

#[track_caller]
pub fn assert_uninstantiable(harness: &mut Harness, wat: &str, trap: Trap) {
    let bytes = match wasm(wat) {
        Ok(bytes) => bytes,
        Err(err) => panic!("fixture does not parse: {err:#}"),
    };
    let result = harness.try_instantiate(&bytes);
    assert_kind(result.clone(), ErrorKind::Uninstantiable, "");
    assert_eq!(result.err().and_then(|e| e.trap()), Some(trap));
}

#[track_caller]
pub fn assert_return(result: brine_core::Result<Vec<Value>>, expected: &[Value]) {
    match result {
        Ok(values) => assert_eq!(values, expected),
        Err(err) => panic!("expected {expected:?}, got error: {err}"),
    }
}

#[track_caller]
pub fn assert_trap(result: brine_core::Result<Vec<Value>>, trap: Trap) {
    let err = match result {
        Ok(values) => panic!("expected trap {trap}, got {values:?}"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Trap, "unexpected error category: {err}");
    assert_eq!(err.trap(), Some(trap));
    assert!(err.to_string().contains(&trap.to_string()));
}

#[track_caller]
pub fn assert_exhaustion(result: brine_core::Result<Vec<Value>>) {
    assert_kind(result, ErrorKind::Exhaustion, "");
}

/// Recursive Fibonacci, exported as `fib: [i32] -> [i32]`.
pub const FIB_WAT: &str = r#"(module
  (func $fib (export "fib") (param $n i32) (result i32)
    (if (result i32) (i32.lt_s (local.get $n) (i32.const 2))
      (then (local.get $n))
      (else
        (i32.add
          (call $fib (i32.sub (local.get $n) (i32.const 1)))
          (call $fib (i32.sub (local.get $n) (i32.const 2))))))))"#;

/// Fills `n` words with `i * seed` and sums them back,
/// exported as `fill_sum: [i32 i32] -> [i32]`.
pub const MEMSUM_WAT: &str = r#"(module
  (memory 1)
  (func (export "fill_sum") (param $n i32) (param $seed i32) (result i32)
    (local $i i32) (local $acc i32)
    (block $filled
      (loop $fill
        (br_if $filled (i32.ge_u (local.get $i) (local.get $n)))
        (i32.store (i32.shl (local.get $i) (i32.const 2))
                   (i32.mul (local.get $i) (local.get $seed)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $fill)))
    (local.set $i (i32.const 0))
    (block $summed
      (loop $sum
        (br_if $summed (i32.ge_u (local.get $i) (local.get $n)))
        (local.set $acc
          (i32.add (local.get $acc)
                   (i32.load (i32.shl (local.get $i) (i32.const 2)))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $sum)))
    (local.get $acc)))"#;

pub fn fibo_orig(n: i32) -> i32 {
    if n < 2 {
        n
    } else {
        fibo_orig(n - 1).wrapping_add(fibo_orig(n - 2))
    }
}

pub fn fill_sum_orig(n: i32, seed: i32) -> i32 {
    (0..n).fold(0i32, |acc, i| acc.wrapping_add(i.wrapping_mul(seed)))
}
