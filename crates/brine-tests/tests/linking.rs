//! Import resolution, cross-instance sharing and host functions.

use brine_core::{
    ErrorKind, Extern, ExternKind, FuncType, GlobalType, Imports, Limits, RefType, Store,
    TableType, Trap, ValType, Value, PRINT_FUNCS,
};
use brine_tests::{assert_return, assert_trap, assert_unlinkable, spectest, wasm, Harness};

// ── resolution failures ──

#[test]
fn test_unknown_imports() {
    let mut h = Harness::new().unwrap();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "nope" (func)))"#,
        "unknown import: spectest.nope",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "nowhere" "print" (func)))"#,
        "unknown import: nowhere.print",
    );
}

#[test]
fn test_incompatible_kinds() {
    let mut h = Harness::new().unwrap();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "global_i32" (memory 1)))"#,
        "expected memory, found global",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "print" (table 1 funcref)))"#,
        "expected table, found func",
    );
}

#[test]
fn test_incompatible_function_signature() {
    let mut h = Harness::new().unwrap();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "print_i32" (func (param i64))))"#,
        "incompatible import type for spectest.print_i32",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "print" (func (result i32))))"#,
        "incompatible import type",
    );
}

#[test]
fn test_incompatible_global_type() {
    let mut h = Harness::new().unwrap();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "global_i32" (global i64)))"#,
        "incompatible import type",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "global_f64" (global (mut f64))))"#,
        "expected global mut f64, found f64",
    );
}

#[test]
fn test_limits_subtyping() {
    let mut h = Harness::new().unwrap();
    // spectest table is 10..20, memory 1..2
    h.instantiate(r#"(module (import "spectest" "table" (table 10 funcref)))"#)
        .unwrap();
    h.instantiate(r#"(module (import "spectest" "table" (table 5 25 funcref)))"#)
        .unwrap();
    h.instantiate(r#"(module (import "spectest" "memory" (memory 0 2)))"#)
        .unwrap();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "table" (table 11 funcref)))"#,
        "incompatible import type",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "table" (table 10 15 funcref)))"#,
        "incompatible import type",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "table" (table 10 externref)))"#,
        "incompatible import type",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "memory" (memory 2)))"#,
        "incompatible import type",
    );
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "memory" (memory 1 1)))"#,
        "incompatible import type",
    );
}

#[test]
fn test_unlinkable_module_allocates_nothing_visible() {
    let mut h = Harness::new().unwrap();
    let before = h.imports.len();
    assert_unlinkable(
        &mut h,
        r#"(module (import "spectest" "missing" (func)) (memory (export "m") 1))"#,
        "unknown import",
    );
    assert_eq!(h.imports.len(), before);
}

// ── sharing between instances ──

#[test]
fn test_mutable_global_is_shared() {
    let mut h = Harness::new().unwrap();
    let owner = h
        .instantiate(
            r#"(module
                 (global $g (export "g") (mut i32) (i32.const 1))
                 (func (export "get") (result i32) (global.get $g)))"#,
        )
        .unwrap();
    h.register("owner", owner);
    let user = h
        .instantiate(
            r#"(module
                 (global $g (import "owner" "g") (mut i32))
                 (func (export "bump")
                   (global.set $g (i32.add (global.get $g) (i32.const 10)))))"#,
        )
        .unwrap();
    h.invoke(user, "bump", &[]).unwrap();
    assert_return(h.invoke(owner, "get", &[]), &[Value::I32(11)]);
    assert_eq!(h.get(owner, "g").unwrap(), Value::I32(11));

    let g = owner.global(&h.store, "g").unwrap();
    h.store.global_set(g, Value::I32(-5)).unwrap();
    assert_return(h.invoke(owner, "get", &[]), &[Value::I32(-5)]);
}

#[test]
fn test_reexported_function_keeps_identity() {
    let mut h = Harness::new().unwrap();
    let a = h
        .instantiate(r#"(module (func (export "f") (result i32) (i32.const 7)))"#)
        .unwrap();
    h.register("a", a);
    let b = h
        .instantiate(
            r#"(module
                 (import "a" "f" (func $f (result i32)))
                 (export "g" (func $f)))"#,
        )
        .unwrap();
    assert_eq!(
        a.func(&h.store, "f").unwrap(),
        b.func(&h.store, "g").unwrap()
    );
    assert_return(h.invoke(b, "g", &[]), &[Value::I32(7)]);
}

#[test]
fn test_spectest_globals() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (global $i (import "spectest" "global_i32") i32)
                 (global $l (import "spectest" "global_i64") i64)
                 (global $d (import "spectest" "global_f64") f64)
                 (func (export "i") (result i32) (global.get $i))
                 (func (export "l") (result i64) (global.get $l))
                 (func (export "d") (result f64) (global.get $d)))"#,
        )
        .unwrap();
    assert_return(h.invoke(inst, "i", &[]), &[Value::I32(666)]);
    assert_return(h.invoke(inst, "l", &[]), &[Value::I64(666)]);
    assert_return(h.invoke(inst, "d", &[]), &[Value::f64(666.6)]);
}

#[test]
fn test_spectest_print_functions() {
    let mut store = Store::default();
    let imports = spectest(&mut store).unwrap();
    for (name, params) in PRINT_FUNCS {
        let Some(Extern::Func(addr)) = imports.get("spectest", name) else {
            panic!("spectest.{name} is not a function");
        };
        let ty = store.func_type(addr).unwrap();
        assert_eq!(ty, &FuncType::new(params.iter().copied(), []), "spectest.{name}");
    }

    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (import "spectest" "print" (func $p))
                 (import "spectest" "print_i32" (func $pi (param i32)))
                 (import "spectest" "print_i64" (func $pl (param i64)))
                 (import "spectest" "print_f32" (func $pf (param f32)))
                 (import "spectest" "print_f64" (func $pd (param f64)))
                 (import "spectest" "print_i32_f32" (func $pif (param i32 f32)))
                 (import "spectest" "print_f64_f64" (func $pdd (param f64 f64)))
                 (func (export "all")
                   (call $p)
                   (call $pi (i32.const 1))
                   (call $pl (i64.const 2))
                   (call $pf (f32.const 3))
                   (call $pd (f64.const 4))
                   (call $pif (i32.const 5) (f32.const 6))
                   (call $pdd (f64.const 7) (f64.const 8))))"#,
        )
        .unwrap();
    assert_return(h.invoke(inst, "all", &[]), &[]);
}

#[test]
fn test_exports_listing() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (func (export "f"))
                 (table (export "t") 1 funcref)
                 (memory (export "m") 1)
                 (global (export "g") i32 (i32.const 0)))"#,
        )
        .unwrap();
    let kinds: Vec<(&str, ExternKind)> = inst
        .exports(&h.store)
        .map(|(name, ext)| (name, ext.kind()))
        .collect();
    assert_eq!(
        kinds,
        [
            ("f", ExternKind::Func),
            ("t", ExternKind::Table),
            ("m", ExternKind::Memory),
            ("g", ExternKind::Global),
        ]
    );
    assert!(matches!(inst.export(&h.store, "m"), Some(Extern::Memory(_))));
    assert!(inst.export(&h.store, "missing").is_none());

    let err = h.invoke(inst, "missing", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
    let err = h.invoke(inst, "m", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
}

#[test]
fn test_invoke_checks_arguments() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(r#"(module (func (export "id") (param i32) (result i32) (local.get 0)))"#)
        .unwrap();
    let err = h.invoke(inst, "id", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
    let err = h.invoke(inst, "id", &[Value::I64(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
    assert_return(h.invoke(inst, "id", &[Value::I32(3)]), &[Value::I32(3)]);
}

// ── host functions ──

#[test]
fn test_host_function_roundtrip() {
    let mut store = Store::default();
    let double = store
        .host_func(
            FuncType::new([ValType::I64], [ValType::I64]),
            |args: &[Value]| match args {
                [Value::I64(v)] => Ok(vec![Value::I64(v * 2)]),
                _ => Err(Trap::HostFailure),
            },
        )
        .unwrap();
    let mut imports = Imports::new();
    imports.define("env", "double", double);

    let module = brine_core::compile(
        &wasm(
            r#"(module
                 (import "env" "double" (func $double (param i64) (result i64)))
                 (func (export "quad") (param i64) (result i64)
                   (call $double (call $double (local.get 0)))))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let inst = store.instantiate(&module, &imports).unwrap();
    assert_return(
        inst.call(&mut store, "quad", &[Value::I64(5)]),
        &[Value::I64(20)],
    );
    // host functions are callable directly too
    assert_return(store.invoke(double, &[Value::I64(4)]), &[Value::I64(8)]);
}

#[test]
fn test_host_trap_propagates() {
    let mut store = Store::default();
    let fail = store
        .host_func(FuncType::new([], []), |_: &[Value]| Err(Trap::Unreachable))
        .unwrap();
    let mut imports = Imports::new();
    imports.define("env", "fail", fail);
    let module = brine_core::compile(
        &wasm(
            r#"(module
                 (import "env" "fail" (func $fail))
                 (func (export "run") (call $fail)))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let inst = store.instantiate(&module, &imports).unwrap();
    assert_trap(inst.call(&mut store, "run", &[]), Trap::Unreachable);
}

#[test]
fn test_host_allocated_globals_and_memory() {
    let mut store = Store::default();
    let counter = store
        .alloc_global(
            GlobalType {
                content: ValType::I32,
                mutable: true,
            },
            Value::I32(0),
        )
        .unwrap();
    assert_eq!(
        store
            .alloc_global(
                GlobalType {
                    content: ValType::I32,
                    mutable: false,
                },
                Value::I64(0),
            )
            .unwrap_err()
            .kind(),
        ErrorKind::Host
    );
    let mut imports = Imports::new();
    imports.define("env", "counter", counter);
    let module = brine_core::compile(
        &wasm(
            r#"(module
                 (global $c (import "env" "counter") (mut i32))
                 (func (export "tick") (global.set $c (i32.add (global.get $c) (i32.const 1)))))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let inst = store.instantiate(&module, &imports).unwrap();
    inst.call(&mut store, "tick", &[]).unwrap();
    inst.call(&mut store, "tick", &[]).unwrap();
    assert_eq!(store.global_get(counter).unwrap(), Value::I32(2));
}

// ── references from another store ──

/// A function reference minted by a different store, pointing past the end
/// of an empty store's function space.
fn foreign_funcref() -> Value {
    let mut other = Store::default();
    let mut last = None;
    for _ in 0..8 {
        last = Some(
            other
                .host_func(FuncType::new([], []), |_: &[Value]| Ok(Vec::new()))
                .unwrap(),
        );
    }
    Value::FuncRef(last)
}

#[test]
fn test_foreign_funcref_argument_is_rejected() {
    let foreign = foreign_funcref();
    let mut store = Store::default();
    let module = brine_core::compile(
        &wasm(
            r#"(module
                 (table 1 funcref)
                 (func (export "stash-and-call") (param funcref)
                   (table.set 0 (i32.const 0) (local.get 0))
                   (call_indirect (i32.const 0))))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let inst = store.instantiate(&module, &Imports::new()).unwrap();

    let err = inst
        .call(&mut store, "stash-and-call", &[foreign])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
    assert_trap(
        inst.call(&mut store, "stash-and-call", &[Value::FuncRef(None)]),
        Trap::UninitializedElement,
    );
}

#[test]
fn test_foreign_funcref_rejected_by_host_entry_points() {
    let foreign = foreign_funcref();
    let mut store = Store::default();
    let ty = TableType {
        elem: RefType::Func,
        limits: Limits { min: 1, max: None },
    };
    assert_eq!(store.alloc_table(ty, foreign).unwrap_err().kind(), ErrorKind::Host);
    let table = store.alloc_table(ty, Value::FuncRef(None)).unwrap();
    assert_eq!(
        store.table_set(table, 0, foreign).unwrap_err().kind(),
        ErrorKind::Host
    );
    assert_eq!(store.table_get(table, 0).unwrap(), Value::FuncRef(None));

    let gty = GlobalType {
        content: ValType::FuncRef,
        mutable: true,
    };
    assert_eq!(store.alloc_global(gty, foreign).unwrap_err().kind(), ErrorKind::Host);
    let global = store.alloc_global(gty, Value::FuncRef(None)).unwrap();
    assert_eq!(
        store.global_set(global, foreign).unwrap_err().kind(),
        ErrorKind::Host
    );

    // a host function cannot smuggle one in through its results
    let leak = store
        .host_func(FuncType::new([], [ValType::FuncRef]), move |_: &[Value]| {
            Ok(vec![foreign])
        })
        .unwrap();
    assert_trap(store.invoke(leak, &[]), Trap::HostFailure);
}
