//! Structured control flow, calls and stack exhaustion.

use brine_core::{Config, Trap, Value};
use brine_tests::{assert_exhaustion, assert_return, assert_trap, Harness, FIB_WAT};

fn i(v: i32) -> Value {
    Value::I32(v)
}

const FLOW: &str = r#"(module
  (func (export "block-value") (result i32)
    (block (result i32) (i32.const 1) (br 0 (i32.const 7)) (drop) (i32.const 2)))

  (func (export "br_if-value") (param i32) (result i32)
    (block (result i32)
      (drop (br_if 0 (i32.const 10) (local.get 0)))
      (i32.const 20)))

  (func (export "br_table") (param i32) (result i32)
    (block $default
      (block $two
        (block $one
          (block $zero
            (br_table $zero $one $two $default (local.get 0)))
          (return (i32.const 100)))
        (return (i32.const 101)))
      (return (i32.const 102)))
    (i32.const 103))

  (func (export "if-else") (param i32) (result i32)
    (if (result i32) (local.get 0)
      (then (i32.const 1))
      (else (i32.const 0))))

  (func (export "if-no-else") (param i32) (result i32)
    (local $r i32)
    (local.set $r (i32.const 5))
    (if (local.get 0) (then (local.set $r (i32.const 6))))
    (local.get $r))

  (func (export "loop-countdown") (param $n i32) (result i32)
    (local $steps i32)
    (block $done
      (loop $again
        (br_if $done (i32.eqz (local.get $n)))
        (local.set $n (i32.sub (local.get $n) (i32.const 1)))
        (local.set $steps (i32.add (local.get $steps) (i32.const 1)))
        (br $again)))
    (local.get $steps))

  (func (export "early-return") (param i32) (result i32)
    (block
      (loop
        (br_if 1 (i32.eqz (local.get 0)))
        (return (i32.const 42))))
    (i32.const -1))

  (func (export "select") (param i32) (result i64)
    (select (i64.const 10) (i64.const 20) (local.get 0)))

  (func (export "unreachable-after-br") (result i32)
    (block (result i32) (br 0 (i32.const 3)) (unreachable)))

  (func (export "trap") (unreachable))

  (func (export "swap") (param i32 i32) (result i32 i32)
    (local.get 1) (local.get 0))

  (func (export "block-params") (result i32)
    (i32.const 4)
    (block (param i32) (result i32) (i32.const 5) (i32.mul)))

  (func (export "loop-params") (param $n i32) (result i32)
    (i32.const 0)
    (loop $l (param i32) (result i32)
      (local.get $n)
      (i32.add)
      (local.set $n (i32.sub (local.get $n) (i32.const 1)))
      (br_if $l (local.get $n)))))"#;

fn setup() -> (Harness, brine_core::Instance) {
    let mut h = Harness::new().unwrap();
    let inst = h.instantiate(FLOW).unwrap();
    (h, inst)
}

// ── blocks and branches ──

#[test]
fn test_block_branch_carries_value() {
    let (mut h, inst) = setup();
    assert_return(h.invoke(inst, "block-value", &[]), &[i(7)]);
    assert_return(h.invoke(inst, "br_if-value", &[i(1)]), &[i(10)]);
    assert_return(h.invoke(inst, "br_if-value", &[i(0)]), &[i(20)]);
    assert_return(h.invoke(inst, "unreachable-after-br", &[]), &[i(3)]);
}

#[test]
fn test_br_table_targets_and_default() {
    let (mut h, inst) = setup();
    for (index, expected) in [(0, 100), (1, 101), (2, 102), (3, 103), (4, 103), (-1, 103)] {
        assert_return(h.invoke(inst, "br_table", &[i(index)]), &[i(expected)]);
    }
}

#[test]
fn test_if_forms() {
    let (mut h, inst) = setup();
    assert_return(h.invoke(inst, "if-else", &[i(9)]), &[i(1)]);
    assert_return(h.invoke(inst, "if-else", &[i(0)]), &[i(0)]);
    assert_return(h.invoke(inst, "if-no-else", &[i(1)]), &[i(6)]);
    assert_return(h.invoke(inst, "if-no-else", &[i(0)]), &[i(5)]);
}

#[test]
fn test_loops() {
    let (mut h, inst) = setup();
    assert_return(h.invoke(inst, "loop-countdown", &[i(0)]), &[i(0)]);
    assert_return(h.invoke(inst, "loop-countdown", &[i(1000)]), &[i(1000)]);
    assert_return(h.invoke(inst, "early-return", &[i(1)]), &[i(42)]);
    assert_return(h.invoke(inst, "early-return", &[i(0)]), &[i(-1)]);
}

#[test]
fn test_select() {
    let (mut h, inst) = setup();
    assert_return(h.invoke(inst, "select", &[i(1)]), &[Value::I64(10)]);
    assert_return(h.invoke(inst, "select", &[i(0)]), &[Value::I64(20)]);
}

#[test]
fn test_multi_value() {
    let (mut h, inst) = setup();
    assert_return(h.invoke(inst, "swap", &[i(1), i(2)]), &[i(2), i(1)]);
    assert_return(h.invoke(inst, "block-params", &[]), &[i(20)]);
    // 3 + 2 + 1
    assert_return(h.invoke(inst, "loop-params", &[i(3)]), &[i(6)]);
}

#[test]
fn test_unreachable_traps() {
    let (mut h, inst) = setup();
    assert_trap(h.invoke(inst, "trap", &[]), Trap::Unreachable);
    // the store stays usable after a trap
    assert_return(h.invoke(inst, "if-else", &[i(1)]), &[i(1)]);
}

// ── calls ──

#[test]
fn test_recursive_fib() {
    let mut h = Harness::new().unwrap();
    let inst = h.instantiate(FIB_WAT).unwrap();
    for n in [0, 1, 2, 10, 20] {
        assert_return(
            h.invoke(inst, "fib", &[i(n)]),
            &[i(brine_tests::fibo_orig(n))],
        );
    }
}

#[test]
fn test_mutual_recursion() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (func $even (export "even") (param i32) (result i32)
                   (if (result i32) (i32.eqz (local.get 0))
                     (then (i32.const 1))
                     (else (call $odd (i32.sub (local.get 0) (i32.const 1))))))
                 (func $odd (param i32) (result i32)
                   (if (result i32) (i32.eqz (local.get 0))
                     (then (i32.const 0))
                     (else (call $even (i32.sub (local.get 0) (i32.const 1)))))))"#,
        )
        .unwrap();
    assert_return(h.invoke(inst, "even", &[i(100)]), &[i(1)]);
    assert_return(h.invoke(inst, "even", &[i(77)]), &[i(0)]);
}

#[test]
fn test_infinite_recursion_exhausts() {
    let mut h = Harness::with_config(Config {
        max_call_depth: 1_000,
        ..Config::default()
    })
    .unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (func $loop (export "runaway") (call $loop)))"#,
        )
        .unwrap();
    assert_exhaustion(h.invoke(inst, "runaway", &[]));
    // a shallow call still works afterwards
    let fib = h.instantiate(FIB_WAT).unwrap();
    assert_return(h.invoke(fib, "fib", &[i(5)]), &[i(5)]);
}

#[test]
fn test_deep_recursion_within_limit() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (func $sum (export "sum") (param i32) (result i32)
                   (if (result i32) (i32.eqz (local.get 0))
                     (then (i32.const 0))
                     (else
                       (i32.add (local.get 0)
                         (call $sum (i32.sub (local.get 0) (i32.const 1))))))))"#,
        )
        .unwrap();
    assert_return(h.invoke(inst, "sum", &[i(5_000)]), &[i(12_502_500)]);
}

#[test]
fn test_trap_unwinds_nested_calls() {
    let mut h = Harness::new().unwrap();
    let inst = h
        .instantiate(
            r#"(module
                 (memory 1)
                 (func $inner (i32.store (i32.const 0) (i32.const 1)) (unreachable))
                 (func (export "outer") (call $inner) (i32.store (i32.const 0) (i32.const 2)))
                 (func (export "peek") (result i32) (i32.load (i32.const 0))))"#,
        )
        .unwrap();
    assert_trap(h.invoke(inst, "outer", &[]), Trap::Unreachable);
    assert_return(h.invoke(inst, "peek", &[]), &[i(1)]);
}
