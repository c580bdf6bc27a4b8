//! Source-cache behavior observable through the public surface.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use elex::{DefaultArithmetic, Engine, MapContext, Operator, OverloadTable, Shape, Value};
use pretty_assertions::assert_eq;

/// Repeated creation of the same source reuses the cached tree: the two
/// handles share node cache slots, so an overload resolved through one is
/// already memoised for the other.
#[test]
fn same_source_shares_the_compiled_artifact() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let table = OverloadTable::new().register(Operator::Add, [Shape::Int, Shape::Int], move |args| {
        seen.fetch_add(1, Ordering::Relaxed);
        Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
    });
    let engine = Engine::builder()
        .arithmetic(DefaultArithmetic::new().with_overloads(table))
        .build();
    let mut ctx = MapContext::new();
    let first = engine.create_script("1 + 2").unwrap();
    let second = engine.create_script("1 + 2").unwrap();
    assert_eq!(first.execute(&mut ctx).unwrap(), Value::Int(3));
    assert_eq!(second.execute(&mut ctx).unwrap(), Value::Int(3));
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    // a cache hit hands back the same artifact, not a reparse
    assert!(std::ptr::eq(first.source(), second.source()));
}

/// Clearing the caches keeps previously created scripts working and
/// transparently re-parses new requests.
#[test]
fn clear_then_repopulate() {
    let engine = Engine::new();
    let script = engine.create_script("21 * 2").unwrap();
    engine.clear_caches();
    let mut ctx = MapContext::new();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(42));
    assert_eq!(engine.create_script("21 * 2").unwrap().execute(&mut ctx).unwrap(), Value::Int(42));
}

/// A zero-capacity cache still parses everything, just without reuse.
#[test]
fn zero_capacity_cache() {
    let engine = Engine::builder().cache_size(0).build();
    let mut ctx = MapContext::new();
    assert_eq!(engine.create_script("1 + 1").unwrap().execute(&mut ctx).unwrap(), Value::Int(2));
    assert_eq!(engine.create_script("1 + 1").unwrap().execute(&mut ctx).unwrap(), Value::Int(2));
}

/// Scripts and expressions cache independently for the same source text.
#[test]
fn scripts_and_expressions_are_distinct_entries() {
    let engine = Engine::new();
    let mut ctx = MapContext::new();
    assert_eq!(engine.create_script("6 * 7").unwrap().execute(&mut ctx).unwrap(), Value::Int(42));
    assert_eq!(engine.create_expression("6 * 7").unwrap().execute(&mut ctx).unwrap(), Value::Int(42));
}

/// Eviction under a tiny capacity never breaks evaluation.
#[test]
fn tiny_cache_evicts_quietly() {
    let engine = Engine::builder().cache_size(2).build();
    let mut ctx = MapContext::new();
    for i in 0..10 {
        let source = format!("{i} + {i}");
        assert_eq!(
            engine.create_script(&source).unwrap().execute(&mut ctx).unwrap(),
            Value::Int(i * 2)
        );
    }
}
