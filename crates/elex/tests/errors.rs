//! Error policy: strictness, silence, safety, antish fallback, source
//! fragments, and cancellation.

use elex::{CancelHandle, Context, Engine, ErrorKind, MapContext, Options, Span, Value, VariableIssue};
use pretty_assertions::assert_eq;

// =============================================================================
// 1. strictness and fragments
// =============================================================================

/// An undefined variable under strictness carries the exact identifier
/// fragment and its byte offsets.
#[test]
fn undefined_variable_fragment() {
    let engine = Engine::new();
    let script = engine.create_script("undef + 1").unwrap();
    let err = script
        .execute_with(&mut MapContext::new(), &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Undefined, .. }
    ));
    assert_eq!(err.fragment(), Some("undef"));
    assert_eq!(err.span(), Some(Span::new(0, 5)));
}

/// Without strictness the same expression degrades to lenient null math.
#[test]
fn lenient_undefined_reads_null() {
    let engine = Engine::new();
    let mut ctx = MapContext::new();
    assert_eq!(engine.evaluate("undef + 1", &mut ctx).unwrap(), Value::Int(1));
}

/// Property access on a non-container fails strictly, quietly otherwise.
#[test]
fn property_error_policy() {
    let engine = Engine::new();
    let script = engine.create_script("x.y").unwrap();
    let mut ctx = MapContext::new().with("x", Value::Int(1));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    let err = script
        .execute_with(&mut ctx, &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Property { .. }));
}

/// An unresolvable call site is a method error under strictness.
#[test]
fn method_error_policy() {
    let engine = Engine::new();
    let script = engine.create_script("nothing_here(1)").unwrap();
    let err = script
        .execute_with(&mut MapContext::new(), &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Method { .. }));
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Null);
}

/// Malformed source is a parse error at script creation.
#[test]
fn parse_errors_surface_at_creation() {
    let err = Engine::new().create_script("1 +").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Parse(_)));
    let err = Engine::new().create_expression("a b").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Parse(_)));
}

// =============================================================================
// 2. silent and safe modes
// =============================================================================

/// Silent evaluation swallows the error and yields null.
#[test]
fn silent_swallows_errors() {
    let engine = Engine::new();
    let script = engine.create_script("undef + 1").unwrap();
    let options = Options::new().strict(true).silent(true);
    assert_eq!(script.execute_with(&mut MapContext::new(), &options).unwrap(), Value::Null);
}

/// Safe mode absorbs unresolved identifiers even under strictness.
#[test]
fn safe_absorbs_unresolved() {
    let engine = Engine::new();
    let script = engine.create_script("missing").unwrap();
    let options = Options::new().strict(true).safe(true);
    assert_eq!(script.execute_with(&mut MapContext::new(), &options).unwrap(), Value::Null);
}

/// A ternary condition protects its whole navigation chain.
#[test]
fn ternary_condition_is_protected() {
    let engine = Engine::new();
    let script = engine.create_script("a.b.c ? 'set' : 'unset'").unwrap();
    let options = Options::new().strict(true).antish(false);
    assert_eq!(
        script.execute_with(&mut MapContext::new(), &options).unwrap(),
        Value::str("unset")
    );
}

// =============================================================================
// 3. antish names
// =============================================================================

/// A dotted chain with an unresolved head falls back to the composite
/// context variable name.
#[test]
fn antish_reads_composite_names() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("a.b.c", Value::Int(42));
    assert_eq!(engine.evaluate("a.b.c", &mut ctx).unwrap(), Value::Int(42));
}

/// Antish assignment creates the composite variable.
#[test]
fn antish_writes_composite_names() {
    let engine = Engine::new();
    let mut ctx = MapContext::new();
    engine
        .create_script("q.r = 7")
        .unwrap()
        .execute(&mut ctx)
        .unwrap();
    assert_eq!(ctx.get("q.r"), Some(Value::Int(7)));
}

/// With antish disabled the chain resolves (and fails) structurally.
#[test]
fn antish_can_be_disabled() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("a.b", Value::Int(1));
    let script = engine.create_script("a.b").unwrap();
    let options = Options::new().antish(false).strict(true);
    let err = script.execute_with(&mut ctx, &options).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Variable { .. }));
}

// =============================================================================
// 4. annotations
// =============================================================================

#[derive(Debug)]
struct GateKeeper;

impl elex::AnnotationProcessor for GateKeeper {
    fn process(&self, name: &str, _args: &[elex::Value]) -> elex::EvalResult<bool> {
        match name {
            "skip" => Ok(false),
            "run" => Ok(true),
            other => Err(elex::EvalError::annotation(other, "unknown annotation")),
        }
    }
}

/// The processor gates whether the annotated statement executes.
#[test]
fn annotations_gate_statements() {
    let engine = Engine::builder().annotation_processor(GateKeeper).build();
    let mut ctx = MapContext::new();
    let script = engine.create_script("var x = 1; @skip x = 2; @run x += 10; x").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(11));
}

/// A processor failure surfaces as an annotation error naming the
/// annotation.
#[test]
fn annotation_failures_carry_the_name() {
    let engine = Engine::builder().annotation_processor(GateKeeper).build();
    let err = engine
        .create_script("@nope 1")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Annotation { name, .. } if name == "nope"));
}

/// Without a processor, strict evaluation rejects annotations and lenient
/// evaluation ignores them.
#[test]
fn missing_processor_policy() {
    let engine = Engine::new();
    let script = engine.create_script("@anything 40 + 2").unwrap();
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Int(42));
    let err = script
        .execute_with(&mut MapContext::new(), &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Annotation { .. }));
}

// =============================================================================
// 5. cancellation
// =============================================================================

/// A pre-set cancellation flag stops evaluation with a cancellation error.
#[test]
fn cancellation_raises() {
    let engine = Engine::new();
    let handle = CancelHandle::new();
    handle.cancel();
    let mut ctx = MapContext::new().with_cancellation(handle);
    let err = engine
        .create_script("var s = 0; for (var i : 1..100) s += i; s")
        .unwrap()
        .execute(&mut ctx)
        .unwrap_err();
    assert!(err.is_cancelled());
}

/// Cancellation is not swallowed by silent mode.
#[test]
fn cancellation_beats_silence() {
    let engine = Engine::new();
    let handle = CancelHandle::new();
    handle.cancel();
    let mut ctx = MapContext::new().with_cancellation(handle);
    let options = Options::new().silent(true);
    let err = engine
        .create_script("1 + 1")
        .unwrap()
        .execute_with(&mut ctx, &options)
        .unwrap_err();
    assert!(err.is_cancelled());
}

/// With `cancellable` off the flag is ignored.
#[test]
fn cancellable_can_be_disabled() {
    let engine = Engine::new();
    let handle = CancelHandle::new();
    handle.cancel();
    let mut ctx = MapContext::new().with_cancellation(handle);
    let options = Options::new().cancellable(false);
    let result = engine
        .create_script("2 + 2")
        .unwrap()
        .execute_with(&mut ctx, &options)
        .unwrap();
    assert_eq!(result, Value::Int(4));
}

/// Catch clauses do not intercept cancellation.
#[test]
fn catch_does_not_swallow_cancellation() {
    let engine = Engine::new();
    let handle = CancelHandle::new();
    handle.cancel();
    let mut ctx = MapContext::new().with_cancellation(handle);
    let err = engine
        .create_script("try { 1 } catch (e) { 'caught' }")
        .unwrap()
        .execute(&mut ctx)
        .unwrap_err();
    assert!(err.is_cancelled());
}
