//! Lexical rules: constness, block-level redeclaration, shading, and the
//! variable lifecycle.

use elex::{Engine, ErrorKind, MapContext, Options, Value, VariableIssue};
use pretty_assertions::assert_eq;

fn run(source: &str, options: &Options) -> Result<Value, elex::EvalError> {
    Engine::new()
        .create_script(source)
        .expect("script parses")
        .execute_with(&mut MapContext::new(), options)
}

// =============================================================================
// 1. constness
// =============================================================================

/// Reassigning an initialised constant fails regardless of options.
#[test]
fn const_reassignment_fails() {
    let err = run("const k = 1; k = 2", &Options::new()).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Const, .. }
    ));
}

/// Compound assignment counts as reassignment.
#[test]
fn const_compound_assignment_fails() {
    let err = run("const k = 1; k += 1", &Options::new()).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Const, .. }
    ));
}

/// Redeclaring a constant is rejected at parse time.
#[test]
fn const_redeclaration_is_a_parse_error() {
    let err = Engine::new().create_script("const k = 1; var k = 2").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Variable { .. } | ErrorKind::Parse(_)));
}

/// A constant without an initializer is malformed.
#[test]
fn const_requires_initializer() {
    let err = Engine::new().create_script("const k;").unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Parse(_)));
}

// =============================================================================
// 2. block-level redeclaration
// =============================================================================

/// Under lexical checking, redeclaring a name in the same block fails.
#[test]
fn same_block_redeclaration_fails_lexically() {
    let options = Options::new().lexical(true);
    let err = run("var x = 1; var x = 2", &options).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Redefined, .. }
    ));
    // without lexical checking the redeclaration shadows in place
    assert_eq!(run("var x = 1; var x = 2; x", &Options::new()).unwrap(), Value::Int(2));
}

/// A nested block may shadow an outer declaration.
#[test]
fn nested_block_shadowing_is_allowed() {
    let options = Options::new().lexical(true);
    assert_eq!(run("var x = 1; { var x = 2; } 'ok'", &options).unwrap(), Value::str("ok"));
}

/// `let` is block-scoped even when the lexical option is off.
#[test]
fn let_is_always_lexical() {
    let options = Options::new();
    let err = run("{ let y = 1; let y = 2; }", &options).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Redefined, .. }
    ));
}

// =============================================================================
// 3. shading
// =============================================================================

/// After its block exits, a `let` symbol is invisible; under shading it
/// does not fall back to the context and reads as undefined.
#[test]
fn shaded_symbol_is_invisible() {
    let options = Options::new().lexical_shade(true).strict(true);
    let err = run("{ let y = 2; } y", &options).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Undefined, .. }
    ));
}

/// Without shading, an out-of-block symbol falls through to the context.
#[test]
fn without_shade_context_wins() {
    let engine = Engine::new();
    let script = engine.create_script("{ let y = 2; } y").unwrap();
    let mut ctx = MapContext::new().with("y", Value::Int(9));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(9));
}

/// Re-entering a loop block redeclares its symbols cleanly.
#[test]
fn loop_blocks_redeclare_per_iteration() {
    let options = Options::new().lexical(true).lexical_shade(true);
    let source = "var s = 0; for (var i : 1..3) { let t = i * 2; s += t; } s";
    assert_eq!(run(source, &options).unwrap(), Value::Int(12));
}

// =============================================================================
// 4. lifecycle
// =============================================================================

/// A declared-but-unassigned variable falls through to the context, then
/// reads as undefined under strictness.
#[test]
fn declared_undefined_falls_to_context() {
    let engine = Engine::new();
    let script = engine.create_script("var x; x").unwrap();
    let mut ctx = MapContext::new().with("x", Value::Int(5));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(5));
    let err = script
        .execute_with(&mut MapContext::new(), &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Undefined, .. }
    ));
}

/// Catch variables are scoped to their handler block.
#[test]
fn catch_variable_is_block_scoped() {
    let options = Options::new().lexical_shade(true).strict(true);
    let err = run("try { throw 1 } catch (e) { e } e", &options).unwrap_err();
    assert!(matches!(
        err.kind(),
        ErrorKind::Variable { issue: VariableIssue::Undefined, .. }
    ));
}
