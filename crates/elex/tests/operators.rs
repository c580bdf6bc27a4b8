//! Operator dispatch: user overloads, the two-sided compare fallback, the
//! null-operand policy, the containment family, and compound assignment.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use elex::{DefaultArithmetic, Engine, ErrorKind, MapContext, Operator, Options, OverloadTable, Shape, Value};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Engine::new()
        .create_script(source)
        .expect("script parses")
        .execute(&mut MapContext::new())
        .expect("script evaluates")
}

// =============================================================================
// 1. user overloads
// =============================================================================

/// A registered overload wins over the built-in operation, and the cached
/// resolution is reused across evaluations of the same tree.
#[test]
fn add_overload_wins_and_is_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let table = OverloadTable::new().register(Operator::Add, [Shape::Str, Shape::Str], move |args| {
        seen.fetch_add(1, Ordering::Relaxed);
        Ok(Value::str(format!("{}|{}", args[0], args[1])))
    });
    let engine = Engine::builder()
        .arithmetic(DefaultArithmetic::new().with_overloads(table))
        .build();
    let script = engine.create_script("a + b").unwrap();
    let mut ctx = MapContext::new().with("a", Value::str("x")).with("b", Value::str("y"));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("x|y"));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("x|y"));
    assert_eq!(calls.load(Ordering::Relaxed), 2);

    // a shape change falls back to the built-in without disturbing the
    // overload
    ctx.insert("a", Value::Int(1));
    ctx.insert("b", Value::Int(2));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(3));
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

/// Arguments narrow once before overload selection, so an overload on
/// integers matches widened real operands.
#[test]
fn narrowing_finds_integer_overload() {
    let table = OverloadTable::new().register(Operator::Add, [Shape::Int, Shape::Int], |_| Ok(Value::Int(100)));
    let engine = Engine::builder()
        .arithmetic(DefaultArithmetic::new().with_overloads(table))
        .build();
    let mut ctx = MapContext::new();
    assert_eq!(engine.evaluate("2.0 + 3.0", &mut ctx).unwrap(), Value::Int(100));
    // a fractional operand cannot narrow; the built-in runs
    assert_eq!(engine.evaluate("2.5 + 3.0", &mut ctx).unwrap(), Value::Real(5.5));
}

// =============================================================================
// 2. comparison dispatch
// =============================================================================

/// With only a `compare` overload registered, `==` interprets its sign;
/// the reversed direction negates.
#[test]
fn compare_overload_backs_equality() {
    let table = OverloadTable::new().register(Operator::Compare, [Shape::Int, Shape::Int], |args| {
        let (l, r) = (args[0].as_int().unwrap_or(0), args[1].as_int().unwrap_or(0));
        Ok(Value::Int(l - r))
    });
    let engine = Engine::builder()
        .arithmetic(DefaultArithmetic::new().with_overloads(table))
        .build();
    let mut ctx = MapContext::new().with("x", Value::Int(2)).with("y", Value::Int(2));
    assert_eq!(engine.evaluate("x == y", &mut ctx).unwrap(), Value::Bool(true));
    assert_eq!(engine.evaluate("x < y", &mut ctx).unwrap(), Value::Bool(false));
    assert_eq!(engine.evaluate("x <= y", &mut ctx).unwrap(), Value::Bool(true));
    ctx.insert("y", Value::Int(5));
    assert_eq!(engine.evaluate("x != y", &mut ctx).unwrap(), Value::Bool(true));
    assert_eq!(engine.evaluate("x > y", &mut ctx).unwrap(), Value::Bool(false));
}

/// Numeric comparison promotes across representations; strings compare
/// lexicographically.
#[test]
fn builtin_comparisons() {
    assert_eq!(eval("1 == 1.0"), Value::Bool(true));
    assert_eq!(eval("'2' == 2"), Value::Bool(true));
    assert_eq!(eval("'abc' < 'abd'"), Value::Bool(true));
    assert_eq!(eval("3 ge 3"), Value::Bool(true));
}

// =============================================================================
// 3. null-operand policy
// =============================================================================

/// A null reaching a strict operator under strict evaluation fails with a
/// null-operand error.
#[test]
fn strict_null_operand_fails() {
    let engine = Engine::new();
    let script = engine.create_script("x + 1").unwrap();
    let mut ctx = MapContext::new().with("x", Value::Null);
    let err = script
        .execute_with(&mut ctx, &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NullOperand { symbol: "+" }));
    // lenient evaluation coerces the null to zero
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(1));
}

/// The same operator under the condition of a ternary is protected and
/// yields null silently.
#[test]
fn ternary_protection_absorbs_null_operand() {
    let engine = Engine::new();
    let script = engine.create_script("(x + 1) ? 'y' : 'n'").unwrap();
    let mut ctx = MapContext::new().with("x", Value::Null);
    let strict = Options::new().strict(true);
    assert_eq!(script.execute_with(&mut ctx, &strict).unwrap(), Value::str("n"));
}

/// Equality stays lenient for nulls even under strict evaluation.
#[test]
fn equality_is_null_lenient() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("x", Value::Null);
    let script = engine.create_script("x == null").unwrap();
    let strict = Options::new().strict(true);
    assert_eq!(script.execute_with(&mut ctx, &strict).unwrap(), Value::Bool(true));
}

// =============================================================================
// 4. containment family
// =============================================================================

/// `=~` matches regular expressions on strings, membership on containers.
#[test]
fn contains_operator() {
    assert_eq!(eval("'abc' =~ 'a.c'"), Value::Bool(true));
    assert_eq!(eval("'abc' =~ 'x.*'"), Value::Bool(false));
    assert_eq!(eval("2 =~ [1, 2, 3]"), Value::Bool(true));
    assert_eq!(eval("'k' =~ {'k': 1}"), Value::Bool(true));
    assert_eq!(eval("2 =~ {1, 2, 3}"), Value::Bool(true));
    assert_eq!(eval("5 =~ 1..10"), Value::Bool(true));
    assert_eq!(eval("4 !~ [1, 2, 3]"), Value::Bool(true));
}

/// Prefix and suffix operators with their negated variants.
#[test]
fn starts_and_ends_with() {
    assert_eq!(eval("'abc' =^ 'ab'"), Value::Bool(true));
    assert_eq!(eval("'abc' !^ 'b'"), Value::Bool(true));
    assert_eq!(eval("'abc' =$ 'bc'"), Value::Bool(true));
    assert_eq!(eval("'abc' !$ 'xy'"), Value::Bool(true));
}

// =============================================================================
// 5. compound assignment and stepping
// =============================================================================

/// Every compound operator writes the combined value back.
#[test]
fn compound_assignment() {
    assert_eq!(eval("var x = 5; x += 3; x"), Value::Int(8));
    assert_eq!(eval("var x = 5; x -= 3; x"), Value::Int(2));
    assert_eq!(eval("var x = 5; x *= 3; x"), Value::Int(15));
    assert_eq!(eval("var x = 7; x /= 2; x"), Value::Int(3));
    assert_eq!(eval("var x = 7; x %= 4; x"), Value::Int(3));
    assert_eq!(eval("var x = 6; x &= 3; x"), Value::Int(2));
    assert_eq!(eval("var x = 6; x |= 1; x"), Value::Int(7));
    assert_eq!(eval("var x = 6; x ^= 3; x"), Value::Int(5));
    assert_eq!(eval("var x = 1; x <<= 4; x"), Value::Int(16));
    assert_eq!(eval("var x = 16; x >>= 2; x"), Value::Int(4));
    assert_eq!(eval("var x = -1; x >>>= 60; x"), Value::Int(15));
}

/// A compound overload may fully produce the assigned value.
#[test]
fn compound_overload_produces_assigned_value() {
    let table = OverloadTable::new().register(Operator::SelfAdd, [Shape::Str, Shape::Str], |args| {
        Ok(Value::str(format!("{}+{}", args[0], args[1])))
    });
    let engine = Engine::builder()
        .arithmetic(DefaultArithmetic::new().with_overloads(table))
        .build();
    let mut ctx = MapContext::new();
    assert_eq!(
        engine
            .create_script("var s = 'a'; s += 'b'; s")
            .unwrap()
            .execute(&mut ctx)
            .unwrap(),
        Value::str("a+b")
    );
}

/// Prefix stepping yields the new value, postfix the prior one; compound
/// writes land on container elements too.
#[test]
fn increment_and_decrement() {
    assert_eq!(eval("var i = 1; var a = i++; var b = ++i; [a, b, i]"),
        Value::array(vec![Value::Int(1), Value::Int(3), Value::Int(3)]));
    assert_eq!(eval("var i = 5; i--; --i; i"), Value::Int(3));
    assert_eq!(eval("var m = {'n': 1}; m['n'] += 9; m['n']"), Value::Int(10));
    assert_eq!(eval("var a = [1, 2]; a[0]++; a[0]"), Value::Int(2));
}

// =============================================================================
// 6. unary operators
// =============================================================================

/// Negation, complement, and logical not across value kinds.
#[test]
fn unary_operators() {
    assert_eq!(eval("-(3)"), Value::Int(-3));
    assert_eq!(eval("~5"), Value::Int(!5));
    assert_eq!(eval("!true"), Value::Bool(false));
    assert_eq!(eval("!null"), Value::Bool(true));
    assert_eq!(eval("not false"), Value::Bool(true));
    assert_eq!(eval("-2.5"), Value::Real(-2.5));
}

/// Shifts follow 64-bit semantics, with `>>>` zero-filling.
#[test]
fn shift_operators() {
    assert_eq!(eval("1 << 10"), Value::Int(1024));
    assert_eq!(eval("-8 >> 1"), Value::Int(-4));
    assert_eq!(eval("-1 >>> 56"), Value::Int(255));
}
