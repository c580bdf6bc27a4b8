//! End-to-end script evaluation: literals, control flow, loops, lambdas,
//! and the value surface of the built-in containers.

use elex::{Context, Engine, MapContext, Options, Value};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Engine::new()
        .create_script(source)
        .expect("script parses")
        .execute(&mut MapContext::new())
        .expect("script evaluates")
}

fn eval_with(source: &str, ctx: &mut MapContext) -> Value {
    Engine::new()
        .create_script(source)
        .expect("script parses")
        .execute(ctx)
        .expect("script evaluates")
}

// =============================================================================
// 1. expressions and literals
// =============================================================================

/// Locals feed arithmetic; the script yields the last statement's value.
#[test]
fn pythagoras_with_locals() {
    assert_eq!(eval("var x = 3; var y = 4; x * x + y * y"), Value::Int(25));
}

/// Integer division truncates; mixing in a real promotes the result.
#[test]
fn division_semantics() {
    assert_eq!(eval("3 / 2"), Value::Int(1));
    assert_eq!(eval("3.0 / 2"), Value::Real(1.5));
}

/// String concatenation applies when either operand is a string.
#[test]
fn add_concatenates_strings() {
    assert_eq!(eval("'n=' + 42"), Value::str("n=42"));
}

/// Array and map literals build the container values, `{:}` is the empty map.
#[test]
fn container_literals() {
    assert_eq!(eval("[1, 2, 3].size()"), Value::Int(3));
    assert_eq!(eval("{'a': 1, 'b': 2}['b']"), Value::Int(2));
    assert_eq!(eval("{'a': 1}.a"), Value::Int(1));
    assert_eq!(eval("size({:})"), Value::Int(0));
}

/// Set literals dedupe their elements; `{expr, expr}` is a set while
/// `{expr: expr}` stays a map.
#[test]
fn set_literals() {
    assert_eq!(eval("{1, 2, 2, 3}.size()"), Value::Int(3));
    assert_eq!(eval("{1, 2, 3}.contains(2)"), Value::Bool(true));
    assert_eq!(eval("var s = {1}; s.add(2); s.add(1); s.size()"), Value::Int(2));
    assert_eq!(eval("var s = {'a', 'b'}; s.remove('a'); s.size()"), Value::Int(1));
    assert_eq!(eval("var t = 0; for (v : {5, 6}) t += v; t"), Value::Int(11));
    assert_eq!(eval("empty({1})"), Value::Bool(false));
}

/// Ranges are inclusive and iterable in both directions.
#[test]
fn range_values() {
    assert_eq!(eval("(1..4).size()"), Value::Int(4));
    assert_eq!(eval("var s = 0; for (var i : 3..1) s = s * 10 + i; s"), Value::Int(321));
}

/// Big-integer literals and overflow promotion round-trip through math.
#[test]
fn big_integer_arithmetic() {
    assert_eq!(eval("9223372036854775807 + 1 - 1"), Value::Int(i64::MAX));
    assert_eq!(eval("2b + 3"), Value::Int(5));
}

// =============================================================================
// 2. short-circuits and conditionals
// =============================================================================

/// `&&` and `||` skip the right operand; `??` takes the first non-null.
#[test]
fn short_circuit_operators() {
    // the right side would fail if evaluated
    assert_eq!(eval("false && (1 / 0)"), Value::Bool(false));
    assert_eq!(eval("true || (1 / 0)"), Value::Bool(true));
    assert_eq!(eval("null ?? 2"), Value::Int(2));
    assert_eq!(eval("1 ?? 2"), Value::Int(1));
}

/// Ternary and elvis pick branches by truthiness.
#[test]
fn ternary_and_elvis() {
    assert_eq!(eval("1 > 0 ? 'yes' : 'no'"), Value::str("yes"));
    assert_eq!(eval("0 ?: 3"), Value::Int(3));
    assert_eq!(eval("7 ?: 3"), Value::Int(7));
}

/// Safe navigation over a null chain yields null under any strictness.
#[test]
fn safe_navigation_absorbs_null() {
    let mut ctx = MapContext::new().with("a", Value::Null);
    let script = Engine::new().create_script("a?.b?.c").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    let strict = Options::new().strict(true);
    assert_eq!(script.execute_with(&mut ctx, &strict).unwrap(), Value::Null);
}

// =============================================================================
// 3. loops
// =============================================================================

/// The classic three-part loop drives an accumulator.
#[test]
fn classic_for_loop() {
    assert_eq!(eval("var s = 0; for (var i = 0; i < 5; i = i + 1) s += i; s"), Value::Int(10));
}

/// `break` and `continue` unwind to the nearest enclosing loop.
#[test]
fn break_and_continue() {
    let source = "var s = 0; for (var i : 1..10) { if (i == 3) continue; if (i > 5) break; s += i; } s";
    assert_eq!(eval(source), Value::Int(12));
}

/// While and do-while loops terminate on a falsy condition.
#[test]
fn while_loops() {
    assert_eq!(eval("var n = 1; while (n < 100) n = n * 2; n"), Value::Int(128));
    assert_eq!(eval("var n = 0; do n += 1; while (n < 3); n"), Value::Int(3));
}

/// Iterating a map walks its values; an undeclared loop variable binds
/// through the context.
#[test]
fn foreach_over_containers() {
    assert_eq!(eval("var s = 0; for (v : {'a': 1, 'b': 2}) s += v; s"), Value::Int(3));
    assert_eq!(eval("var out = ''; for (c : 'abc') out += c; out"), Value::str("abc"));
}

// =============================================================================
// 4. lambdas and captures
// =============================================================================

/// An immediately invoked function computes a triangular number.
#[test]
fn iife_accumulates() {
    let source = "(function(n) { var acc = 0; for (var i : 1..n) acc += i; return acc; })(10)";
    assert_eq!(eval(source), Value::Int(55));
}

/// Arrow lambdas in both spellings.
#[test]
fn arrow_lambdas() {
    assert_eq!(eval("var f = (a, b) -> a + b; f(2, 3)"), Value::Int(5));
    assert_eq!(eval("var g = x => x * 2; g(4)"), Value::Int(8));
}

/// Capture is by reference: assignments after creation are observed.
#[test]
fn capture_sees_later_assignment() {
    assert_eq!(eval("var x = 1; var f = () -> x; x = 7; f()"), Value::Int(7));
}

/// A counter closure mutates its captured variable across calls.
#[test]
fn capture_mutation_persists() {
    let source = "var n = 0; var inc = () -> { n += 1; n }; inc(); inc(); inc()";
    assert_eq!(eval(source), Value::Int(3));
}

/// Lambdas escape to the host and stay invokable through the engine.
#[test]
fn lambda_escapes_to_host() {
    let engine = Engine::new();
    let script = engine.create_script("(a, b) -> a * b").unwrap();
    let mut ctx = MapContext::new();
    let lambda = script.execute(&mut ctx).unwrap();
    let result = engine.invoke(&lambda, &mut ctx, vec![Value::Int(6), Value::Int(7)]).unwrap();
    assert_eq!(result, Value::Int(42));
}

// =============================================================================
// 5. statements
// =============================================================================

/// Switch matches by equality, falls back to default, and `break` keeps
/// the arm's value.
#[test]
fn switch_statement() {
    let source = "switch (x) { case 1: 'one'; break; case 2: 'two'; default: 'many' }";
    let engine = Engine::new();
    let script = engine.create_script(source).unwrap();
    let run = |x: i64| {
        let mut ctx = MapContext::new().with("x", Value::Int(x));
        script.execute(&mut ctx).unwrap()
    };
    assert_eq!(run(1), Value::str("one"));
    assert_eq!(run(2), Value::str("two"));
    assert_eq!(run(9), Value::str("many"));
}

/// try/catch binds the thrown value; finally always runs.
#[test]
fn try_catch_finally() {
    let source = "var log = ''; try { throw 'boom' } catch (e) { log += e } finally { log += '!' } log";
    assert_eq!(eval(source), Value::str("boom!"));
}

/// An uncaught user throw surfaces the thrown value to the host.
#[test]
fn uncaught_throw_surfaces() {
    let err = Engine::new()
        .create_script("throw 42")
        .unwrap()
        .execute(&mut MapContext::new())
        .unwrap_err();
    assert_eq!(err.to_value(), Value::Int(42));
}

/// Context variables read and write through the host map.
#[test]
fn context_round_trip() {
    let mut ctx = MapContext::new().with("seed", Value::Int(20));
    assert_eq!(eval_with("answer = seed * 2 + 2; answer", &mut ctx), Value::Int(42));
    assert_eq!(ctx.get("answer"), Some(Value::Int(42)));
}

/// Pragmas surface through script metadata and do not evaluate.
#[test]
fn pragmas_are_metadata() {
    let engine = Engine::new();
    let script = engine.create_script("#pragma my.option 42\n1 + 1").unwrap();
    assert_eq!(script.pragmas().get("my.option"), Some(&Value::Int(42)));
    assert_eq!(script.execute(&mut MapContext::new()).unwrap(), Value::Int(2));
}

/// Dialect flags record which lambda arrows a script used.
#[test]
fn features_track_arrows() {
    let engine = Engine::new();
    let script = engine.create_script("var f = x => x; var g = y -> y; f(g(1))").unwrap();
    let features = script.features();
    assert!(features.fat_arrow);
    assert!(features.thin_arrow);
}

// =============================================================================
// 6. built-in value methods
// =============================================================================

/// String methods resolve through the introspection pipeline.
#[test]
fn string_methods() {
    assert_eq!(eval("'hello'.toUpperCase()"), Value::str("HELLO"));
    assert_eq!(eval("'hello'.indexOf('ll')"), Value::Int(2));
    assert_eq!(eval("'a,b,c'.split(',').size()"), Value::Int(3));
    assert_eq!(eval("'  x '.trim()"), Value::str("x"));
}

/// Array methods, including the mutating `add`.
#[test]
fn array_methods() {
    assert_eq!(eval("var a = [1, 2]; a.add(3); a.size()"), Value::Int(3));
    assert_eq!(eval("[1, 2, 3].contains(2)"), Value::Bool(true));
    assert_eq!(eval("['a', 'b'].join('-')"), Value::str("a-b"));
}

/// Map methods cover keyed reads and writes.
#[test]
fn map_methods() {
    assert_eq!(eval("var m = {'a': 1}; m.put('b', 2); m.size()"), Value::Int(2));
    assert_eq!(eval("{'a': 1}.containsKey('a')"), Value::Bool(true));
    assert_eq!(eval("{'a': 1, 'b': 2}.keys().size()"), Value::Int(2));
}

/// Index assignment writes through arrays and maps.
#[test]
fn index_assignment() {
    assert_eq!(eval("var a = [1, 2, 3]; a[1] = 9; a[1]"), Value::Int(9));
    assert_eq!(eval("var m = {'k': 1}; m['k'] = 5; m['k']"), Value::Int(5));
}

/// `empty` and `size` prefix operators apply across value types.
#[test]
fn empty_and_size_operators() {
    assert_eq!(eval("empty('')"), Value::Bool(true));
    assert_eq!(eval("empty([1])"), Value::Bool(false));
    assert_eq!(eval("empty(null)"), Value::Bool(true));
    assert_eq!(eval("size('abcd')"), Value::Int(4));
    assert_eq!(eval("size({'a': 1})"), Value::Int(1));
}
