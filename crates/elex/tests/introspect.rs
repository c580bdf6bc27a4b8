//! Host-object integration: capability descriptors, the resolver pipeline,
//! permissions, constructors, namespaces, iteration, and resource release.

use std::sync::{
    Arc, Mutex, OnceLock,
    atomic::{AtomicI64, AtomicUsize, Ordering},
};

use elex::{
    ClassDescriptor, Context, Engine, ErrorKind, EvalError, HostObject, MapContext, Options, Permissions, Shape,
    Value, downcast_host,
};
use pretty_assertions::assert_eq;

// =============================================================================
// fixtures
// =============================================================================

/// A mutable 2D point with bean-style properties and a method overload.
#[derive(Debug)]
struct Point {
    x: AtomicI64,
    y: AtomicI64,
}

impl Point {
    fn new(x: i64, y: i64) -> Self {
        Self {
            x: AtomicI64::new(x),
            y: AtomicI64::new(y),
        }
    }

    fn class() -> Arc<ClassDescriptor> {
        static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
        CLASS
            .get_or_init(|| {
                let get = |f: fn(&Point) -> i64| {
                    move |v: &Value| {
                        let p = downcast_host::<Point>(v).ok_or_else(|| EvalError::property("point", true))?;
                        Ok(Value::Int(f(p)))
                    }
                };
                ClassDescriptor::builder("acme.geo.Point")
                    .property(
                        "x",
                        get(|p| p.x.load(Ordering::Relaxed)),
                        |v, value| {
                            let p = downcast_host::<Point>(v).ok_or_else(|| EvalError::property("point", true))?;
                            p.x.store(value.as_int().unwrap_or(0), Ordering::Relaxed);
                            Ok(())
                        },
                    )
                    .property_get("y", get(|p| p.y.load(Ordering::Relaxed)))
                    .property_get("secret", |_| Ok(Value::str("classified")))
                    .method("norm2", [], |v, _| {
                        let p = downcast_host::<Point>(v).ok_or_else(|| EvalError::method("norm2"))?;
                        let (x, y) = (p.x.load(Ordering::Relaxed), p.y.load(Ordering::Relaxed));
                        Ok(Value::Int(x * x + y * y))
                    })
                    .method("scaled", [Shape::Int], |v, args| {
                        let p = downcast_host::<Point>(v).ok_or_else(|| EvalError::method("scaled"))?;
                        let k = args[0].as_int().unwrap_or(1);
                        Ok(Value::object(Point::new(
                            p.x.load(Ordering::Relaxed) * k,
                            p.y.load(Ordering::Relaxed) * k,
                        )))
                    })
                    .constructor([Shape::Int, Shape::Int], |args| {
                        Ok(Value::object(Point::new(
                            args[0].as_int().unwrap_or(0),
                            args[1].as_int().unwrap_or(0),
                        )))
                    })
                    .build()
            })
            .clone()
    }
}

impl HostObject for Point {
    fn descriptor(&self) -> Arc<ClassDescriptor> {
        Point::class()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A duck-typed keyed store exposing `get`/`set` methods and an iterator.
#[derive(Debug, Default)]
struct Bag {
    entries: Mutex<Vec<(String, Value)>>,
}

impl Bag {
    fn class() -> Arc<ClassDescriptor> {
        static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
        CLASS
            .get_or_init(|| {
                ClassDescriptor::builder("acme.util.Bag")
                    .method("get", [Shape::Str], |v, args| {
                        let bag = downcast_host::<Bag>(v).ok_or_else(|| EvalError::method("get"))?;
                        let key = args[0].as_str().unwrap_or_default();
                        let entries = bag.entries.lock().expect("bag lock");
                        Ok(entries
                            .iter()
                            .find(|(k, _)| k == key)
                            .map(|(_, v)| v.clone())
                            .unwrap_or(Value::Null))
                    })
                    .method("set", [Shape::Str, Shape::Any], |v, args| {
                        let bag = downcast_host::<Bag>(v).ok_or_else(|| EvalError::method("set"))?;
                        let key = args[0].as_str().unwrap_or_default().to_owned();
                        let mut entries = bag.entries.lock().expect("bag lock");
                        entries.retain(|(k, _)| *k != key);
                        entries.push((key, args[1].clone()));
                        Ok(Value::Null)
                    })
                    .method("iterator", [], |v, _| {
                        let bag = downcast_host::<Bag>(v).ok_or_else(|| EvalError::method("iterator"))?;
                        let entries = bag.entries.lock().expect("bag lock");
                        Ok(Value::array(entries.iter().map(|(_, v)| v.clone()).collect()))
                    })
                    .build()
            })
            .clone()
    }
}

impl HostObject for Bag {
    fn descriptor(&self) -> Arc<ClassDescriptor> {
        Bag::class()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A resource counting its `close()` calls.
#[derive(Debug, Default)]
struct Gate {
    closed: AtomicUsize,
    fail_on_close: bool,
}

impl Gate {
    fn class() -> Arc<ClassDescriptor> {
        static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
        CLASS
            .get_or_init(|| {
                ClassDescriptor::builder("acme.io.Gate")
                    .method("close", [], |v, _| {
                        let gate = downcast_host::<Gate>(v).ok_or_else(|| EvalError::method("close"))?;
                        gate.closed.fetch_add(1, Ordering::Relaxed);
                        if gate.fail_on_close {
                            return Err(EvalError::method("close failed"));
                        }
                        Ok(Value::Null)
                    })
                    .build()
            })
            .clone()
    }
}

impl HostObject for Gate {
    fn descriptor(&self) -> Arc<ClassDescriptor> {
        Gate::class()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// =============================================================================
// 1. property and method resolution
// =============================================================================

/// Bean-style properties read and write through the descriptor, including
/// the flipped-spelling lookup.
#[test]
fn host_properties_read_and_write() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("p", Value::object(Point::new(1, 2)));
    assert_eq!(engine.evaluate("p.x + p.y", &mut ctx).unwrap(), Value::Int(3));
    assert_eq!(engine.evaluate("p.X", &mut ctx).unwrap(), Value::Int(1));
    let script = engine.create_script("p.x = 40; p.x + p.y").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(42));
}

/// Methods resolve by name and argument shape; results chain.
#[test]
fn host_methods_and_chaining() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("p", Value::object(Point::new(3, 4)));
    assert_eq!(engine.evaluate("p.norm2()", &mut ctx).unwrap(), Value::Int(25));
    assert_eq!(engine.evaluate("p.scaled(2).norm2()", &mut ctx).unwrap(), Value::Int(100));
}

/// The cached executor survives re-evaluation and fails over when the
/// operand shape changes under the same tree.
#[test]
fn node_cache_failover() {
    let engine = Engine::new();
    let script = engine.create_script("v.x").unwrap();
    let mut ctx = MapContext::new().with("v", Value::object(Point::new(7, 0)));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(7));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(7));
    // same tree, different target shape: a map now serves the property
    let mut map = elex::ValueMap::default();
    map.insert(elex::MapKey::Str("x".into()), Value::Int(11));
    ctx.insert("v", Value::map(map));
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(11));
}

/// Duck-typed `get`/`set` methods back index access on host objects.
#[test]
fn duck_typed_keyed_access() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("bag", Value::object(Bag::default()));
    let script = engine.create_script("bag['k'] = 5; bag['k'] + 1").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(6));
}

/// A host object exposing `iterator()` drives `for (x : obj)`.
#[test]
fn host_iterator_drives_foreach() {
    let engine = Engine::new();
    let bag = Bag::default();
    bag.entries.lock().unwrap().extend([
        ("a".to_owned(), Value::Int(1)),
        ("b".to_owned(), Value::Int(2)),
        ("c".to_owned(), Value::Int(3)),
    ]);
    let mut ctx = MapContext::new().with("bag", Value::object(bag));
    let script = engine.create_script("var s = 0; for (v : bag) s += v; s").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Int(6));
}

// =============================================================================
// 2. permissions
// =============================================================================

/// A denied member never resolves; under strictness it is an undefined
/// property, leniently it reads as null.
#[test]
fn denied_member_is_invisible() {
    let engine = Engine::builder()
        .permissions(Permissions::parse(["acme.geo.Point#secret"]))
        .build();
    let mut ctx = MapContext::new().with("p", Value::object(Point::new(0, 0)));
    let script = engine.create_script("p.secret").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::Null);
    let err = script
        .execute_with(&mut ctx, &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Property { .. }));
    // allowed members on the same class still resolve
    assert_eq!(engine.evaluate("p.x", &mut ctx).unwrap(), Value::Int(0));
}

/// A denied class exposes nothing at all.
#[test]
fn denied_class_is_invisible() {
    let engine = Engine::builder()
        .permissions(Permissions::parse(["!acme.geo.*"]))
        .build();
    let mut ctx = MapContext::new().with("p", Value::object(Point::new(1, 1)));
    let err = engine
        .create_script("p.norm2()")
        .unwrap()
        .execute_with(&mut ctx, &Options::new().strict(true))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Method { .. }));
}

/// Collapsing the shared tier bumps the version and rebuilds on demand.
#[test]
fn introspection_tier_versioning() {
    let engine = Engine::new();
    let mut ctx = MapContext::new().with("p", Value::object(Point::new(2, 3)));
    let before = engine.introspection_version();
    assert_eq!(engine.evaluate("p.norm2()", &mut ctx).unwrap(), Value::Int(13));
    engine.clear_caches();
    assert_eq!(engine.introspection_version(), before + 1);
    // lookups repopulate transparently
    assert_eq!(engine.evaluate("p.norm2()", &mut ctx).unwrap(), Value::Int(13));
}

// =============================================================================
// 3. constructors and namespaces
// =============================================================================

/// `new` resolves a registered class by qualified name or through the
/// import list, with the constructor matched by shape.
#[test]
fn constructor_resolution() {
    let engine = Engine::builder().register_class(Point::class()).build();
    let mut ctx = MapContext::new();
    assert_eq!(
        engine.evaluate("new acme.geo.Point(3, 4).norm2()", &mut ctx).unwrap(),
        Value::Int(25)
    );
    let options = Options::new().import("acme.geo");
    let script = engine.create_script("new Point(6, 8).norm2()").unwrap();
    assert_eq!(script.execute_with(&mut ctx, &options).unwrap(), Value::Int(100));
}

/// A class handle bound to a namespace prefix serves static-style calls.
#[test]
fn static_namespace_dispatch() {
    let text_class = ClassDescriptor::builder("acme.text.Text")
        .method("upper", [Shape::Str], |_, args| {
            Ok(Value::str(args[0].as_str().unwrap_or_default().to_uppercase()))
        })
        .build();
    let engine = Engine::builder().namespace("text", Value::Class(text_class)).build();
    let mut ctx = MapContext::new();
    assert_eq!(engine.evaluate("text:upper('abc')", &mut ctx).unwrap(), Value::str("ABC"));
}

/// A namespace class with a context-bound constructor produces a functor
/// once per evaluation.
#[test]
fn functor_namespace_binds_context() {
    static BUILT: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct Greeter {
        greeting: String,
    }

    impl HostObject for Greeter {
        fn descriptor(&self) -> Arc<ClassDescriptor> {
            static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
            CLASS
                .get_or_init(|| {
                    ClassDescriptor::builder("acme.util.Greeter")
                        .method("greet", [Shape::Str], |v, args| {
                            let g = downcast_host::<Greeter>(v).ok_or_else(|| EvalError::method("greet"))?;
                            Ok(Value::str(format!("{} {}", g.greeting, args[0])))
                        })
                        .build()
                })
                .clone()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    let greeter_class = ClassDescriptor::builder("acme.util.GreeterFactory")
        .functor(|ctx| {
            BUILT.fetch_add(1, Ordering::Relaxed);
            let greeting = ctx
                .get("greeting")
                .and_then(|v| v.as_str().map(ToOwned::to_owned))
                .unwrap_or_else(|| "hello".to_owned());
            Ok(Value::object(Greeter { greeting }))
        })
        .build();
    let engine = Engine::builder().namespace("greet", Value::Class(greeter_class)).build();
    let mut ctx = MapContext::new().with("greeting", Value::str("hi"));
    let script = engine
        .create_script("greet:greet('bob') + ', ' + greet:greet('eve')")
        .unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("hi bob, hi eve"));
    // one functor instantiation per evaluation, not per call
    assert_eq!(BUILT.load(Ordering::Relaxed), 1);
}

// =============================================================================
// 4. resource release
// =============================================================================

/// Every acquired resource receives exactly one close on the normal path.
#[test]
fn resources_close_once_on_normal_exit() {
    let engine = Engine::new();
    let gate = Value::object(Gate::default());
    let mut ctx = MapContext::new().with("g", gate.clone());
    let script = engine.create_script("try (var r = g) { 'done' }").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("done"));
    let Value::Object(object) = &gate else { unreachable!() };
    let gate = object.as_any().downcast_ref::<Gate>().unwrap();
    assert_eq!(gate.closed.load(Ordering::Relaxed), 1);
}

/// Resources close in reverse order on the exceptional path too, and the
/// exception still reaches the catch handler.
#[test]
fn resources_close_on_exceptional_exit() {
    let engine = Engine::new();
    let a = Value::object(Gate::default());
    let b = Value::object(Gate::default());
    let mut ctx = MapContext::new().with("a", a.clone()).with("b", b.clone());
    let script = engine
        .create_script("try (var x = a; var y = b) { throw 'boom' } catch (e) { e }")
        .unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("boom"));
    for gate in [&a, &b] {
        let Value::Object(object) = gate else { unreachable!() };
        assert_eq!(object.as_any().downcast_ref::<Gate>().unwrap().closed.load(Ordering::Relaxed), 1);
    }
}

/// A close failure on an otherwise-normal exit surfaces; during an
/// unwind it is suppressed in favour of the original error.
#[test]
fn close_failure_policy() {
    let engine = Engine::new();
    let failing = Value::object(Gate {
        closed: AtomicUsize::new(0),
        fail_on_close: true,
    });
    let mut ctx = MapContext::new().with("g", failing);
    let err = engine
        .create_script("try (var r = g) { 'fine' }")
        .unwrap()
        .execute(&mut ctx)
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Method { .. }));

    let script = engine.create_script("try (var r = g) { throw 'original' } catch (e) { e }").unwrap();
    assert_eq!(script.execute(&mut ctx).unwrap(), Value::str("original"));
}
