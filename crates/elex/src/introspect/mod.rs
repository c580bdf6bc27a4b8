//! Member discovery and executor resolution.
//!
//! Given a runtime value and an identifier (name or index), the
//! `Introspector` returns an executor that reads, writes, or calls one
//! member of that value. Property access runs an ordered resolver pipeline
//! produced by a pluggable strategy; per-class discovery is cached in a
//! process-shared, permission-filtered, versioned tier.

mod builtins;
mod class;
mod classmap;
mod executors;
mod permissions;
mod resolvers;

use std::sync::Arc;

use ahash::RandomState;
use dashmap::DashMap;

pub use class::{
    ClassBuilder, ClassDescriptor, ContainerDef, CtorDef, CtorFn, FunctorFn, GetterFn, HostObject, KeyedGetFn,
    KeyedSetFn, MethodDef, MethodFn, PropertyDef, SetterFn, downcast_host,
};
pub use permissions::Permissions;
pub use resolvers::{DefaultStrategy, ResolverKind, ResolverStrategy};

pub(crate) use classmap::{ClassInfo, ClassMap};
pub(crate) use executors::{MethodExec, PropertyGetExec, PropertySetExec, TryResult, TrySet, key_index};

use crate::{
    operators::Operator,
    value::{RangeIter, Value},
};
use executors::{
    BoundCtor, BoundMethod, ContainerGet, ContainerSet, DuckGet, DuckSet, ListGet, ListSet, MapGet, MapSet, NamedGet,
    NamedSet,
};

/// An iterator over a value, as produced by [`Introspector::get_iterator`].
///
/// Container iteration snapshots the elements, so mutation during the loop
/// does not invalidate the walk.
#[derive(Debug)]
pub(crate) enum ValueIter {
    Range(RangeIter),
    Items(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Range(range) => range.next().map(Value::Int),
            Self::Items(items) => items.next(),
        }
    }
}

/// Front door for member discovery, shared by all interpreters of an engine.
#[derive(Debug)]
pub(crate) struct Introspector {
    class_map: ClassMap,
    registry: DashMap<Arc<str>, Arc<ClassDescriptor>, RandomState>,
    permissions: Permissions,
    strategy: Arc<dyn ResolverStrategy>,
}

impl Introspector {
    pub fn new(permissions: Permissions, strategy: Arc<dyn ResolverStrategy>) -> Self {
        Self {
            class_map: ClassMap::new(),
            registry: DashMap::default(),
            permissions,
            strategy,
        }
    }

    /// Registers a class for by-name lookup (`new` expressions, import
    /// resolution, static namespaces).
    pub fn register_class(&self, descriptor: Arc<ClassDescriptor>) {
        self.registry.insert(descriptor.name().clone(), descriptor);
    }

    /// Looks a class up by its dotted name, subject to permissions.
    pub fn class_by_name(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        if !self.permissions.allow_class(name) {
            return None;
        }
        self.registry.get(name).map(|entry| entry.clone())
    }

    /// Current version of the shared class tier. Bumped on every
    /// [`Self::clear_cache`], letting downstream caches detect collapse.
    pub fn version(&self) -> u64 {
        self.class_map.version()
    }

    /// Drops the shared class tier; subsequent lookups repopulate it.
    pub fn clear_cache(&self) {
        self.class_map.clear();
    }

    /// The filtered class view for a value, covering both host objects and
    /// the built-in container types.
    fn info_for(&self, target: &Value) -> Option<Arc<ClassInfo>> {
        let descriptor = builtins::descriptor_of(target)?;
        self.class_map.info(&descriptor, &self.permissions)
    }

    /// Resolves a method overload by name and argument shapes.
    pub fn get_method(&self, target: &Value, name: &str, args: &[Value]) -> Option<Arc<dyn MethodExec>> {
        let info = self.info_for(target)?;
        let def = info.methods.get(name)?.iter().find(|def| def.matches(args))?;
        Some(Arc::new(BoundMethod {
            shape: target.shape(),
            def: def.clone(),
        }))
    }

    /// Runs the resolver pipeline for a property read.
    pub fn get_property_get(
        &self,
        op: Option<Operator>,
        target: &Value,
        key: &Value,
    ) -> Option<Arc<dyn PropertyGetExec>> {
        let info = self.info_for(target);
        let class = info.as_ref().map(|i| i.descriptor.name().clone());
        for kind in self.strategy.resolvers(op, target) {
            match kind {
                ResolverKind::Property => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    let Value::Str(spelling) = key else { continue };
                    if let Some(def) = named_lookup(&info.properties, spelling)
                        && let Some(getter) = &def.getter
                    {
                        return Some(Arc::new(NamedGet {
                            class: class.clone(),
                            name: spelling.clone(),
                            getter: getter.clone(),
                        }));
                    }
                }
                ResolverKind::Map => {
                    if matches!(target, Value::Map(_)) {
                        return Some(Arc::new(MapGet));
                    }
                }
                ResolverKind::List => {
                    if matches!(target, Value::Array(_)) && key_index(key).is_some() {
                        return Some(Arc::new(ListGet));
                    }
                }
                ResolverKind::Duck => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) if matches!(target, Value::Object(_)) => (i, c),
                        _ => continue,
                    };
                    let args = [key.clone()];
                    if let Some(def) = info.methods.get("get").and_then(|defs| defs.iter().find(|d| d.matches(&args))) {
                        return Some(Arc::new(DuckGet {
                            class: class.clone(),
                            def: def.clone(),
                        }));
                    }
                }
                ResolverKind::Field => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    let Value::Str(spelling) = key else { continue };
                    if let Some(def) = named_lookup(&info.fields, spelling)
                        && let Some(getter) = &def.getter
                    {
                        return Some(Arc::new(NamedGet {
                            class: class.clone(),
                            name: spelling.clone(),
                            getter: getter.clone(),
                        }));
                    }
                }
                ResolverKind::Container => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    if let Some(container) = &info.container {
                        return Some(Arc::new(ContainerGet {
                            class: class.clone(),
                            get: container.get.clone(),
                        }));
                    }
                }
            }
        }
        None
    }

    /// Runs the resolver pipeline for a property write.
    pub fn get_property_set(
        &self,
        op: Option<Operator>,
        target: &Value,
        key: &Value,
        value: &Value,
    ) -> Option<Arc<dyn PropertySetExec>> {
        let info = self.info_for(target);
        let class = info.as_ref().map(|i| i.descriptor.name().clone());
        for kind in self.strategy.resolvers(op, target) {
            match kind {
                ResolverKind::Property => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    let Value::Str(spelling) = key else { continue };
                    if let Some(def) = named_lookup(&info.properties, spelling)
                        && let Some(setter) = &def.setter
                    {
                        return Some(Arc::new(NamedSet {
                            class: class.clone(),
                            name: spelling.clone(),
                            setter: setter.clone(),
                        }));
                    }
                }
                ResolverKind::Map => {
                    if matches!(target, Value::Map(_)) {
                        return Some(Arc::new(MapSet));
                    }
                }
                ResolverKind::List => {
                    if matches!(target, Value::Array(_)) && key_index(key).is_some() {
                        return Some(Arc::new(ListSet));
                    }
                }
                ResolverKind::Duck => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) if matches!(target, Value::Object(_)) => (i, c),
                        _ => continue,
                    };
                    let args = [key.clone(), value.clone()];
                    if let Some(def) = info.methods.get("set").and_then(|defs| defs.iter().find(|d| d.matches(&args))) {
                        return Some(Arc::new(DuckSet {
                            class: class.clone(),
                            def: def.clone(),
                        }));
                    }
                }
                ResolverKind::Field => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    let Value::Str(spelling) = key else { continue };
                    if let Some(def) = named_lookup(&info.fields, spelling)
                        && let Some(setter) = &def.setter
                    {
                        return Some(Arc::new(NamedSet {
                            class: class.clone(),
                            name: spelling.clone(),
                            setter: setter.clone(),
                        }));
                    }
                }
                ResolverKind::Container => {
                    let (info, class) = match (&info, &class) {
                        (Some(i), Some(c)) => (i, c),
                        _ => continue,
                    };
                    if let Some(container) = &info.container
                        && let Some(set) = &container.set
                    {
                        return Some(Arc::new(ContainerSet {
                            class: class.clone(),
                            set: set.clone(),
                        }));
                    }
                }
            }
        }
        None
    }

    /// Resolves a constructor overload for a class handle.
    pub fn get_constructor(&self, class: &Arc<ClassDescriptor>, args: &[Value]) -> Option<Arc<dyn MethodExec>> {
        let info = self.class_map.info(class, &self.permissions)?;
        let def = info.constructors.iter().find(|def| def.matches(args))?;
        Some(Arc::new(BoundCtor {
            class: class.name().clone(),
            def: def.clone(),
        }))
    }

    /// Obtains an iterator over a value: ranges, arrays, map values,
    /// strings (per character), and host objects exposing a no-argument
    /// `iterator()` method returning an iterable value.
    pub fn get_iterator(&self, value: &Value) -> Option<ValueIter> {
        match value {
            Value::Range(range) => Some(ValueIter::Range(range.iter())),
            Value::Array(items) => {
                let items = items.read().expect("array lock poisoned");
                Some(ValueIter::Items(items.clone().into_iter()))
            }
            Value::Map(map) => {
                let map = map.read().expect("map lock poisoned");
                Some(ValueIter::Items(map.values().cloned().collect::<Vec<_>>().into_iter()))
            }
            Value::Set(set) => {
                let set = set.read().expect("set lock poisoned");
                Some(ValueIter::Items(
                    set.iter().map(crate::value::MapKey::to_value).collect::<Vec<_>>().into_iter(),
                ))
            }
            Value::Str(s) => Some(ValueIter::Items(
                s.chars().map(|c| Value::str(c.to_string())).collect::<Vec<_>>().into_iter(),
            )),
            Value::Object(_) => {
                let method = self.get_method(value, "iterator", &[])?;
                match method.try_invoke(value, &[]).ok()? {
                    TryResult::Value(inner) if !matches!(inner, Value::Object(_)) => self.get_iterator(&inner),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Looks a name up in a named-member table, trying the original spelling
/// and then the first-letter-flipped form.
fn named_lookup<'a>(table: &'a ahash::AHashMap<Arc<str>, PropertyDef>, name: &str) -> Option<&'a PropertyDef> {
    if let Some(def) = table.get(name) {
        return Some(def);
    }
    table.get(flip_first(name)?.as_str())
}

fn flip_first(name: &str) -> Option<String> {
    let first = name.chars().next()?;
    let flipped = if first.is_uppercase() {
        first.to_lowercase().to_string()
    } else {
        first.to_uppercase().to_string()
    };
    Some(flipped + &name[first.len_utf8()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Shape;

    #[derive(Debug)]
    struct Point {
        x: i64,
    }

    impl HostObject for Point {
        fn descriptor(&self) -> Arc<ClassDescriptor> {
            static CLASS: std::sync::OnceLock<Arc<ClassDescriptor>> = std::sync::OnceLock::new();
            CLASS
                .get_or_init(|| {
                    ClassDescriptor::builder("acme.geo.Point")
                        .property_get("x", |v| {
                            Ok(Value::Int(downcast_host::<Point>(v).expect("point target").x))
                        })
                        .method("plus", [Shape::Int], |v, args| {
                            let p = downcast_host::<Point>(v).expect("point target");
                            Ok(Value::Int(p.x + args[0].as_int().unwrap_or(0)))
                        })
                        .build()
                })
                .clone()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn introspector() -> Introspector {
        Introspector::new(Permissions::unrestricted(), Arc::new(DefaultStrategy))
    }

    #[test]
    fn resolves_host_property_with_flipped_spelling() {
        let intro = introspector();
        let point = Value::object(Point { x: 7 });
        // "X" flips to the declared "x"
        let exec = intro
            .get_property_get(Some(Operator::PropertyGet), &point, &Value::str("X"))
            .unwrap();
        match exec.try_invoke(&point, &Value::str("X")).unwrap() {
            TryResult::Value(Value::Int(7)) => {}
            _ => panic!("expected 7"),
        }
    }

    #[test]
    fn method_overload_selection_by_shape() {
        let intro = introspector();
        let point = Value::object(Point { x: 2 });
        assert!(intro.get_method(&point, "plus", &[Value::Int(1)]).is_some());
        assert!(intro.get_method(&point, "plus", &[Value::str("no")]).is_none());
    }

    #[test]
    fn array_get_prefers_index_over_map() {
        let intro = introspector();
        let array = Value::array(vec![Value::Int(10), Value::Int(20)]);
        let exec = intro
            .get_property_get(Some(Operator::ArrayGet), &array, &Value::Int(1))
            .unwrap();
        match exec.try_invoke(&array, &Value::Int(1)).unwrap() {
            TryResult::Value(Value::Int(20)) => {}
            _ => panic!("expected 20"),
        }
    }

    #[test]
    fn cached_executor_fails_over_on_shape_change() {
        let intro = introspector();
        let array = Value::array(vec![Value::Int(10)]);
        let exec = intro
            .get_property_get(Some(Operator::ArrayGet), &array, &Value::Int(0))
            .unwrap();
        // same executor against a map target reports failure, not an error
        let map = Value::map(crate::value::ValueMap::default());
        assert!(matches!(exec.try_invoke(&map, &Value::Int(0)).unwrap(), TryResult::Failed));
    }
}
