//! Resolved executors.
//!
//! An executor records how to read, write, or call one member for operands
//! of a particular runtime shape. Executors are memoised in node cache
//! slots; `try_invoke` re-validates the recorded shape on every reuse and
//! answers `Failed` on mismatch, which makes the caller re-run the full
//! resolution. The sentinel never escapes the interpreter.

use std::sync::Arc;

use crate::{
    error::{EvalError, EvalResult},
    introspect::class::{CtorDef, GetterFn, KeyedGetFn, KeyedSetFn, MethodDef, SetterFn},
    value::{MapKey, Shape, Value},
};

/// Outcome of re-invoking a cached executor.
pub(crate) enum TryResult {
    Value(Value),
    /// The operand shape no longer matches; re-resolve.
    Failed,
}

/// Outcome of re-invoking a cached setter. `Failed` hands the value back so
/// the caller can retry through full resolution without cloning.
pub(crate) enum TrySet {
    Done,
    Failed(Value),
}

pub(crate) trait PropertyGetExec: Send + Sync {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult>;

    fn is_cacheable(&self) -> bool {
        true
    }
}

pub(crate) trait PropertySetExec: Send + Sync {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet>;

    fn is_cacheable(&self) -> bool {
        true
    }
}

pub(crate) trait MethodExec: Send + Sync {
    fn try_invoke(&self, target: &Value, args: &[Value]) -> EvalResult<TryResult>;

    fn is_cacheable(&self) -> bool {
        true
    }
}

/// Index derived from a key for ordered access; `None` when the key does
/// not coerce to a non-negative integer.
pub(crate) fn key_index(key: &Value) -> Option<usize> {
    let index = key.as_int()?;
    usize::try_from(index).ok()
}

fn class_of(target: &Value) -> Option<Arc<str>> {
    super::builtins::descriptor_of(target).map(|descriptor| descriptor.name().clone())
}

// --- map access ---

pub(crate) struct MapGet;

impl PropertyGetExec for MapGet {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult> {
        let Value::Map(map) = target else {
            return Ok(TryResult::Failed);
        };
        let Some(key) = MapKey::from_value(key) else {
            return Ok(TryResult::Failed);
        };
        let map = map.read().expect("map lock poisoned");
        // absent keys read as null; maps are dynamic containers
        Ok(TryResult::Value(map.get(&key).cloned().unwrap_or(Value::Null)))
    }
}

pub(crate) struct MapSet;

impl PropertySetExec for MapSet {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet> {
        let Value::Map(map) = target else {
            return Ok(TrySet::Failed(value));
        };
        let Some(key) = MapKey::from_value(key) else {
            return Ok(TrySet::Failed(value));
        };
        map.write().expect("map lock poisoned").insert(key, value);
        Ok(TrySet::Done)
    }
}

// --- ordered access ---

pub(crate) struct ListGet;

impl PropertyGetExec for ListGet {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult> {
        let Value::Array(items) = target else {
            return Ok(TryResult::Failed);
        };
        let Some(index) = key_index(key) else {
            return Ok(TryResult::Failed);
        };
        let items = items.read().expect("array lock poisoned");
        match items.get(index) {
            Some(value) => Ok(TryResult::Value(value.clone())),
            None => Err(EvalError::property(format!("[{index}]"), true)),
        }
    }
}

pub(crate) struct ListSet;

impl PropertySetExec for ListSet {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet> {
        let Value::Array(items) = target else {
            return Ok(TrySet::Failed(value));
        };
        let Some(index) = key_index(key) else {
            return Ok(TrySet::Failed(value));
        };
        let mut items = items.write().expect("array lock poisoned");
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(TrySet::Done)
            }
            None => Err(EvalError::property(format!("[{index}]"), true)),
        }
    }
}

// --- named accessors on host classes ---

/// Bean-style property or direct field read, bound to one class.
pub(crate) struct NamedGet {
    pub class: Arc<str>,
    pub name: Arc<str>,
    pub getter: GetterFn,
}

impl PropertyGetExec for NamedGet {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult> {
        if key.as_str() != Some(&self.name) || class_of(target).as_deref() != Some(&self.class) {
            return Ok(TryResult::Failed);
        }
        (self.getter)(target).map(TryResult::Value)
    }
}

pub(crate) struct NamedSet {
    pub class: Arc<str>,
    pub name: Arc<str>,
    pub setter: SetterFn,
}

impl PropertySetExec for NamedSet {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet> {
        if key.as_str() != Some(&self.name) || class_of(target).as_deref() != Some(&self.class) {
            return Ok(TrySet::Failed(value));
        }
        (self.setter)(target, value).map(|()| TrySet::Done)
    }
}

// --- duck-typed keyed access ---

/// A `get(key)` method used as a property reader.
pub(crate) struct DuckGet {
    pub class: Arc<str>,
    pub def: MethodDef,
}

impl PropertyGetExec for DuckGet {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult> {
        let args = [key.clone()];
        if class_of(target).as_deref() != Some(&self.class) || !self.def.matches(&args) {
            return Ok(TryResult::Failed);
        }
        (self.def.invoke)(target, &args).map(TryResult::Value)
    }
}

/// A `set(key, value)` method used as a property writer.
pub(crate) struct DuckSet {
    pub class: Arc<str>,
    pub def: MethodDef,
}

impl PropertySetExec for DuckSet {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet> {
        let args = [key.clone(), value];
        if class_of(target).as_deref() != Some(&self.class) || !self.def.matches(&args) {
            let [_, value] = args;
            return Ok(TrySet::Failed(value));
        }
        (self.def.invoke)(target, &args).map(|_| TrySet::Done)
    }
}

// --- keyed composite accessor ---

pub(crate) struct ContainerGet {
    pub class: Arc<str>,
    pub get: KeyedGetFn,
}

impl PropertyGetExec for ContainerGet {
    fn try_invoke(&self, target: &Value, key: &Value) -> EvalResult<TryResult> {
        if class_of(target).as_deref() != Some(&self.class) {
            return Ok(TryResult::Failed);
        }
        (self.get)(target, key).map(TryResult::Value)
    }
}

pub(crate) struct ContainerSet {
    pub class: Arc<str>,
    pub set: KeyedSetFn,
}

impl PropertySetExec for ContainerSet {
    fn try_invoke(&self, target: &Value, key: &Value, value: Value) -> EvalResult<TrySet> {
        if class_of(target).as_deref() != Some(&self.class) {
            return Ok(TrySet::Failed(value));
        }
        (self.set)(target, key, value).map(|()| TrySet::Done)
    }
}

// --- methods and constructors ---

/// One resolved method overload bound to the shape it was found on.
pub(crate) struct BoundMethod {
    pub shape: Shape,
    pub def: MethodDef,
}

impl MethodExec for BoundMethod {
    fn try_invoke(&self, target: &Value, args: &[Value]) -> EvalResult<TryResult> {
        if !self.shape.matches(target) || !self.def.matches(args) {
            return Ok(TryResult::Failed);
        }
        (self.def.invoke)(target, args).map(TryResult::Value)
    }
}

/// A resolved constructor; the target is the class handle itself.
pub(crate) struct BoundCtor {
    pub class: Arc<str>,
    pub def: CtorDef,
}

impl MethodExec for BoundCtor {
    fn try_invoke(&self, target: &Value, args: &[Value]) -> EvalResult<TryResult> {
        let Value::Class(class) = target else {
            return Ok(TryResult::Failed);
        };
        if class.name().as_ref() != self.class.as_ref() || !self.def.matches(args) {
            return Ok(TryResult::Failed);
        }
        (self.def.invoke)(args).map(TryResult::Value)
    }
}
