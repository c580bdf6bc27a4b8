//! Capability descriptors for the built-in value types.
//!
//! Scripts call methods on strings, arrays, maps, and ranges through the
//! same resolution pipeline as host objects; these descriptors are the
//! method tables backing that. Built once per process and shared.

use std::sync::{Arc, OnceLock};

use crate::{
    error::{EvalError, EvalResult},
    introspect::class::ClassDescriptor,
    value::{MapKey, Shape, Value},
};

/// The descriptor backing a value's class, covering host objects and the
/// built-in container types.
pub(crate) fn descriptor_of(value: &Value) -> Option<Arc<ClassDescriptor>> {
    match value {
        Value::Str(_) => Some(string_class().clone()),
        Value::Array(_) => Some(array_class().clone()),
        Value::Map(_) => Some(map_class().clone()),
        Value::Set(_) => Some(set_class().clone()),
        Value::Range(_) => Some(range_class().clone()),
        Value::Object(object) => Some(object.descriptor()),
        Value::Class(class) => Some(class.clone()),
        _ => None,
    }
}

fn expect_str(value: &Value) -> &str {
    value.as_str().expect("resolver guarantees a string target")
}

fn arg_str<'a>(args: &'a [Value], index: usize) -> &'a str {
    args[index].as_str().expect("overload match guarantees a string argument")
}

pub(crate) fn string_class() -> &'static Arc<ClassDescriptor> {
    static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
    CLASS.get_or_init(|| {
        ClassDescriptor::builder("elex.String")
            .method("size", [], |t, _| Ok(Value::Int(expect_str(t).chars().count() as i64)))
            .method("length", [], |t, _| Ok(Value::Int(expect_str(t).chars().count() as i64)))
            .method("isEmpty", [], |t, _| Ok(Value::Bool(expect_str(t).is_empty())))
            .method("contains", [Shape::Str], |t, a| {
                Ok(Value::Bool(expect_str(t).contains(arg_str(a, 0))))
            })
            .method("startsWith", [Shape::Str], |t, a| {
                Ok(Value::Bool(expect_str(t).starts_with(arg_str(a, 0))))
            })
            .method("endsWith", [Shape::Str], |t, a| {
                Ok(Value::Bool(expect_str(t).ends_with(arg_str(a, 0))))
            })
            .method("indexOf", [Shape::Str], |t, a| {
                let s = expect_str(t);
                Ok(Value::Int(match s.find(arg_str(a, 0)) {
                    Some(byte) => s[..byte].chars().count() as i64,
                    None => -1,
                }))
            })
            .method("toUpperCase", [], |t, _| Ok(Value::str(expect_str(t).to_uppercase())))
            .method("toLowerCase", [], |t, _| Ok(Value::str(expect_str(t).to_lowercase())))
            .method("trim", [], |t, _| Ok(Value::str(expect_str(t).trim())))
            .method("substring", [Shape::Int], |t, a| {
                let start = a[0].as_int().unwrap_or(0).max(0) as usize;
                Ok(Value::str(expect_str(t).chars().skip(start).collect::<String>()))
            })
            .method("substring", [Shape::Int, Shape::Int], |t, a| {
                let start = a[0].as_int().unwrap_or(0).max(0) as usize;
                let end = a[1].as_int().unwrap_or(0).max(0) as usize;
                Ok(Value::str(
                    expect_str(t)
                        .chars()
                        .take(end)
                        .skip(start)
                        .collect::<String>(),
                ))
            })
            .method("split", [Shape::Str], |t, a| {
                Ok(Value::array(
                    expect_str(t).split(arg_str(a, 0)).map(Value::str).collect(),
                ))
            })
            .method("replace", [Shape::Str, Shape::Str], |t, a| {
                Ok(Value::str(expect_str(t).replace(arg_str(a, 0), arg_str(a, 1))))
            })
            .build()
    })
}

pub(crate) fn array_class() -> &'static Arc<ClassDescriptor> {
    static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
    CLASS.get_or_init(|| {
        ClassDescriptor::builder("elex.Array")
            .method("size", [], |t, _| with_array(t, |items| Ok(Value::Int(items.len() as i64))))
            .method("isEmpty", [], |t, _| with_array(t, |items| Ok(Value::Bool(items.is_empty()))))
            .method("contains", [Shape::Any], |t, a| {
                with_array(t, |items| Ok(Value::Bool(items.contains(&a[0]))))
            })
            .method("indexOf", [Shape::Any], |t, a| {
                with_array(t, |items| {
                    Ok(Value::Int(
                        items.iter().position(|v| *v == a[0]).map_or(-1, |i| i as i64),
                    ))
                })
            })
            .method("get", [Shape::Int], |t, a| {
                let index = a[0].as_int().unwrap_or(-1);
                with_array(t, |items| {
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| items.get(i).cloned())
                        .ok_or_else(|| EvalError::property(format!("[{index}]"), true))
                })
            })
            .method("add", [Shape::Any], |t, a| {
                let Value::Array(items) = t else {
                    return Err(EvalError::method("add"));
                };
                items.write().expect("array lock poisoned").push(a[0].clone());
                Ok(Value::Bool(true))
            })
            .method("join", [Shape::Str], |t, a| {
                with_array(t, |items| {
                    let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                    Ok(Value::str(parts.join(arg_str(a, 0))))
                })
            })
            .build()
    })
}

fn with_array<R>(target: &Value, f: impl FnOnce(&[Value]) -> EvalResult<R>) -> EvalResult<R> {
    let Value::Array(items) = target else {
        return Err(EvalError::method("array method on non-array"));
    };
    let items = items.read().expect("array lock poisoned");
    f(&items)
}

pub(crate) fn map_class() -> &'static Arc<ClassDescriptor> {
    static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
    CLASS.get_or_init(|| {
        ClassDescriptor::builder("elex.Map")
            .method("size", [], |t, _| with_map(t, |map| Ok(Value::Int(map.len() as i64))))
            .method("isEmpty", [], |t, _| with_map(t, |map| Ok(Value::Bool(map.is_empty()))))
            .method("containsKey", [Shape::Any], |t, a| {
                with_map(t, |map| {
                    Ok(Value::Bool(MapKey::from_value(&a[0]).is_some_and(|k| map.contains_key(&k))))
                })
            })
            .method("containsValue", [Shape::Any], |t, a| {
                with_map(t, |map| Ok(Value::Bool(map.values().any(|v| *v == a[0]))))
            })
            .method("get", [Shape::Any], |t, a| {
                with_map(t, |map| {
                    Ok(MapKey::from_value(&a[0])
                        .and_then(|k| map.get(&k).cloned())
                        .unwrap_or(Value::Null))
                })
            })
            .method("keys", [], |t, _| {
                with_map(t, |map| Ok(Value::array(map.keys().map(MapKey::to_value).collect())))
            })
            .method("values", [], |t, _| {
                with_map(t, |map| Ok(Value::array(map.values().cloned().collect())))
            })
            .method("put", [Shape::Any, Shape::Any], |t, a| {
                let Value::Map(map) = t else {
                    return Err(EvalError::method("put"));
                };
                let Some(key) = MapKey::from_value(&a[0]) else {
                    return Err(EvalError::operator("[]", format!("{} is not a valid map key", a[0].type_name())));
                };
                let previous = map
                    .write()
                    .expect("map lock poisoned")
                    .insert(key, a[1].clone());
                Ok(previous.unwrap_or(Value::Null))
            })
            .build()
    })
}

fn with_map<R>(target: &Value, f: impl FnOnce(&crate::value::ValueMap) -> EvalResult<R>) -> EvalResult<R> {
    let Value::Map(map) = target else {
        return Err(EvalError::method("map method on non-map"));
    };
    let map = map.read().expect("map lock poisoned");
    f(&map)
}

pub(crate) fn set_class() -> &'static Arc<ClassDescriptor> {
    static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
    CLASS.get_or_init(|| {
        ClassDescriptor::builder("elex.Set")
            .method("size", [], |t, _| with_set(t, |set| Ok(Value::Int(set.len() as i64))))
            .method("isEmpty", [], |t, _| with_set(t, |set| Ok(Value::Bool(set.is_empty()))))
            .method("contains", [Shape::Any], |t, a| {
                with_set(t, |set| {
                    Ok(Value::Bool(MapKey::from_value(&a[0]).is_some_and(|k| set.contains(&k))))
                })
            })
            .method("add", [Shape::Any], |t, a| {
                let Value::Set(set) = t else {
                    return Err(EvalError::method("add"));
                };
                let Some(key) = MapKey::from_value(&a[0]) else {
                    return Err(EvalError::operator(
                        "{}",
                        format!("{} is not a valid set element", a[0].type_name()),
                    ));
                };
                Ok(Value::Bool(set.write().expect("set lock poisoned").insert(key)))
            })
            .method("remove", [Shape::Any], |t, a| {
                let Value::Set(set) = t else {
                    return Err(EvalError::method("remove"));
                };
                Ok(Value::Bool(MapKey::from_value(&a[0]).is_some_and(|k| {
                    set.write().expect("set lock poisoned").shift_remove(&k)
                })))
            })
            .build()
    })
}

fn with_set<R>(target: &Value, f: impl FnOnce(&crate::value::ValueSet) -> EvalResult<R>) -> EvalResult<R> {
    let Value::Set(set) = target else {
        return Err(EvalError::method("set method on non-set"));
    };
    let set = set.read().expect("set lock poisoned");
    f(&set)
}

pub(crate) fn range_class() -> &'static Arc<ClassDescriptor> {
    static CLASS: OnceLock<Arc<ClassDescriptor>> = OnceLock::new();
    CLASS.get_or_init(|| {
        ClassDescriptor::builder("elex.Range")
            .property_get("from", |t| match t {
                Value::Range(r) => Ok(Value::Int(r.from)),
                _ => Err(EvalError::property("from", true)),
            })
            .property_get("to", |t| match t {
                Value::Range(r) => Ok(Value::Int(r.to)),
                _ => Err(EvalError::property("to", true)),
            })
            .method("size", [], |t, _| match t {
                Value::Range(r) => Ok(Value::Int(r.size())),
                _ => Err(EvalError::method("size")),
            })
            .method("contains", [Shape::Int], |t, a| match t {
                Value::Range(r) => Ok(Value::Bool(a[0].as_int().is_some_and(|i| r.contains(i)))),
                _ => Err(EvalError::method("contains")),
            })
            .build()
    })
}
