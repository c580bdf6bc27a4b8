//! Runtime values.
//!
//! `Value` is the single currency between the host, the interpreter, and the
//! arithmetic. Containers are reference-counted and internally locked so
//! values can be moved across evaluations and shared with the host; a single
//! evaluation is still strictly single threaded.

use std::{
    cmp::Ordering,
    fmt,
    sync::{Arc, RwLock},
};

use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::{frame::Closure, introspect::{ClassDescriptor, HostObject}};

/// Insertion-ordered map used for map literals and host data.
pub type ValueMap = IndexMap<MapKey, Value, ahash::RandomState>;

/// Insertion-ordered set used for set literals.
pub type ValueSet = IndexSet<MapKey, ahash::RandomState>;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// Arbitrary precision integer, produced by overflow promotion or the
    /// `b` literal suffix.
    BigInt(Arc<BigInt>),
    Real(f64),
    Str(Arc<str>),
    Array(Arc<RwLock<Vec<Value>>>),
    Map(Arc<RwLock<ValueMap>>),
    Set(Arc<RwLock<ValueSet>>),
    Range(IntRange),
    Lambda(Arc<Closure>),
    /// A type handle, as produced by class lookup and consumed by `new`.
    Class(Arc<ClassDescriptor>),
    /// A host-supplied object resolved through the introspection pipeline.
    Object(Arc<dyn HostObject>),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Arc::new(RwLock::new(items)))
    }

    pub fn map(map: ValueMap) -> Self {
        Self::Map(Arc::new(RwLock::new(map)))
    }

    pub fn set(set: ValueSet) -> Self {
        Self::Set(Arc::new(RwLock::new(set)))
    }

    pub fn big(value: BigInt) -> Self {
        Self::BigInt(Arc::new(value))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::BigInt(b) => b.to_i64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn HostObject>> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Real(_) => "real",
            Self::Str(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Range(_) => "range",
            Self::Lambda(_) => "function",
            Self::Class(_) => "class",
            Self::Object(_) => "object",
        }
    }

    /// The runtime shape of this value, used for executor cache keys and
    /// overload parameter matching.
    pub fn shape(&self) -> Shape {
        match self {
            Self::Null => Shape::Null,
            Self::Bool(_) => Shape::Bool,
            Self::Int(_) => Shape::Int,
            Self::BigInt(_) => Shape::BigInt,
            Self::Real(_) => Shape::Real,
            Self::Str(_) => Shape::Str,
            Self::Array(_) => Shape::Array,
            Self::Map(_) => Shape::Map,
            Self::Set(_) => Shape::Set,
            Self::Range(_) => Shape::Range,
            Self::Lambda(_) => Shape::Lambda,
            Self::Class(_) => Shape::Class,
            Self::Object(o) => Shape::Object(o.descriptor().name().clone()),
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::BigInt(_) | Self::Real(_))
    }

    /// Converts host JSON data into a value tree.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::str(s.as_str()),
            serde_json::Value::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(entries) => {
                let mut map = ValueMap::default();
                for (k, v) in entries {
                    map.insert(MapKey::Str(Arc::from(k.as_str())), Self::from_json(v));
                }
                Self::map(map)
            }
        }
    }

    /// Converts this value to JSON. Functions, classes, and host objects have
    /// no JSON form and yield `None`.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Null => Some(serde_json::Value::Null),
            Self::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Self::Int(i) => Some(serde_json::Value::from(*i)),
            Self::BigInt(b) => b.to_i64().map(serde_json::Value::from),
            Self::Real(r) => serde_json::Number::from_f64(*r).map(serde_json::Value::Number),
            Self::Str(s) => Some(serde_json::Value::String(s.to_string())),
            Self::Array(items) => {
                let items = items.read().expect("array lock poisoned");
                items.iter().map(Self::to_json).collect::<Option<Vec<_>>>().map(serde_json::Value::Array)
            }
            Self::Map(map) => {
                let map = map.read().expect("map lock poisoned");
                let mut out = serde_json::Map::new();
                for (k, v) in map.iter() {
                    out.insert(k.to_value().to_string(), v.to_json()?);
                }
                Some(serde_json::Value::Object(out))
            }
            Self::Set(set) => {
                let set = set.read().expect("set lock poisoned");
                set.iter().map(|item| item.to_value().to_json()).collect::<Option<Vec<_>>>().map(serde_json::Value::Array)
            }
            Self::Range(range) => range.iter().map(|i| Some(serde_json::Value::from(i))).collect::<Option<Vec<_>>>().map(serde_json::Value::Array),
            Self::Lambda(_) | Self::Class(_) | Self::Object(_) => None,
        }
    }
}

/// Structural equality with numeric promotion across `Int`, `BigInt`, and
/// `Real`. Lambdas, classes, and host objects compare by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(l), Self::Bool(r)) => l == r,
            (Self::Str(l), Self::Str(r)) => l == r,
            (Self::Range(l), Self::Range(r)) => l == r,
            (Self::Array(l), Self::Array(r)) => {
                if Arc::ptr_eq(l, r) {
                    return true;
                }
                let l = l.read().expect("array lock poisoned");
                let r = r.read().expect("array lock poisoned");
                *l == *r
            }
            (Self::Map(l), Self::Map(r)) => {
                if Arc::ptr_eq(l, r) {
                    return true;
                }
                let l = l.read().expect("map lock poisoned");
                let r = r.read().expect("map lock poisoned");
                *l == *r
            }
            (Self::Set(l), Self::Set(r)) => {
                if Arc::ptr_eq(l, r) {
                    return true;
                }
                let l = l.read().expect("set lock poisoned");
                let r = r.read().expect("set lock poisoned");
                *l == *r
            }
            (Self::Lambda(l), Self::Lambda(r)) => Arc::ptr_eq(l, r),
            (Self::Class(l), Self::Class(r)) => Arc::ptr_eq(l, r) || l.name() == r.name(),
            (Self::Object(l), Self::Object(r)) => Arc::ptr_eq(l, r),
            _ => numeric_cmp(self, other) == Some(Ordering::Equal),
        }
    }
}

/// Compares two numeric values, promoting across representations.
///
/// Returns `None` when either side is not a number or the comparison is
/// undefined (NaN).
pub(crate) fn numeric_cmp(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(l), Value::Int(r)) => Some(l.cmp(r)),
        (Value::BigInt(l), Value::BigInt(r)) => Some(l.as_ref().cmp(r.as_ref())),
        (Value::Int(l), Value::BigInt(r)) => Some(BigInt::from(*l).cmp(r.as_ref())),
        (Value::BigInt(l), Value::Int(r)) => Some(l.as_ref().cmp(&BigInt::from(*r))),
        (Value::Real(l), Value::Real(r)) => l.partial_cmp(r),
        (Value::Int(l), Value::Real(r)) => (*l as f64).partial_cmp(r),
        (Value::Real(l), Value::Int(r)) => l.partial_cmp(&(*r as f64)),
        (Value::BigInt(l), Value::Real(r)) => l.to_f64().and_then(|l| l.partial_cmp(r)),
        (Value::Real(l), Value::BigInt(r)) => r.to_f64().and_then(|r| l.partial_cmp(&r)),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // null renders as the empty string so string composition treats
            // it as absent data
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Real(r) => {
                if r.is_nan() {
                    write!(f, "NaN")
                } else if r.is_infinite() {
                    write!(f, "{}Infinity", if *r < 0.0 { "-" } else { "" })
                } else {
                    write!(f, "{}", ryu::Buffer::new().format(*r))
                }
            }
            Self::Str(s) => write!(f, "{s}"),
            Self::Array(items) => {
                let items = items.read().expect("array lock poisoned");
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                let map = map.read().expect("map lock poisoned");
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {v}", k.to_value())?;
                }
                write!(f, "}}")
            }
            Self::Set(set) => {
                let set = set.read().expect("set lock poisoned");
                write!(f, "{{")?;
                for (i, item) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.to_value())?;
                }
                write!(f, "}}")
            }
            Self::Range(range) => write!(f, "{}..{}", range.from, range.to),
            Self::Lambda(_) => write!(f, "<function>"),
            Self::Class(c) => write!(f, "<class {}>", c.name()),
            Self::Object(o) => write!(f, "{}", o.display()),
        }
    }
}

/// An inclusive integer range, the value of `l..r`.
///
/// Iterates ascending when `from <= to` and descending otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub from: i64,
    pub to: i64,
}

impl IntRange {
    pub fn contains(self, value: i64) -> bool {
        let (lo, hi) = if self.from <= self.to { (self.from, self.to) } else { (self.to, self.from) };
        (lo..=hi).contains(&value)
    }

    pub fn size(self) -> i64 {
        (self.from - self.to).abs() + 1
    }

    pub fn iter(self) -> RangeIter {
        RangeIter {
            cur: self.from,
            end: self.to,
            ascending: self.from <= self.to,
            done: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeIter {
    cur: i64,
    end: i64,
    ascending: bool,
    done: bool,
}

impl Iterator for RangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.done {
            return None;
        }
        let out = self.cur;
        if self.cur == self.end {
            self.done = true;
        } else if self.ascending {
            self.cur += 1;
        } else {
            self.cur -= 1;
        }
        Some(out)
    }
}

/// A hashable key for map values.
///
/// Reals key by bit pattern, so `1` and `1.0` are distinct keys, matching
/// typed-key semantics on the host side. Big integers that fit in an `i64`
/// normalize to `Int` keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Null,
    Bool(bool),
    Int(i64),
    Big(Arc<BigInt>),
    Real(u64),
    Str(Arc<str>),
}

impl MapKey {
    /// Derives a key from a value. Containers, functions, and objects are
    /// not hashable and yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::BigInt(b) => Some(match b.to_i64() {
                Some(i) => Self::Int(i),
                None => Self::Big(b.clone()),
            }),
            Value::Real(r) => Some(Self::Real(r.to_bits())),
            Value::Str(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Big(b) => Value::BigInt(b.clone()),
            Self::Real(bits) => Value::Real(f64::from_bits(*bits)),
            Self::Str(s) => Value::Str(s.clone()),
        }
    }
}

/// Runtime shape tags.
///
/// Concrete shapes are produced by [`Value::shape`] and recorded in node
/// cache slots; `Any` and `Number` exist only as overload parameter classes
/// and never come out of `shape()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Any,
    Number,
    Null,
    Bool,
    Int,
    BigInt,
    Real,
    Str,
    Array,
    Map,
    Set,
    Range,
    Lambda,
    Class,
    Object(Arc<str>),
}

impl Shape {
    /// Whether a value belongs to this shape class.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Number => value.is_number(),
            Self::Object(name) => matches!(value, Value::Object(o) if o.descriptor().name() == name),
            _ => *self == value.shape(),
        }
    }
}
