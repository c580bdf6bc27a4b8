//! The arithmetic extension: built-in operator semantics.
//!
//! An `Arithmetic` supplies every built-in binary and unary operation, the
//! coercion rules, numeric narrowing, and optionally a table of user
//! operator overloads. Engines swap the arithmetic wholesale to change
//! language semantics; the trait carries default implementations so an
//! extension overrides only what it changes.
//!
//! Integer math runs on `i64` and promotes to `BigInt` on overflow rather
//! than wrapping; results narrow back down when they fit.

use std::{cmp::Ordering, fmt, sync::Arc};

use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::{
    error::{EvalError, EvalResult},
    operators::{Operator, OverloadTable},
    value::{IntRange, MapKey, Value, numeric_cmp},
};

/// Numeric operand pair after promotion to a common representation.
enum NumPair {
    Ints(i64, i64),
    Bigs(BigInt, BigInt),
    Reals(f64, f64),
}

/// Promotes two numeric values to a common representation. `None` when
/// either operand is not a number.
fn num_pair(l: &Value, r: &Value) -> Option<NumPair> {
    Some(match (l, r) {
        (Value::Int(l), Value::Int(r)) => NumPair::Ints(*l, *r),
        (Value::Real(l), Value::Real(r)) => NumPair::Reals(*l, *r),
        (Value::Real(l), Value::Int(r)) => NumPair::Reals(*l, *r as f64),
        (Value::Int(l), Value::Real(r)) => NumPair::Reals(*l as f64, *r),
        (Value::BigInt(l), Value::BigInt(r)) => NumPair::Bigs(l.as_ref().clone(), r.as_ref().clone()),
        (Value::BigInt(l), Value::Int(r)) => NumPair::Bigs(l.as_ref().clone(), BigInt::from(*r)),
        (Value::Int(l), Value::BigInt(r)) => NumPair::Bigs(BigInt::from(*l), r.as_ref().clone()),
        (Value::BigInt(l), Value::Real(r)) => NumPair::Reals(l.to_f64()?, *r),
        (Value::Real(l), Value::BigInt(r)) => NumPair::Reals(*l, r.to_f64()?),
        _ => return None,
    })
}

/// A big integer result, narrowed back to `Int` when it fits.
fn narrow_big(big: BigInt) -> Value {
    match big.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::big(big),
    }
}

/// Nulls act as zero under lenient arithmetic.
fn null_as_zero(v: &Value) -> Value {
    if v.is_null() { Value::Int(0) } else { v.clone() }
}

fn type_error(op: Operator, l: &Value, r: &Value) -> EvalError {
    EvalError::operator(op.symbol(), format!("{} {} {}", l.type_name(), op.symbol(), r.type_name()))
}

/// Built-in operator implementations, type predicates, coercions, and the
/// user overload set.
pub trait Arithmetic: Send + Sync + fmt::Debug {
    /// Master null-strictness switch. When false, nulls coerce to zero or
    /// the empty string instead of failing.
    fn strict(&self) -> bool {
        true
    }

    /// Whether `op` fails on null operands. Equality, access, `empty`, and
    /// `size` stay lenient even under a strict arithmetic.
    fn is_strict_operator(&self, op: Operator) -> bool {
        if !self.strict() {
            return false;
        }
        !matches!(
            op,
            Operator::Eq
                | Operator::Ne
                | Operator::PropertyGet
                | Operator::PropertySet
                | Operator::ArrayGet
                | Operator::ArraySet
                | Operator::Empty
                | Operator::Size
                | Operator::Not
                | Operator::Condition
        )
    }

    /// The user overload set, interned once at construction.
    fn overloads(&self) -> Option<&OverloadTable> {
        None
    }

    /// Last-resort resolution for a bare call site `name(args)`; consulted
    /// after the context declines. `None` declines the name.
    fn call_function(&self, _name: &str, _args: &[Value]) -> Option<EvalResult<Value>> {
        None
    }

    // --- binary operations ---

    fn add(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let (l, r) = (null_as_zero(l), null_as_zero(r));
        if let Some(pair) = num_pair(&l, &r) {
            return Ok(match pair {
                NumPair::Ints(a, b) => match a.checked_add(b) {
                    Some(v) => Value::Int(v),
                    None => narrow_big(BigInt::from(a) + BigInt::from(b)),
                },
                NumPair::Bigs(a, b) => narrow_big(a + b),
                NumPair::Reals(a, b) => Value::Real(a + b),
            });
        }
        if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
            return Ok(Value::str(format!("{l}{r}")));
        }
        Err(type_error(Operator::Add, &l, &r))
    }

    fn subtract(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let (l, r) = (null_as_zero(l), null_as_zero(r));
        match num_pair(&l, &r) {
            Some(NumPair::Ints(a, b)) => Ok(match a.checked_sub(b) {
                Some(v) => Value::Int(v),
                None => narrow_big(BigInt::from(a) - BigInt::from(b)),
            }),
            Some(NumPair::Bigs(a, b)) => Ok(narrow_big(a - b)),
            Some(NumPair::Reals(a, b)) => Ok(Value::Real(a - b)),
            None => Err(type_error(Operator::Subtract, &l, &r)),
        }
    }

    fn multiply(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let (l, r) = (null_as_zero(l), null_as_zero(r));
        match num_pair(&l, &r) {
            Some(NumPair::Ints(a, b)) => Ok(match a.checked_mul(b) {
                Some(v) => Value::Int(v),
                None => narrow_big(BigInt::from(a) * BigInt::from(b)),
            }),
            Some(NumPair::Bigs(a, b)) => Ok(narrow_big(a * b)),
            Some(NumPair::Reals(a, b)) => Ok(Value::Real(a * b)),
            None => Err(type_error(Operator::Multiply, &l, &r)),
        }
    }

    fn divide(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let (l, r) = (null_as_zero(l), null_as_zero(r));
        match num_pair(&l, &r) {
            Some(NumPair::Ints(a, b)) => {
                if b == 0 {
                    return Err(EvalError::operator("/", "division by zero"));
                }
                Ok(match a.checked_div(b) {
                    Some(v) => Value::Int(v),
                    None => narrow_big(BigInt::from(a) / BigInt::from(b)),
                })
            }
            Some(NumPair::Bigs(a, b)) => {
                if b.is_zero() {
                    return Err(EvalError::operator("/", "division by zero"));
                }
                Ok(narrow_big(a / b))
            }
            Some(NumPair::Reals(a, b)) => Ok(Value::Real(a / b)),
            None => Err(type_error(Operator::Divide, &l, &r)),
        }
    }

    fn modulo(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let (l, r) = (null_as_zero(l), null_as_zero(r));
        match num_pair(&l, &r) {
            Some(NumPair::Ints(a, b)) => {
                if b == 0 {
                    return Err(EvalError::operator("%", "modulo by zero"));
                }
                Ok(Value::Int(a.wrapping_rem(b)))
            }
            Some(NumPair::Bigs(a, b)) => {
                if b.is_zero() {
                    return Err(EvalError::operator("%", "modulo by zero"));
                }
                Ok(narrow_big(a % b))
            }
            Some(NumPair::Reals(a, b)) => Ok(Value::Real(a % b)),
            None => Err(type_error(Operator::Mod, &l, &r)),
        }
    }

    fn bit_and(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        bitwise(l, r, Operator::BitAnd, |a, b| a & b, |a, b| a & b)
    }

    fn bit_or(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        bitwise(l, r, Operator::BitOr, |a, b| a | b, |a, b| a | b)
    }

    fn bit_xor(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        bitwise(l, r, Operator::BitXor, |a, b| a ^ b, |a, b| a ^ b)
    }

    fn shift_left(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let shift = self.to_int(r)?;
        match null_as_zero(l) {
            Value::Int(a) => Ok(Value::Int(a.wrapping_shl(shift as u32))),
            Value::BigInt(a) => Ok(narrow_big(a.as_ref() << usize::try_from(shift).unwrap_or(0))),
            l => Err(type_error(Operator::Shl, &l, r)),
        }
    }

    fn shift_right(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let shift = self.to_int(r)?;
        match null_as_zero(l) {
            Value::Int(a) => Ok(Value::Int(a.wrapping_shr(shift as u32))),
            Value::BigInt(a) => Ok(narrow_big(a.as_ref() >> usize::try_from(shift).unwrap_or(0))),
            l => Err(type_error(Operator::Sar, &l, r)),
        }
    }

    fn shift_right_unsigned(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        let shift = self.to_int(r)?;
        match null_as_zero(l) {
            Value::Int(a) => Ok(Value::Int(((a as u64).wrapping_shr(shift as u32)) as i64)),
            l => Err(type_error(Operator::Shru, &l, r)),
        }
    }

    // --- unary operations ---

    fn negate(&self, v: &Value) -> EvalResult<Value> {
        match null_as_zero(v) {
            Value::Int(i) => Ok(match i.checked_neg() {
                Some(v) => Value::Int(v),
                None => narrow_big(-BigInt::from(i)),
            }),
            Value::BigInt(b) => Ok(narrow_big(-b.as_ref().clone())),
            Value::Real(r) => Ok(Value::Real(-r)),
            Value::Bool(b) => Ok(Value::Bool(!b)),
            v => Err(EvalError::operator("-", format!("-{}", v.type_name()))),
        }
    }

    fn positivize(&self, v: &Value) -> EvalResult<Value> {
        match null_as_zero(v) {
            v @ (Value::Int(_) | Value::BigInt(_) | Value::Real(_)) => Ok(v),
            Value::Bool(b) => Ok(Value::Bool(b)),
            v => Err(EvalError::operator("+", format!("+{}", v.type_name()))),
        }
    }

    fn complement(&self, v: &Value) -> EvalResult<Value> {
        match null_as_zero(v) {
            Value::Int(i) => Ok(Value::Int(!i)),
            // ~x == -x - 1
            Value::BigInt(b) => Ok(narrow_big(-b.as_ref().clone() - 1)),
            v => Err(EvalError::operator("~", format!("~{}", v.type_name()))),
        }
    }

    fn not(&self, v: &Value) -> EvalResult<Value> {
        Ok(Value::Bool(!self.to_boolean(v)))
    }

    // --- comparisons ---

    /// Three-way comparison for the relational operators.
    fn compare(&self, op: Operator, l: &Value, r: &Value) -> EvalResult<Ordering> {
        if let Some(ordering) = numeric_cmp(l, r) {
            return Ok(ordering);
        }
        match (l, r) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Str(s), n) if n.is_number() => compare_str_number(op, s, n, false),
            (n, Value::Str(s)) if n.is_number() => compare_str_number(op, s, n, true),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            _ => Err(EvalError::operator(
                op.symbol(),
                format!("cannot compare {} and {}", l.type_name(), r.type_name()),
            )),
        }
    }

    /// Value equality with the coercion ladder: nulls compare to nulls,
    /// booleans force boolean coercion, a number against a numeric string
    /// compares numerically, everything else compares structurally.
    fn equals(&self, l: &Value, r: &Value) -> EvalResult<bool> {
        match (l, r) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Null, _) | (_, Value::Null) => Ok(false),
            (Value::Bool(_), _) | (_, Value::Bool(_)) => Ok(self.to_boolean(l) == self.to_boolean(r)),
            (Value::Str(s), n) | (n, Value::Str(s)) if n.is_number() => {
                Ok(s.trim().parse::<f64>().is_ok_and(|parsed| {
                    numeric_cmp(&Value::Real(parsed), n) == Some(Ordering::Equal)
                }))
            }
            _ => Ok(l == r),
        }
    }

    // --- containment family ---

    /// `item =~ collection`. A string collection is a regular expression
    /// pattern matched against the whole item. `None` means the built-in
    /// rules do not apply and duck typing should be tried.
    fn contains(&self, collection: &Value, item: &Value) -> EvalResult<Option<bool>> {
        match collection {
            Value::Str(pattern) => {
                let regex = regex::Regex::new(pattern)
                    .map_err(|err| EvalError::operator("=~", format!("bad pattern: {err}")))?;
                let text = item.to_string();
                Ok(Some(regex.find(&text).is_some_and(|m| m.start() == 0 && m.end() == text.len())))
            }
            Value::Array(items) => {
                let items = items.read().expect("array lock poisoned");
                Ok(Some(items.iter().any(|v| v == item)))
            }
            Value::Map(map) => {
                let map = map.read().expect("map lock poisoned");
                Ok(Some(MapKey::from_value(item).is_some_and(|k| map.contains_key(&k))))
            }
            Value::Set(set) => {
                let set = set.read().expect("set lock poisoned");
                Ok(Some(MapKey::from_value(item).is_some_and(|k| set.contains(&k))))
            }
            Value::Range(range) => Ok(Some(item.as_int().is_some_and(|i| range.contains(i)))),
            _ => Ok(None),
        }
    }

    fn starts_with(&self, l: &Value, prefix: &Value) -> EvalResult<Option<bool>> {
        match l {
            Value::Str(s) => Ok(Some(s.starts_with(prefix.to_string().as_str()))),
            Value::Null => Ok(Some(false)),
            _ => Ok(None),
        }
    }

    fn ends_with(&self, l: &Value, suffix: &Value) -> EvalResult<Option<bool>> {
        match l {
            Value::Str(s) => Ok(Some(s.ends_with(suffix.to_string().as_str()))),
            Value::Null => Ok(Some(false)),
            _ => Ok(None),
        }
    }

    // --- type predicates and coercions ---

    /// `None` when emptiness is not intrinsically defined and a duck-typed
    /// `isEmpty()` should be consulted.
    fn is_empty(&self, v: &Value) -> Option<bool> {
        match v {
            Value::Null => Some(true),
            Value::Str(s) => Some(s.is_empty()),
            Value::Array(items) => Some(items.read().expect("array lock poisoned").is_empty()),
            Value::Map(map) => Some(map.read().expect("map lock poisoned").is_empty()),
            Value::Set(set) => Some(set.read().expect("set lock poisoned").is_empty()),
            Value::Bool(_) | Value::Int(_) | Value::BigInt(_) | Value::Real(_) | Value::Range(_) => Some(false),
            _ => None,
        }
    }

    /// `None` when size is not intrinsically defined.
    fn size(&self, v: &Value) -> Option<i64> {
        match v {
            Value::Str(s) => Some(s.chars().count() as i64),
            Value::Array(items) => Some(items.read().expect("array lock poisoned").len() as i64),
            Value::Map(map) => Some(map.read().expect("map lock poisoned").len() as i64),
            Value::Set(set) => Some(set.read().expect("set lock poisoned").len() as i64),
            Value::Range(range) => Some(range.size()),
            _ => None,
        }
    }

    fn increment(&self, v: &Value) -> EvalResult<Value> {
        self.add(v, &Value::Int(1))
    }

    fn decrement(&self, v: &Value) -> EvalResult<Value> {
        self.subtract(v, &Value::Int(1))
    }

    fn to_boolean(&self, v: &Value) -> bool {
        match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::BigInt(b) => !b.is_zero(),
            Value::Real(r) => *r != 0.0,
            Value::Str(s) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
            _ => true,
        }
    }

    fn to_int(&self, v: &Value) -> EvalResult<i64> {
        match v {
            Value::Null => Ok(0),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Int(i) => Ok(*i),
            Value::BigInt(b) => b
                .to_i64()
                .ok_or_else(|| EvalError::operator("int", "integer overflow")),
            Value::Real(r) => Ok(*r as i64),
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
                .map_err(|_| EvalError::operator("int", format!("cannot coerce '{s}' to int"))),
            _ => Err(EvalError::operator("int", format!("cannot coerce {} to int", v.type_name()))),
        }
    }

    fn to_real(&self, v: &Value) -> EvalResult<f64> {
        match v {
            Value::Null => Ok(0.0),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            Value::Int(i) => Ok(*i as f64),
            Value::BigInt(b) => Ok(b.to_f64().unwrap_or(f64::INFINITY)),
            Value::Real(r) => Ok(*r),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| EvalError::operator("real", format!("cannot coerce '{s}' to real"))),
            _ => Err(EvalError::operator("real", format!("cannot coerce {} to real", v.type_name()))),
        }
    }

    // --- narrowing ---

    /// Narrows a number to the smallest representation preserving its
    /// value, so overloads declared on narrower types match widened
    /// operands.
    fn narrow(&self, v: Value) -> Value {
        match v {
            Value::BigInt(ref b) => match b.to_i64() {
                Some(i) => Value::Int(i),
                None => v,
            },
            Value::Real(r) if r.is_finite() && r.fract() == 0.0 && (i64::MIN as f64..=i64::MAX as f64).contains(&r) => {
                Value::Int(r as i64)
            }
            v => v,
        }
    }

    /// Narrows every argument in place; returns whether anything changed.
    fn narrow_arguments(&self, args: &mut [Value]) -> bool {
        let mut changed = false;
        for arg in args.iter_mut() {
            let narrowed = self.narrow(arg.clone());
            if narrowed.shape() != arg.shape() {
                *arg = narrowed;
                changed = true;
            }
        }
        changed
    }

    /// Builds the value of `l..r`.
    fn create_range(&self, l: &Value, r: &Value) -> EvalResult<Value> {
        Ok(Value::Range(IntRange {
            from: self.to_int(l)?,
            to: self.to_int(r)?,
        }))
    }
}

fn bitwise(
    l: &Value,
    r: &Value,
    op: Operator,
    ints: impl Fn(i64, i64) -> i64,
    bigs: impl Fn(BigInt, BigInt) -> BigInt,
) -> EvalResult<Value> {
    match num_pair(&null_as_zero(l), &null_as_zero(r)) {
        Some(NumPair::Ints(a, b)) => Ok(Value::Int(ints(a, b))),
        Some(NumPair::Bigs(a, b)) => Ok(narrow_big(bigs(a, b))),
        _ => Err(type_error(op, l, r)),
    }
}

fn compare_str_number(op: Operator, s: &str, n: &Value, string_on_right: bool) -> EvalResult<Ordering> {
    let Ok(parsed) = s.trim().parse::<f64>() else {
        return Err(EvalError::operator(
            op.symbol(),
            format!("cannot compare '{s}' and {}", n.type_name()),
        ));
    };
    let ordering = numeric_cmp(&Value::Real(parsed), n)
        .ok_or_else(|| EvalError::operator(op.symbol(), "incomparable operands"))?;
    Ok(if string_on_right { ordering.reverse() } else { ordering })
}

/// The stock arithmetic.
#[derive(Debug, Default)]
pub struct DefaultArithmetic {
    lenient: bool,
    overloads: Option<OverloadTable>,
}

impl DefaultArithmetic {
    pub fn new() -> Self {
        Self::default()
    }

    /// A null-lenient arithmetic: nulls coerce instead of failing.
    pub fn lenient() -> Self {
        Self {
            lenient: true,
            overloads: None,
        }
    }

    /// Attaches a user overload set; the table is immutable from here on.
    #[must_use]
    pub fn with_overloads(mut self, overloads: OverloadTable) -> Self {
        self.overloads = Some(overloads);
        self
    }
}

impl Arithmetic for DefaultArithmetic {
    fn strict(&self) -> bool {
        !self.lenient
    }

    fn overloads(&self) -> Option<&OverloadTable> {
        self.overloads.as_ref()
    }
}

/// Shared handle to an arithmetic.
pub type ArithmeticRef = Arc<dyn Arithmetic>;

#[cfg(test)]
mod tests {
    use super::*;

    fn arith() -> DefaultArithmetic {
        DefaultArithmetic::new()
    }

    #[test]
    fn int_overflow_promotes_to_bigint() {
        let sum = arith().add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap();
        assert!(matches!(sum, Value::BigInt(_)));
        // and narrows back when subtraction fits again
        let back = arith().subtract(&sum, &Value::Int(1)).unwrap();
        assert_eq!(back, Value::Int(i64::MAX));
    }

    #[test]
    fn add_concatenates_with_strings() {
        assert_eq!(arith().add(&Value::str("a"), &Value::Int(1)).unwrap(), Value::str("a1"));
        assert_eq!(arith().add(&Value::Int(1), &Value::Int(2)).unwrap(), Value::Int(3));
    }

    #[test]
    fn division_by_zero_is_an_operator_error() {
        let err = arith().divide(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Operator { symbol: "/", .. }));
    }

    #[test]
    fn contains_uses_full_regex_match_on_strings() {
        let a = arith();
        assert_eq!(a.contains(&Value::str("a.c"), &Value::str("abc")).unwrap(), Some(true));
        assert_eq!(a.contains(&Value::str("a.c"), &Value::str("xabc")).unwrap(), Some(false));
    }

    #[test]
    fn narrow_collapses_integral_reals_and_small_bigints() {
        let a = arith();
        assert_eq!(a.narrow(Value::Real(2.0)), Value::Int(2));
        assert_eq!(a.narrow(Value::Real(2.5)), Value::Real(2.5));
        assert_eq!(a.narrow(Value::big(BigInt::from(3))), Value::Int(3));
    }

    #[test]
    fn equals_coerces_booleans_and_numeric_strings() {
        let a = arith();
        assert!(a.equals(&Value::str("2"), &Value::Int(2)).unwrap());
        assert!(a.equals(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!a.equals(&Value::Null, &Value::Int(0)).unwrap());
    }
}
