//! Operator symbols, user overloads, and the dispatch ladder.
//!
//! Every operator application resolves through the same staged search:
//! 1. the node-cached overload, re-validated against the operand shapes
//! 2. the arithmetic's user overload table (with one narrowing retry)
//! 3. for comparisons, a two-sided user `compare` overload
//! 4. the built-in arithmetic operation
//! 5. for the containment family, duck-typed methods on the left operand,
//!    then an equality reduction
//!
//! A failed overload search caches a negative marker keyed by the argument
//! shapes so the table is not re-scanned on every visit.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::{
    error::{EvalError, EvalResult},
    interpreter::Interpreter,
    introspect::TryResult,
    tree::{NodeCache, NodeId, shape_key, shapes_match},
    value::{Shape, Value},
};

/// Operator identities, including the access and iteration pseudo-operators
/// used for overload registration and resolver-strategy context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum Operator {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "/")]
    Divide,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Sar,
    #[strum(serialize = ">>>")]
    Shru,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    Complement,
    #[strum(serialize = "-")]
    Negate,
    #[strum(serialize = "+")]
    Positivize,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    /// The three-way comparison consulted when a comparison operator has no
    /// direct overload.
    #[strum(serialize = "<=>")]
    Compare,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "??")]
    NullCoalesce,
    #[strum(serialize = "=~")]
    Contains,
    #[strum(serialize = "=^")]
    StartsWith,
    #[strum(serialize = "=$")]
    EndsWith,
    #[strum(serialize = "empty")]
    Empty,
    #[strum(serialize = "size")]
    Size,
    #[strum(serialize = "+=")]
    SelfAdd,
    #[strum(serialize = "-=")]
    SelfSubtract,
    #[strum(serialize = "*=")]
    SelfMultiply,
    #[strum(serialize = "/=")]
    SelfDivide,
    #[strum(serialize = "%=")]
    SelfMod,
    #[strum(serialize = "&=")]
    SelfAnd,
    #[strum(serialize = "|=")]
    SelfOr,
    #[strum(serialize = "^=")]
    SelfXor,
    #[strum(serialize = "<<=")]
    SelfShl,
    #[strum(serialize = ">>=")]
    SelfSar,
    #[strum(serialize = ">>>=")]
    SelfShru,
    #[strum(serialize = "++")]
    Increment,
    #[strum(serialize = "--")]
    Decrement,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = ".")]
    PropertyGet,
    #[strum(serialize = ".=")]
    PropertySet,
    #[strum(serialize = "[]")]
    ArrayGet,
    #[strum(serialize = "[]=")]
    ArraySet,
    #[strum(serialize = "for(...)")]
    Iterator,
    #[strum(serialize = "?")]
    Condition,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        self.into()
    }

    /// The base binary operator of a compound-assignment operator.
    pub fn base(self) -> Option<Self> {
        Some(match self {
            Self::SelfAdd => Self::Add,
            Self::SelfSubtract => Self::Subtract,
            Self::SelfMultiply => Self::Multiply,
            Self::SelfDivide => Self::Divide,
            Self::SelfMod => Self::Mod,
            Self::SelfAnd => Self::BitAnd,
            Self::SelfOr => Self::BitOr,
            Self::SelfXor => Self::BitXor,
            Self::SelfShl => Self::Shl,
            Self::SelfSar => Self::Sar,
            Self::SelfShru => Self::Shru,
            _ => return None,
        })
    }
}

/// A user overload: fixed parameter shapes plus the handler.
#[derive(Clone)]
pub struct Overload {
    params: SmallVec<[Shape; 2]>,
    pub(crate) handler: OverloadHandler,
}

pub type OverloadHandler = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

impl Overload {
    fn matches(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(shape, arg)| shape.matches(arg))
    }

    pub(crate) fn call(&self, args: &[Value]) -> EvalResult<Value> {
        (self.handler)(args)
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Overload{:?}", self.params)
    }
}

/// The overload set of an arithmetic extension: which operator symbols the
/// extension redefines, and with what parameter shapes. Built once at
/// arithmetic construction and immutable thereafter.
#[derive(Debug, Default)]
pub struct OverloadTable {
    map: AHashMap<Operator, Vec<Overload>>,
}

impl OverloadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an overload for an operator.
    #[must_use]
    pub fn register(
        mut self,
        op: Operator,
        params: impl IntoIterator<Item = Shape>,
        handler: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.map.entry(op).or_default().push(Overload {
            params: params.into_iter().collect(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Whether the extension declares any overload for `op`.
    pub fn defines(&self, op: Operator) -> bool {
        self.map.contains_key(&op)
    }

    pub(crate) fn find(&self, op: Operator, args: &[Value]) -> Option<&Overload> {
        self.map.get(&op)?.iter().find(|overload| overload.matches(args))
    }
}

/// Outcome of the null-operand inspection.
enum NullPolicy {
    Proceed,
    /// The node is ternary-protected; the operator yields null silently.
    YieldNull,
}

impl Interpreter<'_> {
    /// Inspects operands before dispatch: a null reaching an operator that
    /// is strict for nulls fails with a null-operand error unless the node
    /// is ternary-protected.
    fn null_policy(&self, id: NodeId, op: Operator, operands: &[&Value]) -> Result<NullPolicy, crate::error::Unwind> {
        if !self.options.strict || !operands.iter().any(|v| v.is_null()) {
            return Ok(NullPolicy::Proceed);
        }
        if !self.arith().is_strict_operator(op) {
            return Ok(NullPolicy::Proceed);
        }
        if self.ast.is_ternary_protected(id) {
            return Ok(NullPolicy::YieldNull);
        }
        Err(self.raise(id, EvalError::null_operand(op.symbol())))
    }

    /// Stage 1 and 2 of the search: the node-cached resolution, then the
    /// overload table with one narrowing retry. `Ok(None)` means no
    /// overload applies and the built-in operation should run.
    pub(crate) fn try_overload(&mut self, id: NodeId, op: Operator, args: &[Value]) -> crate::error::Step<Option<Value>> {
        let Some(table) = self.arith().overloads() else {
            return Ok(None);
        };
        if !table.defines(op) {
            return Ok(None);
        }
        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load() {
            match &*cache {
                NodeCache::Overload { op: cached_op, shape, handler } if *cached_op == op => {
                    if shapes_match(shape, args) {
                        return (handler)(args).map(Some).map_err(|err| self.raise(id, err));
                    }
                    // shape drifted; fall through and rewrite the slot
                }
                NodeCache::MissingOverload { op: cached_op, shape }
                    if *cached_op == op && shapes_match(shape, args) =>
                {
                    return Ok(None);
                }
                _ => {}
            }
        }
        if let Some(overload) = table.find(op, args) {
            node.cache.store(NodeCache::Overload {
                op,
                shape: shape_key(args),
                handler: overload.handler.clone(),
            });
            return overload.call(args).map(Some).map_err(|err| self.raise(id, err));
        }
        // narrowing is applied at most once per selection attempt; a
        // narrowing-found overload is not cached since reuse would need the
        // same narrowing pass anyway
        let mut narrowed: SmallVec<[Value; 2]> = args.iter().cloned().collect();
        if self.arith().narrow_arguments(&mut narrowed)
            && let Some(overload) = table.find(op, &narrowed)
        {
            return overload.call(&narrowed).map(Some).map_err(|err| self.raise(id, err));
        }
        node.cache.store(NodeCache::MissingOverload {
            op,
            shape: shape_key(args),
        });
        Ok(None)
    }

    /// Arithmetic binary operators.
    pub(crate) fn op_binary(&mut self, id: NodeId, op: Operator, l: Value, r: Value) -> crate::error::Step<Value> {
        if matches!(self.null_policy(id, op, &[&l, &r])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [l, r];
        if let Some(value) = self.try_overload(id, op, &args)? {
            return Ok(value);
        }
        let [l, r] = args;
        self.builtin_binary(op, &l, &r).map_err(|err| self.raise(id, err))
    }

    fn builtin_binary(&self, op: Operator, l: &Value, r: &Value) -> EvalResult<Value> {
        let a = self.arith();
        match op {
            Operator::Add => a.add(l, r),
            Operator::Subtract => a.subtract(l, r),
            Operator::Multiply => a.multiply(l, r),
            Operator::Divide => a.divide(l, r),
            Operator::Mod => a.modulo(l, r),
            Operator::BitAnd => a.bit_and(l, r),
            Operator::BitOr => a.bit_or(l, r),
            Operator::BitXor => a.bit_xor(l, r),
            Operator::Shl => a.shift_left(l, r),
            Operator::Sar => a.shift_right(l, r),
            Operator::Shru => a.shift_right_unsigned(l, r),
            _ => Err(EvalError::operator(op.symbol(), "unsupported operation")),
        }
    }

    /// Comparison operators, including the two-sided `compare` fallback.
    pub(crate) fn op_compare(&mut self, id: NodeId, op: Operator, l: Value, r: Value) -> crate::error::Step<Value> {
        if matches!(self.null_policy(id, op, &[&l, &r])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [l, r];
        if let Some(value) = self.try_overload(id, op, &args)? {
            return Ok(Value::Bool(self.arith().to_boolean(&value)));
        }
        let [l, r] = args;
        if let Some(ordering) = self.user_compare(id, &l, &r)? {
            return Ok(Value::Bool(ordering_satisfies(op, ordering)));
        }
        let outcome = match op {
            Operator::Eq => self.arith().equals(&l, &r),
            Operator::Ne => self.arith().equals(&l, &r).map(|eq| !eq),
            _ => self.arith().compare(op, &l, &r).map(|ordering| ordering_satisfies(op, ordering)),
        };
        outcome.map(Value::Bool).map_err(|err| self.raise(id, err))
    }

    /// Tries a user `compare(l, r)` overload, then `compare(r, l)` with the
    /// result negated. The sign of the returned integer is the ordering.
    fn user_compare(&mut self, id: NodeId, l: &Value, r: &Value) -> crate::error::Step<Option<std::cmp::Ordering>> {
        let Some(table) = self.arith().overloads() else {
            return Ok(None);
        };
        if !table.defines(Operator::Compare) {
            return Ok(None);
        }
        let forward = [l.clone(), r.clone()];
        if let Some(overload) = table.find(Operator::Compare, &forward) {
            let value = overload.call(&forward).map_err(|err| self.raise(id, err))?;
            let sign = self.arith().to_int(&value).map_err(|err| self.raise(id, err))?;
            return Ok(Some(sign.cmp(&0)));
        }
        let reverse = [r.clone(), l.clone()];
        if let Some(overload) = table.find(Operator::Compare, &reverse) {
            let value = overload.call(&reverse).map_err(|err| self.raise(id, err))?;
            let sign = self.arith().to_int(&value).map_err(|err| self.raise(id, err))?;
            return Ok(Some(sign.cmp(&0).reverse()));
        }
        Ok(None)
    }

    /// The containment family: `=~`, `=^`, `=$` and their negations.
    ///
    /// For `l =~ r` the right operand is the container or pattern. Duck
    /// fallback consults the corresponding method on the left operand with
    /// argument narrowing; the last resort is an equality reduction.
    pub(crate) fn op_contains(
        &mut self,
        id: NodeId,
        op: Operator,
        negated: bool,
        l: Value,
        r: Value,
    ) -> crate::error::Step<Value> {
        if matches!(self.null_policy(id, op, &[&l, &r])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [l, r];
        if let Some(value) = self.try_overload(id, op, &args)? {
            let truth = self.arith().to_boolean(&value);
            return Ok(Value::Bool(truth != negated));
        }
        let [l, r] = args;
        let builtin = match op {
            Operator::Contains => self.arith().contains(&r, &l),
            Operator::StartsWith => self.arith().starts_with(&l, &r),
            Operator::EndsWith => self.arith().ends_with(&l, &r),
            _ => Ok(None),
        };
        if let Some(truth) = builtin.map_err(|err| self.raise(id, err))? {
            return Ok(Value::Bool(truth != negated));
        }
        let method = match op {
            Operator::Contains => "contains",
            Operator::StartsWith => "startsWith",
            _ => "endsWith",
        };
        if let Some(value) = self.duck_call(&l, method, &[r.clone()]).map_err(|err| self.raise(id, err))? {
            let truth = self.arith().to_boolean(&value);
            return Ok(Value::Bool(truth != negated));
        }
        let truth = self.arith().equals(&l, &r).map_err(|err| self.raise(id, err))?;
        Ok(Value::Bool(truth != negated))
    }

    /// Invokes a duck-typed method, retrying once with narrowed arguments.
    fn duck_call(&self, target: &Value, name: &str, args: &[Value]) -> EvalResult<Option<Value>> {
        let introspector = &self.core.introspector;
        if let Some(method) = introspector.get_method(target, name, args) {
            if let TryResult::Value(value) = method.try_invoke(target, args)? {
                return Ok(Some(value));
            }
        }
        let mut narrowed: SmallVec<[Value; 2]> = args.iter().cloned().collect();
        if self.arith().narrow_arguments(&mut narrowed)
            && let Some(method) = introspector.get_method(target, name, &narrowed)
            && let TryResult::Value(value) = method.try_invoke(target, &narrowed)?
        {
            return Ok(Some(value));
        }
        Ok(None)
    }

    /// Unary operators.
    pub(crate) fn op_unary(&mut self, id: NodeId, op: Operator, v: Value) -> crate::error::Step<Value> {
        if matches!(self.null_policy(id, op, &[&v])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [v];
        if let Some(value) = self.try_overload(id, op, &args)? {
            return Ok(value);
        }
        let [v] = args;
        let a = self.arith();
        let outcome = match op {
            Operator::Negate => a.negate(&v),
            Operator::Positivize => a.positivize(&v),
            Operator::Complement => a.complement(&v),
            Operator::Not => a.not(&v),
            _ => Err(EvalError::operator(op.symbol(), "unsupported operation")),
        };
        outcome.map_err(|err| self.raise(id, err))
    }

    /// `empty v`: the arithmetic's intrinsic answer, a duck-typed
    /// `isEmpty()`, a duck-typed `size()` compared to zero, then false.
    pub(crate) fn op_empty(&mut self, id: NodeId, v: Value) -> crate::error::Step<Value> {
        let args = [v];
        if let Some(value) = self.try_overload(id, Operator::Empty, &args)? {
            return Ok(value);
        }
        let [v] = args;
        if let Some(empty) = self.arith().is_empty(&v) {
            return Ok(Value::Bool(empty));
        }
        if let Some(value) = self.duck_call(&v, "isEmpty", &[]).map_err(|err| self.raise(id, err))? {
            return Ok(Value::Bool(self.arith().to_boolean(&value)));
        }
        if let Some(value) = self.duck_call(&v, "size", &[]).map_err(|err| self.raise(id, err))? {
            let size = self.arith().to_int(&value).map_err(|err| self.raise(id, err))?;
            return Ok(Value::Bool(size == 0));
        }
        Ok(Value::Bool(false))
    }

    /// `size v`: the arithmetic's intrinsic answer, then duck-typed
    /// `size()`/`length()`.
    pub(crate) fn op_size(&mut self, id: NodeId, v: Value) -> crate::error::Step<Value> {
        let args = [v];
        if let Some(value) = self.try_overload(id, Operator::Size, &args)? {
            return Ok(value);
        }
        let [v] = args;
        if let Some(size) = self.arith().size(&v) {
            return Ok(Value::Int(size));
        }
        for name in ["size", "length"] {
            if let Some(value) = self.duck_call(&v, name, &[]).map_err(|err| self.raise(id, err))? {
                return Ok(value);
            }
        }
        Err(self.raise(id, EvalError::operator("size", format!("no size for {}", v.type_name()))))
    }

    /// Computes the value a compound assignment writes back.
    ///
    /// Tries the compound overload (which may fully handle the side
    /// effect), then the base operator overload, then the built-in base
    /// operation; the caller performs the assignment with the result.
    pub(crate) fn compound_value(
        &mut self,
        id: NodeId,
        op: Operator,
        current: Value,
        rhs: Value,
    ) -> crate::error::Step<Value> {
        let base = op.base().expect("compound operator");
        if matches!(self.null_policy(id, base, &[&current, &rhs])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [current, rhs];
        if let Some(value) = self.try_overload(id, op, &args)? {
            return Ok(value);
        }
        if let Some(value) = self.try_overload(id, base, &args)? {
            return Ok(value);
        }
        let [current, rhs] = args;
        self.builtin_binary(base, &current, &rhs).map_err(|err| self.raise(id, err))
    }

    /// Computes the stepped value for `++`/`--` forms.
    pub(crate) fn step_value(&mut self, id: NodeId, op: Operator, current: Value) -> crate::error::Step<Value> {
        if matches!(self.null_policy(id, op, &[&current])?, NullPolicy::YieldNull) {
            return Ok(Value::Null);
        }
        let args = [current];
        if let Some(value) = self.try_overload(id, op, &args)? {
            return Ok(value);
        }
        let [current] = args;
        let outcome = if op == Operator::Increment {
            self.arith().increment(&current)
        } else {
            self.arith().decrement(&current)
        };
        outcome.map_err(|err| self.raise(id, err))
    }
}

fn ordering_satisfies(op: Operator, ordering: std::cmp::Ordering) -> bool {
    match op {
        Operator::Eq => ordering == std::cmp::Ordering::Equal,
        Operator::Ne => ordering != std::cmp::Ordering::Equal,
        Operator::Lt => ordering == std::cmp::Ordering::Less,
        Operator::Le => ordering != std::cmp::Ordering::Greater,
        Operator::Gt => ordering == std::cmp::Ordering::Greater,
        Operator::Ge => ordering != std::cmp::Ordering::Less,
        _ => false,
    }
}
