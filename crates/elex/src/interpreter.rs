//! The tree-walking evaluator.
//!
//! One `Interpreter` per evaluation: synchronous, single threaded,
//! recursive. Control flow (`break`, `continue`, `return`, errors) travels
//! through the `Unwind` sum in the result channel, never through panics.
//! Each visit consults the node cache slot first and memoises successful
//! resolutions back into it; a cached executor answering `TRY_FAILED`
//! clears the slot and re-runs the full resolution.

use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    arithmetic::Arithmetic,
    context::{CancelHandle, Context},
    engine::EngineCore,
    error::{EvalError, EvalResult, Step, Unwind, VariableIssue},
    frame::{Closure, Frame, FrameGet, LexicalBlock},
    introspect::{TryResult, TrySet},
    operators::Operator,
    options::Options,
    template::TemplateSink,
    tree::{Ast, NodeCache, NodeId, NodeKind},
    value::{MapKey, Value, ValueMap, ValueSet},
};

pub(crate) struct Interpreter<'a> {
    pub(crate) core: &'a EngineCore,
    pub(crate) context: &'a mut dyn Context,
    pub(crate) options: Options,
    pub(crate) ast: &'a Arc<Ast>,
    pub(crate) frame: Frame,
    block: Option<Box<LexicalBlock>>,
    cancel: Option<CancelHandle>,
    /// Namespace functors instantiated during this evaluation.
    ns_functors: AHashMap<Arc<str>, Value>,
    /// Template output hook; set only for template evaluation.
    pub(crate) sink: Option<TemplateSink>,
}

/// Runs a closure to completion against a context. Entry point shared by
/// call sites inside an evaluation and host-side lambda invocation.
pub(crate) fn run_closure(
    core: &EngineCore,
    context: &mut dyn Context,
    options: Options,
    cancel: Option<CancelHandle>,
    sink: Option<TemplateSink>,
    closure: &Closure,
    args: Vec<Value>,
) -> Step<Value> {
    let ast = Arc::clone(&closure.ast);
    let mut sub = Interpreter {
        core,
        context,
        options,
        ast: &ast,
        frame: Frame::for_closure(closure, args),
        block: None,
        cancel,
        ns_functors: AHashMap::new(),
        sink,
    };
    let body = ast.children(closure.node)[0];
    sub.enter_block();
    let result = sub.eval(body);
    sub.leave_block();
    match result {
        Ok(value) | Err(Unwind::Return(value)) => Ok(value),
        Err(Unwind::Throw(err)) => Err(Unwind::Throw(err)),
        Err(loose) => Err(Unwind::Throw(loose.into_error())),
    }
}

impl<'a> Interpreter<'a> {
    pub fn new(core: &'a EngineCore, ast: &'a Arc<Ast>, context: &'a mut dyn Context, options: Options) -> Self {
        let cancel = if options.cancellable { context.cancellation() } else { None };
        let frame = Frame::for_script(ast.scope.clone());
        Self {
            core,
            context,
            options,
            ast,
            frame,
            block: None,
            cancel,
            ns_functors: AHashMap::new(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: TemplateSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Evaluates the whole script and applies the error policy: loose
    /// control flow becomes an error, `silent` downgrades surfaced errors
    /// to a debug event and yields null. Cancellation always surfaces.
    pub fn run(&mut self) -> EvalResult<Value> {
        self.enter_block();
        let result = self.eval(self.ast.root());
        self.leave_block();
        let err = match result {
            Ok(value) | Err(Unwind::Return(value)) => return Ok(value),
            Err(loose) => loose.into_error(),
        };
        if !err.is_cancelled() && self.options.silent {
            tracing::debug!(error = %err, script = %self.ast.name, "suppressed evaluation error");
            return Ok(Value::Null);
        }
        Err(err)
    }

    // --- shared helpers ---

    pub(crate) fn arith(&self) -> &dyn Arithmetic {
        self.core.arithmetic.as_ref()
    }

    /// Locates an error at a node and wraps it for unwinding.
    pub(crate) fn raise(&self, id: NodeId, err: EvalError) -> Unwind {
        Unwind::Throw(err.located(self.ast.span(id), &self.ast.source))
    }

    fn cancel_check(&self, id: NodeId) -> Step<()> {
        if let Some(cancel) = &self.cancel
            && cancel.is_cancelled()
        {
            return Err(self.raise(id, EvalError::cancelled()));
        }
        Ok(())
    }

    fn truthy(&self, value: &Value) -> bool {
        self.arith().to_boolean(value)
    }

    fn enter_block(&mut self) {
        self.block = Some(LexicalBlock::nest(self.block.take()));
    }

    fn leave_block(&mut self) {
        if let Some(block) = self.block.take() {
            for &symbol in block.symbols() {
                if self.options.lexical_shade || self.frame.scope().symbol(symbol).lexical {
                    self.frame.shade(symbol);
                }
            }
            self.block = block.into_parent();
        }
    }

    // --- the walk ---

    #[expect(clippy::too_many_lines, reason = "single dispatch over every node kind")]
    pub(crate) fn eval(&mut self, id: NodeId) -> Step<Value> {
        self.cancel_check(id)?;
        let kids = self.ast.children(id);
        match self.ast.kind(id) {
            NodeKind::Null => Ok(Value::Null),
            NodeKind::True => Ok(Value::Bool(true)),
            NodeKind::False => Ok(Value::Bool(false)),
            NodeKind::Int(i) => Ok(Value::Int(*i)),
            NodeKind::Big(b) => Ok(Value::BigInt(b.clone())),
            NodeKind::Real(r) => Ok(Value::Real(*r)),
            NodeKind::Str(s) => Ok(Value::Str(s.clone())),

            NodeKind::ArrayLit => {
                let mut items = Vec::with_capacity(kids.len());
                for &kid in kids {
                    items.push(self.eval(kid)?);
                }
                Ok(Value::array(items))
            }
            NodeKind::MapLit => {
                let mut map = ValueMap::default();
                for &entry in kids {
                    let pair = self.ast.children(entry);
                    let key = self.eval(pair[0])?;
                    let value = self.eval(pair[1])?;
                    let Some(key) = MapKey::from_value(&key) else {
                        return Err(self.raise(
                            entry,
                            EvalError::operator("[]", format!("{} is not a valid map key", key.type_name())),
                        ));
                    };
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            NodeKind::SetLit => {
                let mut set = ValueSet::default();
                for &kid in kids {
                    let item = self.eval(kid)?;
                    let Some(key) = MapKey::from_value(&item) else {
                        return Err(self.raise(
                            kid,
                            EvalError::operator("{}", format!("{} is not a valid set element", item.type_name())),
                        ));
                    };
                    set.insert(key);
                }
                Ok(Value::set(set))
            }
            NodeKind::MapEntry | NodeKind::Arguments | NodeKind::Case { .. } => {
                Err(self.raise(id, EvalError::parse("unexpected node")))
            }

            NodeKind::Identifier { name, symbol } => {
                let (name, symbol) = (name.clone(), *symbol);
                self.read_identifier(id, &name, symbol)
            }

            // binary arithmetic
            NodeKind::Add => self.binary(id, Operator::Add),
            NodeKind::Subtract => self.binary(id, Operator::Subtract),
            NodeKind::Multiply => self.binary(id, Operator::Multiply),
            NodeKind::Divide => self.binary(id, Operator::Divide),
            NodeKind::Mod => self.binary(id, Operator::Mod),
            NodeKind::BitAnd => self.binary(id, Operator::BitAnd),
            NodeKind::BitOr => self.binary(id, Operator::BitOr),
            NodeKind::BitXor => self.binary(id, Operator::BitXor),
            NodeKind::Shl => self.binary(id, Operator::Shl),
            NodeKind::Sar => self.binary(id, Operator::Sar),
            NodeKind::Shru => self.binary(id, Operator::Shru),

            // comparisons
            NodeKind::Eq => self.comparison(id, Operator::Eq),
            NodeKind::Ne => self.comparison(id, Operator::Ne),
            NodeKind::Lt => self.comparison(id, Operator::Lt),
            NodeKind::Le => self.comparison(id, Operator::Le),
            NodeKind::Gt => self.comparison(id, Operator::Gt),
            NodeKind::Ge => self.comparison(id, Operator::Ge),

            // containment family
            NodeKind::Contains => self.containment(id, Operator::Contains, false),
            NodeKind::NotContains => self.containment(id, Operator::Contains, true),
            NodeKind::StartsWith => self.containment(id, Operator::StartsWith, false),
            NodeKind::NotStartsWith => self.containment(id, Operator::StartsWith, true),
            NodeKind::EndsWith => self.containment(id, Operator::EndsWith, false),
            NodeKind::NotEndsWith => self.containment(id, Operator::EndsWith, true),

            NodeKind::Range => {
                let l = self.eval(kids[0])?;
                let r = self.eval(kids[1])?;
                self.arith().create_range(&l, &r).map_err(|err| self.raise(id, err))
            }

            // short circuits
            NodeKind::And => {
                let l = self.eval(kids[0])?;
                if !self.truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(kids[1])?;
                Ok(Value::Bool(self.truthy(&r)))
            }
            NodeKind::Or => {
                let l = self.eval(kids[0])?;
                if self.truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(kids[1])?;
                Ok(Value::Bool(self.truthy(&r)))
            }
            NodeKind::NullCoalesce => {
                let l = self.eval(kids[0])?;
                if l.is_null() { self.eval(kids[1]) } else { Ok(l) }
            }
            NodeKind::Ternary => {
                let cond = self.eval(kids[0])?;
                if self.truthy(&cond) { self.eval(kids[1]) } else { self.eval(kids[2]) }
            }
            NodeKind::Elvis => {
                let cond = self.eval(kids[0])?;
                if self.truthy(&cond) { Ok(cond) } else { self.eval(kids[1]) }
            }

            // unary
            NodeKind::Not => self.unary(id, Operator::Not),
            NodeKind::Negate => self.unary(id, Operator::Negate),
            NodeKind::Positivize => self.unary(id, Operator::Positivize),
            NodeKind::Complement => self.unary(id, Operator::Complement),
            NodeKind::Empty => {
                let v = self.eval(kids[0])?;
                self.op_empty(id, v)
            }
            NodeKind::Size => {
                let v = self.eval(kids[0])?;
                self.op_size(id, v)
            }

            // navigation
            NodeKind::Property { safe } => {
                let safe = *safe;
                if self.options.antish
                    && !safe
                    && let Some(value) = self.try_antish(id)
                {
                    return Ok(value);
                }
                let object = self.eval(kids[0])?;
                let NodeKind::Identifier { name, .. } = self.ast.kind(kids[1]) else {
                    return Err(self.raise(id, EvalError::parse("malformed property access")));
                };
                let name = name.clone();
                if object.is_null() {
                    return self.null_base(id, safe, &name);
                }
                self.get_property(id, &object, &Value::Str(name), Operator::PropertyGet)
            }
            NodeKind::Index { safe } => {
                let safe = *safe;
                let object = self.eval(kids[0])?;
                if object.is_null() {
                    return self.null_base(id, safe, "[]");
                }
                let key = self.eval(kids[1])?;
                self.get_property(id, &object, &key, Operator::ArrayGet)
            }

            // assignment family
            NodeKind::Assign => {
                let value = self.eval(kids[1])?;
                self.assign(kids[0], value.clone())?;
                Ok(value)
            }
            NodeKind::SelfAdd => self.compound(id, Operator::SelfAdd),
            NodeKind::SelfSubtract => self.compound(id, Operator::SelfSubtract),
            NodeKind::SelfMultiply => self.compound(id, Operator::SelfMultiply),
            NodeKind::SelfDivide => self.compound(id, Operator::SelfDivide),
            NodeKind::SelfMod => self.compound(id, Operator::SelfMod),
            NodeKind::SelfAnd => self.compound(id, Operator::SelfAnd),
            NodeKind::SelfOr => self.compound(id, Operator::SelfOr),
            NodeKind::SelfXor => self.compound(id, Operator::SelfXor),
            NodeKind::SelfShl => self.compound(id, Operator::SelfShl),
            NodeKind::SelfSar => self.compound(id, Operator::SelfSar),
            NodeKind::SelfShru => self.compound(id, Operator::SelfShru),
            NodeKind::IncrementGet => self.step(id, Operator::Increment, true),
            NodeKind::GetIncrement => self.step(id, Operator::Increment, false),
            NodeKind::DecrementGet => self.step(id, Operator::Decrement, true),
            NodeKind::GetDecrement => self.step(id, Operator::Decrement, false),

            // calls
            NodeKind::Call => self.eval_call(id),
            NodeKind::MethodCall { safe } => self.eval_method_call(id, *safe),
            NodeKind::NamespaceCall { ns, name } => {
                let (ns, name) = (ns.clone(), name.clone());
                self.eval_namespace_call(id, &ns, &name)
            }
            NodeKind::New { class_name } => {
                let class_name = class_name.clone();
                self.eval_new(id, class_name.as_deref())
            }
            NodeKind::Lambda { scope, .. } => {
                let cells = scope
                    .captures()
                    .iter()
                    .map(|capture| self.frame.capture_cell(capture.in_parent))
                    .collect();
                Ok(Value::Lambda(Arc::new(Closure {
                    ast: Arc::clone(self.ast),
                    node: id,
                    scope: scope.clone(),
                    cells,
                })))
            }

            // statements
            NodeKind::Script => {
                let mut last = Value::Null;
                for &kid in kids {
                    last = self.eval(kid)?;
                }
                Ok(last)
            }
            NodeKind::Block => {
                self.enter_block();
                let mut last = Ok(Value::Null);
                for &kid in kids {
                    last = self.eval(kid);
                    if last.is_err() {
                        break;
                    }
                }
                self.leave_block();
                last
            }
            NodeKind::Var {
                name,
                symbol,
                lexical,
                has_init,
                ..
            } => {
                let (name, symbol, lexical, has_init) = (name.clone(), *symbol, *lexical, *has_init);
                self.declare_var(id, &name, symbol, lexical)?;
                if has_init {
                    let value = self.eval(kids[0])?;
                    self.write_symbol(id, &name, symbol, value.clone())?;
                    Ok(value)
                } else {
                    Ok(Value::Null)
                }
            }
            NodeKind::If { has_else } => {
                let has_else = *has_else;
                let cond = self.eval(kids[0])?;
                if self.truthy(&cond) {
                    self.eval(kids[1])
                } else if has_else {
                    self.eval(kids[2])
                } else {
                    Ok(Value::Null)
                }
            }
            NodeKind::While => {
                loop {
                    let cond = self.eval(kids[0])?;
                    if !self.truthy(&cond) {
                        break;
                    }
                    match self.eval(kids[1]) {
                        Ok(_) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::DoWhile => {
                loop {
                    match self.eval(kids[0]) {
                        Ok(_) | Err(Unwind::Continue) => {}
                        Err(Unwind::Break) => break,
                        Err(other) => return Err(other),
                    }
                    let cond = self.eval(kids[1])?;
                    if !self.truthy(&cond) {
                        break;
                    }
                }
                Ok(Value::Null)
            }
            NodeKind::ForLoop {
                has_init,
                has_cond,
                has_step,
            } => {
                let (has_init, has_cond, has_step) = (*has_init, *has_cond, *has_step);
                self.enter_block();
                let result = self.for_loop(kids, has_init, has_cond, has_step);
                self.leave_block();
                result
            }
            NodeKind::ForEach { name, symbol, lexical } => {
                let (name, symbol, lexical) = (name.clone(), *symbol, *lexical);
                self.for_each(id, kids, &name, symbol, lexical)
            }
            NodeKind::Return { has_value } => {
                let value = if *has_value { self.eval(kids[0])? } else { Value::Null };
                Err(Unwind::Return(value))
            }
            NodeKind::Break => Err(Unwind::Break),
            NodeKind::Continue => Err(Unwind::Continue),
            NodeKind::Throw => {
                let value = self.eval(kids[0])?;
                Err(self.raise(id, EvalError::thrown(value)))
            }
            NodeKind::Try {
                resources,
                catch_name,
                catch_symbol,
                has_finally,
            } => {
                let (resources, catch_name, catch_symbol, has_finally) =
                    (*resources as usize, catch_name.clone(), *catch_symbol, *has_finally);
                self.eval_try(id, kids, resources, catch_name, catch_symbol, has_finally)
            }
            NodeKind::Switch => self.eval_switch(id),
            NodeKind::Annotation { name } => {
                let name = name.clone();
                self.eval_annotation(id, &name)
            }
        }
    }

    fn binary(&mut self, id: NodeId, op: Operator) -> Step<Value> {
        let kids = self.ast.children(id);
        let l = self.eval(kids[0])?;
        let r = self.eval(kids[1])?;
        self.op_binary(id, op, l, r)
    }

    fn comparison(&mut self, id: NodeId, op: Operator) -> Step<Value> {
        let kids = self.ast.children(id);
        let l = self.eval(kids[0])?;
        let r = self.eval(kids[1])?;
        self.op_compare(id, op, l, r)
    }

    fn containment(&mut self, id: NodeId, op: Operator, negated: bool) -> Step<Value> {
        let kids = self.ast.children(id);
        let l = self.eval(kids[0])?;
        let r = self.eval(kids[1])?;
        self.op_contains(id, op, negated, l, r)
    }

    fn unary(&mut self, id: NodeId, op: Operator) -> Step<Value> {
        let kids = self.ast.children(id);
        let v = self.eval(kids[0])?;
        self.op_unary(id, op, v)
    }

    // --- identifiers and variables ---

    /// Identifier resolution: a defined frame symbol wins, then the
    /// context, then the strictness policy decides between an undefined
    /// error and null.
    fn read_identifier(&mut self, id: NodeId, name: &Arc<str>, symbol: Option<u32>) -> Step<Value> {
        if let Some(symbol) = symbol {
            match self.frame.get(symbol) {
                FrameGet::Value(value) => return Ok(value),
                FrameGet::Shaded if self.options.lexical_shade => {
                    return self.undefined_variable(id, name);
                }
                // declared-undefined and not-yet-declared fall through to
                // the context, as does a shaded symbol without shading
                FrameGet::Shaded | FrameGet::Undefined | FrameGet::Undeclared => {}
            }
        }
        if self.context.has(name) {
            return Ok(self.context.get(name).unwrap_or(Value::Null));
        }
        self.undefined_variable(id, name)
    }

    fn undefined_variable(&mut self, id: NodeId, name: &str) -> Step<Value> {
        if self.ast.is_ternary_protected(id) || self.options.safe || !self.options.strict {
            return Ok(Value::Null);
        }
        Err(self.raise(id, EvalError::variable(name, VariableIssue::Undefined)))
    }

    fn declare_var(&mut self, id: NodeId, name: &Arc<str>, symbol: u32, lexical: bool) -> Step<()> {
        if (self.options.is_lexical() || lexical)
            && let Some(block) = self.block.as_mut()
            && !block.define(symbol)
        {
            return Err(self.raise(id, EvalError::variable(name.as_ref(), VariableIssue::Redefined)));
        }
        self.frame.declare(symbol);
        Ok(())
    }

    fn write_symbol(&mut self, id: NodeId, name: &str, symbol: u32, value: Value) -> Step<()> {
        self.frame
            .set(symbol, value)
            .map_err(|_| self.raise(id, EvalError::variable(name, VariableIssue::Const)))
    }

    /// The dotted composite name of a pure identifier chain, for antish
    /// variable fallback.
    fn antish_name(&self, id: NodeId) -> Option<String> {
        match self.ast.kind(id) {
            NodeKind::Identifier { name, symbol: None } => Some(name.to_string()),
            NodeKind::Property { safe: false } => {
                let kids = self.ast.children(id);
                let base = self.antish_name(kids[0])?;
                let NodeKind::Identifier { name, .. } = self.ast.kind(kids[1]) else {
                    return None;
                };
                Some(format!("{base}.{name}"))
            }
            _ => None,
        }
    }

    /// Dotted-name fallback: `a.b.c` reads the context variable named
    /// "a.b.c" when the chain head resolves nowhere.
    fn try_antish(&mut self, id: NodeId) -> Option<Value> {
        let full = self.antish_name(id)?;
        let head = full.split('.').next()?;
        if self.context.has(head) {
            return None;
        }
        if self.context.has(&full) {
            return Some(self.context.get(&full).unwrap_or(Value::Null));
        }
        None
    }

    /// Antish assignment target: the composite name when the chain head is
    /// unresolved.
    fn antish_target(&mut self, id: NodeId) -> Option<String> {
        if !self.options.antish {
            return None;
        }
        let full = self.antish_name(id)?;
        let head = full.split('.').next()?;
        if self.context.has(head) { None } else { Some(full) }
    }

    // --- navigation ---

    fn null_base(&mut self, id: NodeId, safe: bool, path: &str) -> Step<Value> {
        if safe || self.options.safe || self.ast.is_ternary_protected(id) || !self.options.strict {
            return Ok(Value::Null);
        }
        Err(self.raise(id, EvalError::property(path, false)))
    }

    /// Property/index read with node-slot caching.
    fn get_property(&mut self, id: NodeId, target: &Value, key: &Value, op: Operator) -> Step<Value> {
        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load()
            && let NodeCache::PropertyGet(exec) = &*cache
        {
            match exec.try_invoke(target, key).map_err(|err| self.raise(id, err))? {
                TryResult::Value(value) => return Ok(value),
                TryResult::Failed => node.cache.clear(),
            }
        }
        if let Some(exec) = self.core.introspector.get_property_get(Some(op), target, key) {
            if let TryResult::Value(value) = exec.try_invoke(target, key).map_err(|err| self.raise(id, err))? {
                if exec.is_cacheable() {
                    node.cache.store(NodeCache::PropertyGet(exec));
                }
                return Ok(value);
            }
        }
        if self.ast.is_ternary_protected(id) || !self.options.strict {
            return Ok(Value::Null);
        }
        Err(self.raise(id, EvalError::property(key.to_string(), true)))
    }

    /// Property/index write with node-slot caching.
    fn set_property(&mut self, id: NodeId, target: &Value, key: &Value, value: Value, op: Operator) -> Step<()> {
        let node = self.ast.node(id);
        let mut value = value;
        if let Some(cache) = node.cache.load()
            && let NodeCache::PropertySet(exec) = &*cache
        {
            match exec.try_invoke(target, key, value).map_err(|err| self.raise(id, err))? {
                TrySet::Done => return Ok(()),
                TrySet::Failed(returned) => {
                    node.cache.clear();
                    value = returned;
                }
            }
        }
        if let Some(exec) = self.core.introspector.get_property_set(Some(op), target, key, &value) {
            match exec.try_invoke(target, key, value).map_err(|err| self.raise(id, err))? {
                TrySet::Done => {
                    if exec.is_cacheable() {
                        node.cache.store(NodeCache::PropertySet(exec));
                    }
                    return Ok(());
                }
                TrySet::Failed(_) => {}
            }
        }
        if !self.options.strict {
            return Ok(());
        }
        Err(self.raise(id, EvalError::property(key.to_string(), true)))
    }

    // --- assignment ---

    /// Binds `value` to an assignable target.
    fn assign(&mut self, target: NodeId, value: Value) -> Step<()> {
        let kids = self.ast.children(target);
        match self.ast.kind(target) {
            NodeKind::Identifier { name, symbol } => {
                let (name, symbol) = (name.clone(), *symbol);
                match symbol {
                    Some(symbol) => self.write_symbol(target, &name, symbol, value),
                    None => {
                        if self.context.set(&name, value) {
                            Ok(())
                        } else {
                            Err(self.raise(target, EvalError::variable(name.as_ref(), VariableIssue::Undefined)))
                        }
                    }
                }
            }
            NodeKind::Var {
                name,
                symbol,
                lexical,
                ..
            } => {
                let (name, symbol, lexical) = (name.clone(), *symbol, *lexical);
                self.declare_var(target, &name, symbol, lexical)?;
                self.write_symbol(target, &name, symbol, value)
            }
            NodeKind::Property { safe } => {
                let safe = *safe;
                if let Some(full) = self.antish_target(target) {
                    if self.context.set(&full, value) {
                        return Ok(());
                    }
                    return Err(self.raise(target, EvalError::variable(full, VariableIssue::Undefined)));
                }
                let object = self.eval(kids[0])?;
                let NodeKind::Identifier { name, .. } = self.ast.kind(kids[1]) else {
                    return Err(self.raise(target, EvalError::parse("malformed property assignment")));
                };
                let name = name.clone();
                if object.is_null() {
                    if safe || self.options.safe || !self.options.strict {
                        return Ok(());
                    }
                    return Err(self.raise(target, EvalError::property(name.as_ref(), false)));
                }
                self.set_property(target, &object, &Value::Str(name), value, Operator::PropertySet)
            }
            NodeKind::Index { safe } => {
                let safe = *safe;
                let object = self.eval(kids[0])?;
                if object.is_null() {
                    if safe || self.options.safe || !self.options.strict {
                        return Ok(());
                    }
                    return Err(self.raise(target, EvalError::property("[]", false)));
                }
                let key = self.eval(kids[1])?;
                self.set_property(target, &object, &key, value, Operator::ArraySet)
            }
            _ => Err(self.raise(target, EvalError::parse("invalid assignment target"))),
        }
    }

    /// Reads the current value of an assignable target, evaluating the
    /// object part at most once and returning it for the later write.
    fn read_target(&mut self, target: NodeId) -> Step<(Value, Option<(Value, Value)>)> {
        let kids = self.ast.children(target);
        match self.ast.kind(target) {
            NodeKind::Identifier { name, symbol } => {
                let (name, symbol) = (name.clone(), *symbol);
                let current = self.read_identifier(target, &name, symbol)?;
                Ok((current, None))
            }
            NodeKind::Property { safe } => {
                let safe = *safe;
                let object = self.eval(kids[0])?;
                let NodeKind::Identifier { name, .. } = self.ast.kind(kids[1]) else {
                    return Err(self.raise(target, EvalError::parse("malformed property access")));
                };
                let key = Value::Str(name.clone());
                if object.is_null() {
                    let current = self.null_base(target, safe, &key.to_string())?;
                    return Ok((current, None));
                }
                let current = self.get_property(target, &object, &key, Operator::PropertyGet)?;
                Ok((current, Some((object, key))))
            }
            NodeKind::Index { safe } => {
                let safe = *safe;
                let object = self.eval(kids[0])?;
                if object.is_null() {
                    let current = self.null_base(target, safe, "[]")?;
                    return Ok((current, None));
                }
                let key = self.eval(kids[1])?;
                let current = self.get_property(target, &object, &key, Operator::ArrayGet)?;
                Ok((current, Some((object, key))))
            }
            _ => Err(self.raise(target, EvalError::parse("invalid assignment target"))),
        }
    }

    /// Writes back through the location captured by [`Self::read_target`].
    fn write_target(&mut self, target: NodeId, location: Option<(Value, Value)>, value: Value) -> Step<()> {
        match location {
            Some((object, key)) => {
                let op = if matches!(self.ast.kind(target), NodeKind::Index { .. }) {
                    Operator::ArraySet
                } else {
                    Operator::PropertySet
                };
                self.set_property(target, &object, &key, value, op)
            }
            None => match self.ast.kind(target) {
                NodeKind::Identifier { name, symbol } => {
                    let (name, symbol) = (name.clone(), *symbol);
                    match symbol {
                        Some(symbol) => self.write_symbol(target, &name, symbol, value),
                        None => {
                            if self.context.set(&name, value) {
                                Ok(())
                            } else {
                                Err(self.raise(target, EvalError::variable(name.as_ref(), VariableIssue::Undefined)))
                            }
                        }
                    }
                }
                // a null navigation base absorbed the read; drop the write too
                _ => Ok(()),
            },
        }
    }

    /// Compound assignment: read, combine through the operator search,
    /// write the result back, yield it.
    fn compound(&mut self, id: NodeId, op: Operator) -> Step<Value> {
        let kids = self.ast.children(id);
        let (current, location) = self.read_target(kids[0])?;
        let rhs = self.eval(kids[1])?;
        let value = self.compound_value(id, op, current, rhs)?;
        self.write_target(kids[0], location, value.clone())?;
        Ok(value)
    }

    /// `++`/`--` in their four spellings. The assignment side effect always
    /// receives the new value; the operator yields the pre- or post-value.
    fn step(&mut self, id: NodeId, op: Operator, prefix: bool) -> Step<Value> {
        let kids = self.ast.children(id);
        let (current, location) = self.read_target(kids[0])?;
        let stepped = self.step_value(id, op, current.clone())?;
        self.write_target(kids[0], location, stepped.clone())?;
        Ok(if prefix { stepped } else { current })
    }

    // --- loops ---

    fn for_loop(&mut self, kids: &[NodeId], has_init: bool, has_cond: bool, has_step: bool) -> Step<Value> {
        let mut index = 0;
        if has_init {
            self.eval(kids[index])?;
            index += 1;
        }
        let mut take = |present: bool| {
            let id = present.then(|| kids[index]);
            index += usize::from(present);
            id
        };
        let cond = take(has_cond);
        let step = take(has_step);
        let body = kids[index];
        loop {
            if let Some(cond) = cond {
                let keep = self.eval(cond)?;
                if !self.truthy(&keep) {
                    break;
                }
            }
            match self.eval(body) {
                Ok(_) | Err(Unwind::Continue) => {}
                Err(Unwind::Break) => break,
                Err(other) => return Err(other),
            }
            if let Some(step) = step {
                self.eval(step)?;
            }
        }
        Ok(Value::Null)
    }

    fn for_each(&mut self, id: NodeId, kids: &[NodeId], name: &Arc<str>, symbol: Option<u32>, lexical: bool) -> Step<Value> {
        let iterable = self.eval(kids[0])?;
        let Some(iter) = self.core.introspector.get_iterator(&iterable) else {
            if iterable.is_null() && !self.options.strict {
                return Ok(Value::Null);
            }
            return Err(self.raise(
                id,
                EvalError::operator(
                    Operator::Iterator.symbol(),
                    format!("cannot iterate over {}", iterable.type_name()),
                ),
            ));
        };
        for item in iter {
            self.cancel_check(id)?;
            self.enter_block();
            let bound = match symbol {
                Some(symbol) => self
                    .declare_var(id, name, symbol, lexical)
                    .and_then(|()| self.write_symbol(id, name, symbol, item)),
                None => {
                    if self.context.set(name, item) {
                        Ok(())
                    } else {
                        Err(self.raise(id, EvalError::variable(name.as_ref(), VariableIssue::Undefined)))
                    }
                }
            };
            let outcome = bound.and_then(|()| self.eval(kids[1]));
            self.leave_block();
            match outcome {
                Ok(_) | Err(Unwind::Continue) => {}
                Err(Unwind::Break) => break,
                Err(other) => return Err(other),
            }
        }
        Ok(Value::Null)
    }

    // --- try/catch/finally ---

    #[expect(clippy::too_many_arguments, reason = "destructured node payload")]
    fn eval_try(
        &mut self,
        id: NodeId,
        kids: &[NodeId],
        resources: usize,
        catch_name: Option<Arc<str>>,
        catch_symbol: Option<u32>,
        has_finally: bool,
    ) -> Step<Value> {
        self.enter_block();
        let mut acquired: Vec<Value> = Vec::with_capacity(resources);
        let mut outcome: Step<Value> = Ok(Value::Null);
        for &resource in &kids[..resources] {
            match self.eval(resource) {
                Ok(value) => acquired.push(value),
                Err(unwind) => {
                    outcome = Err(unwind);
                    break;
                }
            }
        }
        if outcome.is_ok() {
            outcome = self.eval(kids[resources]);
        }
        // every acquired resource gets exactly one close attempt, on every
        // exit path; close failures surface only on an otherwise-normal exit
        let close_failure = self.release_resources(id, &acquired, outcome.is_err());
        if outcome.is_ok()
            && let Some(failure) = close_failure
        {
            outcome = Err(failure);
        }
        self.leave_block();

        let mut next = resources + 1;
        if let Some(catch_name) = catch_name {
            if let Err(Unwind::Throw(err)) = &outcome
                && !err.is_cancelled()
            {
                let caught = err.to_value();
                self.enter_block();
                let bound = match catch_symbol {
                    Some(symbol) => {
                        if let Some(block) = self.block.as_mut() {
                            block.define(symbol);
                        }
                        self.frame.declare(symbol);
                        self.write_symbol(id, &catch_name, symbol, caught)
                    }
                    None => {
                        self.context.set(&catch_name, caught);
                        Ok(())
                    }
                };
                outcome = bound.and_then(|()| self.eval(kids[next]));
                self.leave_block();
            }
            next += 1;
        }
        if has_finally {
            match self.eval(kids[next]) {
                Ok(_) => {}
                // abrupt completion of finally wins over the body's outcome
                Err(unwind) => outcome = Err(unwind),
            }
        }
        outcome
    }

    /// Releases try-with-resources values in reverse declaration order via
    /// a best-effort duck-typed `close()`. The release path performs no
    /// cancellation checks and never raises a cancellation of its own;
    /// close errors during an already-exceptional exit are logged and
    /// suppressed.
    fn release_resources(&mut self, id: NodeId, acquired: &[Value], exceptional: bool) -> Option<Unwind> {
        let mut first_failure = None;
        for resource in acquired.iter().rev() {
            let Some(method) = self.core.introspector.get_method(resource, "close", &[]) else {
                continue;
            };
            match method.try_invoke(resource, &[]) {
                Ok(_) => {}
                Err(err) => {
                    if exceptional {
                        tracing::debug!(error = %err, "suppressed close failure during unwind");
                    } else if first_failure.is_none() {
                        first_failure = Some(self.raise(id, err));
                    }
                }
            }
        }
        first_failure
    }

    // --- switch ---

    fn eval_switch(&mut self, id: NodeId) -> Step<Value> {
        let kids = self.ast.children(id);
        let discriminant = self.eval(kids[0])?;
        let mut default_arm = None;
        let mut chosen = None;
        for &case in &kids[1..] {
            let NodeKind::Case { is_default } = self.ast.kind(case) else {
                return Err(self.raise(case, EvalError::parse("malformed switch arm")));
            };
            if *is_default {
                default_arm = Some(case);
                continue;
            }
            let label = self.eval(self.ast.children(case)[0])?;
            let matches = self
                .arith()
                .equals(&discriminant, &label)
                .map_err(|err| self.raise(case, err))?;
            if matches {
                chosen = Some(case);
                break;
            }
        }
        let Some(arm) = chosen.or(default_arm) else {
            return Ok(Value::Null);
        };
        let is_default = matches!(self.ast.kind(arm), NodeKind::Case { is_default: true });
        let body = &self.ast.children(arm)[usize::from(!is_default)..];
        self.enter_block();
        let mut last = Value::Null;
        let mut failure = None;
        for &stmt in body {
            match self.eval(stmt) {
                Ok(value) => last = value,
                // break exits the switch, keeping the arm's value
                Err(Unwind::Break) => break,
                Err(other) => {
                    failure = Some(other);
                    break;
                }
            }
        }
        self.leave_block();
        match failure {
            Some(unwind) => Err(unwind),
            None => Ok(last),
        }
    }

    // --- annotations ---

    fn eval_annotation(&mut self, id: NodeId, name: &Arc<str>) -> Step<Value> {
        let kids = self.ast.children(id);
        let args = self.eval_args(kids[0])?;
        match self.core.annotations.clone() {
            Some(processor) => match processor.process(name, &args) {
                Ok(true) => self.eval(kids[1]),
                Ok(false) => Ok(Value::Null),
                Err(err) => Err(self.raise(
                    id,
                    EvalError::annotation(name.as_ref(), err.to_string()),
                )),
            },
            None if self.options.strict => Err(self.raise(
                id,
                EvalError::annotation(name.as_ref(), "no annotation processor registered"),
            )),
            // lenient evaluation ignores the annotation
            None => self.eval(kids[1]),
        }
    }

    // --- calls ---

    fn eval_args(&mut self, args_id: NodeId) -> Step<Vec<Value>> {
        let kids = self.ast.children(args_id);
        let mut args = Vec::with_capacity(kids.len());
        for &kid in kids {
            args.push(self.eval(kid)?);
        }
        Ok(args)
    }

    pub(crate) fn invoke_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Step<Value> {
        let options = self.options.clone();
        let cancel = self.cancel.clone();
        let sink = self.sink.clone();
        run_closure(self.core, &mut *self.context, options, cancel, sink, closure, args)
    }

    /// Call-site resolution for `f(args)`: a local symbol bound to a
    /// callable, a context variable holding one, the context as a method
    /// provider, the arithmetic's function table, and finally a method
    /// error.
    fn eval_call(&mut self, id: NodeId) -> Step<Value> {
        let kids = self.ast.children(id);
        let callee = kids[0];
        let args = self.eval_args(kids[1])?;
        if let NodeKind::Identifier { name, symbol } = self.ast.kind(callee) {
            let (name, symbol) = (name.clone(), *symbol);
            if let Some(symbol) = symbol
                && let FrameGet::Value(value) = self.frame.get(symbol)
            {
                return self.call_value(id, &name, value, args);
            }
            if self.context.has(&name) {
                let value = self.context.get(&name).unwrap_or(Value::Null);
                if matches!(value, Value::Lambda(_) | Value::Class(_)) {
                    return self.call_value(id, &name, value, args);
                }
            }
            if let Some(result) = self.context.call_method(&name, &args) {
                return result.map_err(|err| self.raise(id, err));
            }
            if let Some(result) = self.arith().call_function(&name, &args) {
                return result.map_err(|err| self.raise(id, err));
            }
            return self.method_miss(id, &name);
        }
        let value = self.eval(callee)?;
        let label = self.ast.fragment(callee).to_owned();
        self.call_value(id, &label, value, args)
    }

    fn call_value(&mut self, id: NodeId, name: &str, value: Value, args: Vec<Value>) -> Step<Value> {
        match value {
            Value::Lambda(closure) => self.invoke_closure(&closure, args),
            Value::Class(class) => self.construct(id, &class, args),
            _ => self.method_miss(id, name),
        }
    }

    fn method_miss(&mut self, id: NodeId, name: &str) -> Step<Value> {
        if self.ast.is_ternary_protected(id) || !self.options.strict {
            return Ok(Value::Null);
        }
        Err(self.raise(id, EvalError::method(name)))
    }

    /// `obj.m(args)`: the cached executor, the introspected method (with a
    /// narrowing retry), then a lambda-valued property of the same name.
    fn eval_method_call(&mut self, id: NodeId, safe: bool) -> Step<Value> {
        let kids = self.ast.children(id);
        let object = self.eval(kids[0])?;
        let NodeKind::Identifier { name, .. } = self.ast.kind(kids[1]) else {
            return Err(self.raise(id, EvalError::parse("malformed method call")));
        };
        let name = name.clone();
        if object.is_null() {
            return self.null_base(id, safe, &name);
        }
        let mut args = self.eval_args(kids[2])?;

        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load()
            && let NodeCache::Method(exec) = &*cache
        {
            match exec.try_invoke(&object, &args).map_err(|err| self.raise(id, err))? {
                TryResult::Value(value) => return Ok(value),
                TryResult::Failed => node.cache.clear(),
            }
        }
        let introspector = &self.core.introspector;
        let mut resolved = introspector.get_method(&object, &name, &args);
        if resolved.is_none() && self.arith().narrow_arguments(&mut args) {
            resolved = introspector.get_method(&object, &name, &args);
        }
        if let Some(exec) = resolved {
            if let TryResult::Value(value) = exec.try_invoke(&object, &args).map_err(|err| self.raise(id, err))? {
                if exec.is_cacheable() {
                    node.cache.store(NodeCache::Method(exec));
                }
                return Ok(value);
            }
        }
        // a lambda-valued property of the same name is callable
        if let Some(exec) = introspector.get_property_get(Some(Operator::PropertyGet), &object, &Value::Str(name.clone()))
            && let TryResult::Value(Value::Lambda(closure)) =
                exec.try_invoke(&object, &Value::Str(name.clone())).map_err(|err| self.raise(id, err))?
        {
            return self.invoke_closure(&closure, args);
        }
        self.method_miss(id, &name)
    }

    // --- namespaces ---

    /// `ns:f(args)`. Template output calls are handled inline when a sink
    /// is attached; everything else resolves the namespace and dispatches
    /// the method on its handle.
    fn eval_namespace_call(&mut self, id: NodeId, ns: &Arc<str>, name: &str) -> Step<Value> {
        let kids = self.ast.children(id);
        if let Some(sink) = self.sink.clone()
            && ns.as_ref() == crate::template::TEMPLATE_NAMESPACE
            && matches!(name, "print" | "echo")
        {
            let args = self.eval_args(kids[0])?;
            if name == "print" {
                let index = self
                    .arith()
                    .to_int(args.first().unwrap_or(&Value::Null))
                    .map_err(|err| self.raise(id, err))?;
                sink.write_literal(index as usize);
            } else {
                sink.write_value(args.first().unwrap_or(&Value::Null));
            }
            return Ok(Value::Null);
        }
        let handle = self.resolve_namespace(id, ns, name)?;
        let mut args = self.eval_args(kids[0])?;

        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load()
            && let NodeCache::Method(exec) = &*cache
        {
            match exec.try_invoke(&handle, &args).map_err(|err| self.raise(id, err))? {
                TryResult::Value(value) => return Ok(value),
                TryResult::Failed => node.cache.clear(),
            }
        }
        let introspector = &self.core.introspector;
        let mut resolved = introspector.get_method(&handle, name, &args);
        if resolved.is_none() && self.arith().narrow_arguments(&mut args) {
            resolved = introspector.get_method(&handle, name, &args);
        }
        if let Some(exec) = resolved {
            if let TryResult::Value(value) = exec.try_invoke(&handle, &args).map_err(|err| self.raise(id, err))? {
                if exec.is_cacheable() {
                    node.cache.store(NodeCache::Method(exec));
                }
                return Ok(value);
            }
        }
        // the handle may expose lambdas as members
        if let Some(exec) = introspector.get_property_get(Some(Operator::PropertyGet), &handle, &Value::str(name))
            && let TryResult::Value(Value::Lambda(closure)) =
                exec.try_invoke(&handle, &Value::str(name)).map_err(|err| self.raise(id, err))?
        {
            return self.invoke_closure(&closure, args);
        }
        self.method_miss(id, &format!("{ns}:{name}"))
    }

    /// Namespace resolution order: this evaluation's functor cache, the
    /// node-cached engine namespace, the context, the per-evaluation
    /// options, the engine registry.
    fn resolve_namespace(&mut self, id: NodeId, ns: &Arc<str>, name: &str) -> Step<Value> {
        if let Some(functor) = self.ns_functors.get(ns) {
            return Ok(functor.clone());
        }
        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load()
            && let NodeCache::Namespace(handle) = &*cache
        {
            return Ok(handle.clone());
        }
        if let Some(handle) = self.context.resolve_namespace(ns) {
            return self.functorize(id, ns, handle);
        }
        if let Some(handle) = self.options.namespaces().get(ns).cloned() {
            return self.functorize(id, ns, handle);
        }
        if let Some(handle) = self.core.namespaces.get(ns).cloned() {
            let resolved = self.functorize(id, ns, handle)?;
            // engine-registered namespaces without per-evaluation state are
            // stable across evaluations and safe to cache on the node
            if !self.ns_functors.contains_key(ns) {
                node.cache.store(NodeCache::Namespace(resolved.clone()));
            }
            return Ok(resolved);
        }
        Err(self.raise(id, EvalError::method(format!("{ns}:{name}"))))
    }

    /// Turns a namespace handle into the value calls dispatch on. A class
    /// with a context-bound constructor produces a functor instance cached
    /// for the rest of the evaluation; any other class acts as a static
    /// namespace; a name resolves through the class registry.
    fn functorize(&mut self, id: NodeId, ns: &Arc<str>, handle: Value) -> Step<Value> {
        let handle = match handle {
            Value::Str(name) => match self.core.introspector.class_by_name(&name) {
                Some(class) => Value::Class(class),
                None => return Err(self.raise(id, EvalError::method(format!("{ns}:{name}")))),
            },
            handle => handle,
        };
        if let Value::Class(class) = &handle
            && let Some(functor) = class.functor.clone()
        {
            let instance = functor(&mut *self.context).map_err(|err| self.raise(id, err))?;
            self.ns_functors.insert(ns.clone(), instance.clone());
            return Ok(instance);
        }
        Ok(handle)
    }

    // --- constructors ---

    fn eval_new(&mut self, id: NodeId, class_name: Option<&str>) -> Step<Value> {
        let kids = self.ast.children(id);
        let (class, args_node) = match class_name {
            Some(name) => (self.resolve_class(id, name)?, kids[0]),
            None => {
                let value = self.eval(kids[0])?;
                let class = match value {
                    Value::Class(class) => class,
                    Value::Str(name) => self.resolve_class(id, &name)?,
                    other => {
                        return Err(self.raise(
                            id,
                            EvalError::method(format!("new {}", other.type_name())),
                        ));
                    }
                };
                (class, kids[1])
            }
        };
        let args = self.eval_args(args_node)?;
        self.construct(id, &class, args)
    }

    fn construct(&mut self, id: NodeId, class: &Arc<crate::introspect::ClassDescriptor>, args: Vec<Value>) -> Step<Value> {
        let target = Value::Class(class.clone());
        let node = self.ast.node(id);
        if let Some(cache) = node.cache.load()
            && let NodeCache::Method(exec) = &*cache
        {
            match exec.try_invoke(&target, &args).map_err(|err| self.raise(id, err))? {
                TryResult::Value(value) => return Ok(value),
                TryResult::Failed => node.cache.clear(),
            }
        }
        let introspector = &self.core.introspector;
        let mut args = args;
        let mut resolved = introspector.get_constructor(class, &args);
        if resolved.is_none() && self.arith().narrow_arguments(&mut args) {
            resolved = introspector.get_constructor(class, &args);
        }
        if let Some(exec) = resolved {
            if let TryResult::Value(value) = exec.try_invoke(&target, &args).map_err(|err| self.raise(id, err))? {
                if exec.is_cacheable() {
                    node.cache.store(NodeCache::Method(exec));
                }
                return Ok(value);
            }
        }
        self.method_miss(id, &format!("new {}", class.name()))
    }

    /// Resolves a class by name directly, then through the ordered import
    /// list.
    fn resolve_class(&mut self, id: NodeId, name: &str) -> Step<Arc<crate::introspect::ClassDescriptor>> {
        let introspector = &self.core.introspector;
        if let Some(class) = introspector.class_by_name(name) {
            return Ok(class);
        }
        for package in self.options.imports() {
            if let Some(class) = introspector.class_by_name(&format!("{package}.{name}")) {
                return Ok(class);
            }
        }
        Err(self.raise(id, EvalError::method(format!("new {name}"))))
    }
}
