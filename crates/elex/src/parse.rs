//! Recursive-descent parser producing the node arena.
//!
//! Symbol binding happens here: identifiers resolve through the scope
//! stack, captures are threaded through intermediate lambda scopes, and
//! `let`/`const` carry their lexical and constness flags into the scope.
//! Runtime lexical enforcement (same-block redefinition, const assignment)
//! stays in the interpreter since it depends on evaluation options.

use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    error::{EvalError, EvalResult},
    lexer::{Tok, Token, scan},
    scope::Scope,
    span::Span,
    tree::{ArrowStyle, Ast, AstBuilder, Features, NodeId, NodeKind},
    value::Value,
};

/// Parses a full script: pragmas followed by statements.
pub(crate) fn parse_script(source: &str, name: &str) -> EvalResult<Ast> {
    Parser::new(source)?.script(name)
}

/// Parses a single expression; trailing input is an error.
pub(crate) fn parse_expression(source: &str, name: &str) -> EvalResult<Ast> {
    Parser::new(source)?.expression_only(name)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    builder: AstBuilder,
    /// Function-scope stack; index 0 is the script scope.
    scopes: Vec<Scope>,
    pragmas: IndexMap<String, Value>,
    features: Features,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> EvalResult<Self> {
        Ok(Self {
            source,
            tokens: scan(source)?,
            pos: 0,
            builder: AstBuilder::new(),
            scopes: vec![Scope::new()],
            pragmas: IndexMap::new(),
            features: Features::default(),
        })
    }

    // --- token plumbing ---

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let index = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[index].tok
    }

    fn here(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> EvalResult<Token> {
        if self.peek() == tok {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!("expected {what}")))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> EvalError {
        EvalError::parse(message).located(self.here(), self.source)
    }

    fn ident(&mut self, what: &str) -> EvalResult<(Arc<str>, Span)> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                let span = self.here();
                self.bump();
                Ok((name, span))
            }
            _ => Err(self.error_here(format!("expected {what}"))),
        }
    }

    fn span_from(&self, start: Span) -> Span {
        start.merge(self.prev_span())
    }

    // --- scopes and symbols ---

    fn scope(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("scope stack never empty")
    }

    fn declare(&mut self, name: &Arc<str>, constant: bool, lexical: bool, at: Span) -> EvalResult<u32> {
        self.scope()
            .declare_var(name.clone(), constant, lexical)
            .map_err(|name| EvalError::variable(name.as_ref(), crate::error::VariableIssue::Const).located(at, self.source))
    }

    /// Resolves a name through the scope stack, threading captures through
    /// every intermediate lambda scope. `None` means a context variable.
    fn bind_ident(&mut self, name: &Arc<str>) -> Option<u32> {
        let innermost = self.scopes.len() - 1;
        if let Some(index) = self.scopes[innermost].resolve(name) {
            return Some(index);
        }
        for depth in (0..innermost).rev() {
            if let Some(found) = self.scopes[depth].resolve(name) {
                self.scopes[depth].mark_captured(found);
                let constant = self.scopes[depth].symbol(found).constant;
                let mut in_parent = found;
                for inner in depth + 1..=innermost {
                    in_parent = self.scopes[inner].declare_capture(name.clone(), in_parent, constant);
                }
                return Some(in_parent);
            }
        }
        None
    }

    // --- entry points ---

    fn script(mut self, name: &str) -> EvalResult<Ast> {
        let start = self.here();
        let mut statements = Vec::new();
        while *self.peek() != Tok::Eof {
            if self.accept(&Tok::Pragma) {
                self.pragma()?;
                continue;
            }
            statements.push(self.statement()?);
        }
        let root = self.builder.push(NodeKind::Script, self.span_from(start), statements);
        self.finish(name, root)
    }

    fn expression_only(mut self, name: &str) -> EvalResult<Ast> {
        let start = self.here();
        let expr = self.expression()?;
        if *self.peek() != Tok::Eof {
            return Err(self.error_here("unexpected input after expression"));
        }
        let root = self.builder.push(NodeKind::Script, self.span_from(start), [expr]);
        self.finish(name, root)
    }

    fn finish(mut self, name: &str, root: NodeId) -> EvalResult<Ast> {
        let scope = Arc::new(self.scopes.pop().expect("scope stack never empty"));
        Ok(Ast::new(
            Arc::from(name),
            Arc::from(self.source),
            self.builder.into_nodes(),
            root,
            scope,
            self.pragmas,
            self.features,
        ))
    }

    /// `#pragma dotted.key literal`
    fn pragma(&mut self) -> EvalResult<()> {
        let (first, _) = self.ident("pragma key")?;
        let mut key = first.to_string();
        while self.accept(&Tok::Dot) {
            let (part, _) = self.ident("pragma key")?;
            key.push('.');
            key.push_str(&part);
        }
        let value = match self.peek().clone() {
            Tok::Int(i) => {
                self.bump();
                Value::Int(i)
            }
            Tok::Real(r) => {
                self.bump();
                Value::Real(r)
            }
            Tok::Str(s) => {
                self.bump();
                Value::Str(s)
            }
            Tok::True => {
                self.bump();
                Value::Bool(true)
            }
            Tok::False => {
                self.bump();
                Value::Bool(false)
            }
            Tok::Null => {
                self.bump();
                Value::Null
            }
            Tok::Ident(word) => {
                self.bump();
                Value::Str(word)
            }
            _ => return Err(self.error_here("expected pragma value")),
        };
        self.pragmas.insert(key, value);
        Ok(())
    }

    // --- statements ---

    fn statement(&mut self) -> EvalResult<NodeId> {
        let stmt = match self.peek() {
            Tok::LBrace if self.looks_like_block() => self.block(),
            Tok::Var | Tok::Let | Tok::Const => self.var_decl(),
            Tok::If => self.if_statement(),
            Tok::While => self.while_statement(),
            Tok::Do => self.do_while(),
            Tok::For => self.for_statement(),
            Tok::Return => self.return_statement(),
            Tok::Break => {
                let span = self.here();
                self.bump();
                Ok(self.builder.push(NodeKind::Break, span, []))
            }
            Tok::Continue => {
                let span = self.here();
                self.bump();
                Ok(self.builder.push(NodeKind::Continue, span, []))
            }
            Tok::Throw => {
                let start = self.here();
                self.bump();
                let value = self.expression()?;
                Ok(self.builder.push(NodeKind::Throw, self.span_from(start), [value]))
            }
            Tok::Try => self.try_statement(),
            Tok::Switch => self.switch_statement(),
            Tok::At => self.annotation(),
            _ => self.expression(),
        }?;
        // statement separators are optional
        while self.accept(&Tok::Semi) {}
        Ok(stmt)
    }

    /// `{` opens a block statement unless it reads as a map or set literal:
    /// `{}`, `{:}`, a `key :` pair, or a `value ,` element right away. An
    /// adjacent `ns:fn(` still opens a block since that is a namespace
    /// call, not an entry.
    fn looks_like_block(&self) -> bool {
        match (self.peek_at(1), self.peek_at(2)) {
            (Tok::Colon | Tok::RBrace, _) => false,
            (Tok::Ident(_), Tok::Colon) => self.namespace_call_at(self.pos + 1),
            (Tok::Str(_) | Tok::Int(_) | Tok::Real(_) | Tok::True | Tok::False | Tok::Null, Tok::Colon) => false,
            (Tok::Ident(_) | Tok::Str(_) | Tok::Int(_) | Tok::Real(_) | Tok::True | Tok::False | Tok::Null, Tok::Comma) => {
                false
            }
            _ => true,
        }
    }

    fn block(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.expect(&Tok::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            statements.push(self.statement()?);
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(self.builder.push(NodeKind::Block, self.span_from(start), statements))
    }

    fn var_decl(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let keyword = self.bump().tok;
        let constant = keyword == Tok::Const;
        let lexical = keyword != Tok::Var;
        if lexical {
            self.features.lexical_declarations = true;
        }
        let (name, name_span) = self.ident("variable name")?;
        let symbol = self.declare(&name, constant, lexical, name_span)?;
        let has_init = self.accept(&Tok::Assign);
        let init = if has_init { Some(self.expression()?) } else { None };
        if constant && !has_init {
            return Err(EvalError::parse(format!("constant '{name}' requires an initializer"))
                .located(name_span, self.source));
        }
        Ok(self.builder.push(
            NodeKind::Var {
                name,
                symbol,
                constant,
                lexical,
                has_init,
            },
            self.span_from(start),
            init,
        ))
    }

    fn if_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        self.expect(&Tok::LParen, "'(' after if")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "')'")?;
        let then = self.statement()?;
        let (has_else, otherwise) = if self.accept(&Tok::Else) {
            (true, Some(self.statement()?))
        } else {
            (false, None)
        };
        let children: SmallVec<[NodeId; 3]> = [cond, then].into_iter().chain(otherwise).collect();
        Ok(self
            .builder
            .push(NodeKind::If { has_else }, self.span_from(start), children))
    }

    fn while_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        self.expect(&Tok::LParen, "'(' after while")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "')'")?;
        let body = self.statement()?;
        Ok(self.builder.push(NodeKind::While, self.span_from(start), [cond, body]))
    }

    fn do_while(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        let body = self.statement()?;
        self.expect(&Tok::While, "'while' after do body")?;
        self.expect(&Tok::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(&Tok::RParen, "')'")?;
        Ok(self.builder.push(NodeKind::DoWhile, self.span_from(start), [body, cond]))
    }

    fn for_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        self.expect(&Tok::LParen, "'(' after for")?;
        // `for ( [var|let|const]? ident : ... )` is the iteration form
        let foreach = match self.peek() {
            Tok::Var | Tok::Let | Tok::Const => {
                matches!(self.peek_at(1), Tok::Ident(_)) && *self.peek_at(2) == Tok::Colon
            }
            Tok::Ident(_) => *self.peek_at(1) == Tok::Colon,
            _ => false,
        };
        if foreach {
            let (declares, constant, lexical) = match self.peek() {
                Tok::Var => (true, false, false),
                Tok::Let => (true, false, true),
                Tok::Const => (true, true, true),
                _ => (false, false, false),
            };
            if declares {
                self.bump();
            }
            let (name, name_span) = self.ident("loop variable")?;
            let symbol = if declares {
                Some(self.declare(&name, constant, lexical, name_span)?)
            } else {
                self.bind_ident(&name)
            };
            self.expect(&Tok::Colon, "':'")?;
            let iterable = self.expression()?;
            self.expect(&Tok::RParen, "')'")?;
            let body = self.statement()?;
            return Ok(self.builder.push(
                NodeKind::ForEach {
                    name,
                    symbol,
                    lexical,
                },
                self.span_from(start),
                [iterable, body],
            ));
        }
        // classic three-part loop
        let mut children: SmallVec<[NodeId; 4]> = SmallVec::new();
        let has_init = *self.peek() != Tok::Semi;
        if has_init {
            let init = if matches!(self.peek(), Tok::Var | Tok::Let | Tok::Const) {
                self.var_decl()?
            } else {
                self.expression()?
            };
            children.push(init);
        }
        self.expect(&Tok::Semi, "';' in for")?;
        let has_cond = *self.peek() != Tok::Semi;
        if has_cond {
            children.push(self.expression()?);
        }
        self.expect(&Tok::Semi, "';' in for")?;
        let has_step = *self.peek() != Tok::RParen;
        if has_step {
            children.push(self.expression()?);
        }
        self.expect(&Tok::RParen, "')'")?;
        children.push(self.statement()?);
        Ok(self.builder.push(
            NodeKind::ForLoop {
                has_init,
                has_cond,
                has_step,
            },
            self.span_from(start),
            children,
        ))
    }

    fn return_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        let has_value = !matches!(self.peek(), Tok::Semi | Tok::RBrace | Tok::Eof);
        let value = if has_value { Some(self.expression()?) } else { None };
        Ok(self
            .builder
            .push(NodeKind::Return { has_value }, self.span_from(start), value))
    }

    fn try_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        let mut children: SmallVec<[NodeId; 4]> = SmallVec::new();
        let mut resources = 0u16;
        if self.accept(&Tok::LParen) {
            loop {
                if !matches!(self.peek(), Tok::Var | Tok::Let | Tok::Const) {
                    return Err(self.error_here("expected resource declaration"));
                }
                children.push(self.var_decl()?);
                resources += 1;
                if !self.accept(&Tok::Semi) {
                    break;
                }
                if *self.peek() == Tok::RParen {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        children.push(self.block()?);
        let (catch_name, catch_symbol) = if self.accept(&Tok::Catch) {
            self.expect(&Tok::LParen, "'(' after catch")?;
            let (name, name_span) = self.ident("catch variable")?;
            let symbol = self.declare(&name, false, true, name_span)?;
            self.expect(&Tok::RParen, "')'")?;
            children.push(self.block()?);
            (Some(name), Some(symbol))
        } else {
            (None, None)
        };
        let has_finally = self.accept(&Tok::Finally);
        if has_finally {
            children.push(self.block()?);
        }
        if catch_name.is_none() && !has_finally && resources == 0 {
            return Err(EvalError::parse("try requires resources, catch, or finally").located(start, self.source));
        }
        Ok(self.builder.push(
            NodeKind::Try {
                resources,
                catch_name,
                catch_symbol,
                has_finally,
            },
            self.span_from(start),
            children,
        ))
    }

    fn switch_statement(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        self.expect(&Tok::LParen, "'(' after switch")?;
        let discriminant = self.expression()?;
        self.expect(&Tok::RParen, "')'")?;
        self.expect(&Tok::LBrace, "'{'")?;
        let mut children: SmallVec<[NodeId; 4]> = SmallVec::new();
        children.push(discriminant);
        while !matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            let case_start = self.here();
            let is_default = match self.peek() {
                Tok::Case => {
                    self.bump();
                    false
                }
                Tok::Default => {
                    self.bump();
                    true
                }
                _ => return Err(self.error_here("expected 'case' or 'default'")),
            };
            let mut arm: SmallVec<[NodeId; 3]> = SmallVec::new();
            if !is_default {
                arm.push(self.expression()?);
            }
            self.expect(&Tok::Colon, "':'")?;
            while !matches!(self.peek(), Tok::Case | Tok::Default | Tok::RBrace | Tok::Eof) {
                arm.push(self.statement()?);
            }
            children.push(
                self.builder
                    .push(NodeKind::Case { is_default }, self.span_from(case_start), arm),
            );
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(self.builder.push(NodeKind::Switch, self.span_from(start), children))
    }

    fn annotation(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.bump();
        let (name, _) = self.ident("annotation name")?;
        let args_start = self.here();
        let mut args = Vec::new();
        if self.accept(&Tok::LParen) {
            while *self.peek() != Tok::RParen {
                args.push(self.expression()?);
                if !self.accept(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen, "')'")?;
        }
        let arguments = self.builder.push(NodeKind::Arguments, self.span_from(args_start), args);
        let statement = self.statement()?;
        Ok(self.builder.push(
            NodeKind::Annotation { name },
            self.span_from(start),
            [arguments, statement],
        ))
    }

    // --- expressions, loosest binding first ---

    fn expression(&mut self) -> EvalResult<NodeId> {
        self.assignment()
    }

    fn assignment(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let lhs = self.ternary()?;
        let kind = match self.peek() {
            Tok::Assign => NodeKind::Assign,
            Tok::PlusAssign => NodeKind::SelfAdd,
            Tok::MinusAssign => NodeKind::SelfSubtract,
            Tok::StarAssign => NodeKind::SelfMultiply,
            Tok::SlashAssign => NodeKind::SelfDivide,
            Tok::PercentAssign => NodeKind::SelfMod,
            Tok::AmpAssign => NodeKind::SelfAnd,
            Tok::PipeAssign => NodeKind::SelfOr,
            Tok::CaretAssign => NodeKind::SelfXor,
            Tok::ShlAssign => NodeKind::SelfShl,
            Tok::SarAssign => NodeKind::SelfSar,
            Tok::ShruAssign => NodeKind::SelfShru,
            _ => return Ok(lhs),
        };
        self.assignable(lhs)?;
        self.bump();
        let rhs = self.assignment()?;
        Ok(self.builder.push(kind, self.span_from(start), [lhs, rhs]))
    }

    fn assignable(&self, target: NodeId) -> EvalResult<()> {
        match self.builder.kind(target) {
            NodeKind::Identifier { .. } | NodeKind::Property { .. } | NodeKind::Index { .. } => Ok(()),
            _ => Err(EvalError::parse("invalid assignment target").located(self.builder.span(target), self.source)),
        }
    }

    fn ternary(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let cond = self.coalesce()?;
        if self.accept(&Tok::Question) {
            let then = self.expression()?;
            self.expect(&Tok::Colon, "':' in ternary")?;
            let otherwise = self.expression()?;
            return Ok(self
                .builder
                .push(NodeKind::Ternary, self.span_from(start), [cond, then, otherwise]));
        }
        if self.accept(&Tok::Elvis) {
            let otherwise = self.ternary()?;
            return Ok(self.builder.push(NodeKind::Elvis, self.span_from(start), [cond, otherwise]));
        }
        Ok(cond)
    }

    fn coalesce(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.logical_or()?;
        while self.accept(&Tok::Coalesce) {
            let rhs = self.logical_or()?;
            node = self.builder.push(NodeKind::NullCoalesce, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn logical_or(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.logical_and()?;
        while self.accept(&Tok::OrOr) {
            let rhs = self.logical_and()?;
            node = self.builder.push(NodeKind::Or, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn logical_and(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.bit_or()?;
        while self.accept(&Tok::AndAnd) {
            let rhs = self.bit_or()?;
            node = self.builder.push(NodeKind::And, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn bit_or(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.bit_xor()?;
        while self.accept(&Tok::Pipe) {
            let rhs = self.bit_xor()?;
            node = self.builder.push(NodeKind::BitOr, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn bit_xor(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.bit_and()?;
        while self.accept(&Tok::Caret) {
            let rhs = self.bit_and()?;
            node = self.builder.push(NodeKind::BitXor, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn bit_and(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.equality()?;
        while self.accept(&Tok::Amp) {
            let rhs = self.equality()?;
            node = self.builder.push(NodeKind::BitAnd, self.span_from(start), [node, rhs]);
        }
        Ok(node)
    }

    fn equality(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.relational()?;
        loop {
            let kind = match self.peek() {
                Tok::EqEq => NodeKind::Eq,
                Tok::BangEq => NodeKind::Ne,
                Tok::Match => NodeKind::Contains,
                Tok::NotMatch => NodeKind::NotContains,
                Tok::StartsWith => NodeKind::StartsWith,
                Tok::NotStartsWith => NodeKind::NotStartsWith,
                Tok::EndsWith => NodeKind::EndsWith,
                Tok::NotEndsWith => NodeKind::NotEndsWith,
                _ => return Ok(node),
            };
            self.bump();
            let rhs = self.relational()?;
            node = self.builder.push(kind, self.span_from(start), [node, rhs]);
        }
    }

    fn relational(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.shift()?;
        loop {
            let kind = match self.peek() {
                Tok::Lt => NodeKind::Lt,
                Tok::Le => NodeKind::Le,
                Tok::Gt => NodeKind::Gt,
                Tok::Ge => NodeKind::Ge,
                _ => return Ok(node),
            };
            self.bump();
            let rhs = self.shift()?;
            node = self.builder.push(kind, self.span_from(start), [node, rhs]);
        }
    }

    fn shift(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.range()?;
        loop {
            let kind = match self.peek() {
                Tok::Shl => NodeKind::Shl,
                Tok::Sar => NodeKind::Sar,
                Tok::Shru => NodeKind::Shru,
                _ => return Ok(node),
            };
            self.bump();
            let rhs = self.range()?;
            node = self.builder.push(kind, self.span_from(start), [node, rhs]);
        }
    }

    fn range(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let node = self.additive()?;
        if self.accept(&Tok::DotDot) {
            let rhs = self.additive()?;
            return Ok(self.builder.push(NodeKind::Range, self.span_from(start), [node, rhs]));
        }
        Ok(node)
    }

    fn additive(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.multiplicative()?;
        loop {
            let kind = match self.peek() {
                Tok::Plus => NodeKind::Add,
                Tok::Minus => NodeKind::Subtract,
                _ => return Ok(node),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            node = self.builder.push(kind, self.span_from(start), [node, rhs]);
        }
    }

    fn multiplicative(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.unary()?;
        loop {
            let kind = match self.peek() {
                Tok::Star => NodeKind::Multiply,
                Tok::Slash => NodeKind::Divide,
                Tok::Percent => NodeKind::Mod,
                _ => return Ok(node),
            };
            self.bump();
            let rhs = self.unary()?;
            node = self.builder.push(kind, self.span_from(start), [node, rhs]);
        }
    }

    fn unary(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let kind = match self.peek() {
            Tok::Bang => NodeKind::Not,
            Tok::Minus => NodeKind::Negate,
            Tok::Plus => NodeKind::Positivize,
            Tok::Tilde => NodeKind::Complement,
            Tok::Empty => NodeKind::Empty,
            Tok::Size => NodeKind::Size,
            Tok::PlusPlus => NodeKind::IncrementGet,
            Tok::MinusMinus => NodeKind::DecrementGet,
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        if matches!(kind, NodeKind::IncrementGet | NodeKind::DecrementGet) {
            self.assignable(operand)?;
        }
        Ok(self.builder.push(kind, self.span_from(start), [operand]))
    }

    fn postfix(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.suffixed()?;
        loop {
            let kind = match self.peek() {
                Tok::PlusPlus => NodeKind::GetIncrement,
                Tok::MinusMinus => NodeKind::GetDecrement,
                _ => return Ok(node),
            };
            self.assignable(node)?;
            self.bump();
            node = self.builder.push(kind, self.span_from(start), [node]);
        }
    }

    /// A primary expression with its navigation and call suffixes.
    fn suffixed(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        let mut node = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot | Tok::QDot => {
                    let safe = *self.peek() == Tok::QDot;
                    self.bump();
                    let (name, name_span) = self.ident("member name")?;
                    let member = self
                        .builder
                        .push(NodeKind::Identifier { name, symbol: None }, name_span, []);
                    if *self.peek() == Tok::LParen {
                        let args = self.arguments()?;
                        node = self.builder.push(
                            NodeKind::MethodCall { safe },
                            self.span_from(start),
                            [node, member, args],
                        );
                    } else {
                        node = self
                            .builder
                            .push(NodeKind::Property { safe }, self.span_from(start), [node, member]);
                    }
                }
                Tok::LBracket | Tok::QBracket => {
                    let safe = *self.peek() == Tok::QBracket;
                    self.bump();
                    let key = self.expression()?;
                    self.expect(&Tok::RBracket, "']'")?;
                    node = self
                        .builder
                        .push(NodeKind::Index { safe }, self.span_from(start), [node, key]);
                }
                Tok::LParen => {
                    let args = self.arguments()?;
                    node = self.builder.push(NodeKind::Call, self.span_from(start), [node, args]);
                }
                _ => return Ok(node),
            }
        }
    }

    fn arguments(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        self.expect(&Tok::LParen, "'('")?;
        let mut args = Vec::new();
        while *self.peek() != Tok::RParen {
            args.push(self.expression()?);
            if !self.accept(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok(self.builder.push(NodeKind::Arguments, self.span_from(start), args))
    }

    #[expect(clippy::too_many_lines, reason = "one arm per literal form")]
    fn primary(&mut self) -> EvalResult<NodeId> {
        let start = self.here();
        match self.peek().clone() {
            Tok::Null => {
                self.bump();
                Ok(self.builder.push(NodeKind::Null, start, []))
            }
            Tok::True => {
                self.bump();
                Ok(self.builder.push(NodeKind::True, start, []))
            }
            Tok::False => {
                self.bump();
                Ok(self.builder.push(NodeKind::False, start, []))
            }
            Tok::Int(i) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Int(i), start, []))
            }
            Tok::Big(big) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Big(Arc::new(big)), start, []))
            }
            Tok::Real(r) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Real(r), start, []))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(self.builder.push(NodeKind::Str(s), start, []))
            }
            Tok::Ident(name) => {
                // `ns:fn(...)` with the tokens written adjacently
                if self.namespace_call_ahead() {
                    self.bump();
                    self.bump();
                    let (fn_name, _) = self.ident("namespace function")?;
                    let args = self.arguments()?;
                    self.features.namespace_calls = true;
                    return Ok(self.builder.push(
                        NodeKind::NamespaceCall { ns: name, name: fn_name },
                        self.span_from(start),
                        [args],
                    ));
                }
                // `x -> expr` single-parameter lambda
                if matches!(self.peek_at(1), Tok::Arrow | Tok::FatArrow) {
                    self.bump();
                    let arrow = if self.accept(&Tok::Arrow) {
                        self.features.thin_arrow = true;
                        ArrowStyle::Thin
                    } else {
                        self.bump();
                        self.features.fat_arrow = true;
                        ArrowStyle::Fat
                    };
                    return self.lambda(start, vec![name], arrow);
                }
                self.bump();
                let symbol = self.bind_ident(&name);
                Ok(self.builder.push(NodeKind::Identifier { name, symbol }, start, []))
            }
            Tok::LParen => {
                if let Some(params) = self.lambda_params_ahead() {
                    let arrow = if self.accept(&Tok::Arrow) {
                        self.features.thin_arrow = true;
                        ArrowStyle::Thin
                    } else {
                        self.bump();
                        self.features.fat_arrow = true;
                        ArrowStyle::Fat
                    };
                    return self.lambda(start, params, arrow);
                }
                self.bump();
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::Function => {
                self.bump();
                self.expect(&Tok::LParen, "'(' after function")?;
                let mut params = Vec::new();
                while let Tok::Ident(_) = self.peek() {
                    let (param, _) = self.ident("parameter")?;
                    params.push(param);
                    if !self.accept(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RParen, "')'")?;
                self.lambda(start, params, ArrowStyle::Function)
            }
            Tok::LBracket => {
                self.bump();
                let mut items = Vec::new();
                while *self.peek() != Tok::RBracket {
                    items.push(self.expression()?);
                    if !self.accept(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(self.builder.push(NodeKind::ArrayLit, self.span_from(start), items))
            }
            Tok::LBrace => {
                self.bump();
                // `{:}` and `{}` are both the empty map
                if self.accept(&Tok::Colon) {
                    self.expect(&Tok::RBrace, "'}'")?;
                    return Ok(self.builder.push(NodeKind::MapLit, self.span_from(start), []));
                }
                if self.accept(&Tok::RBrace) {
                    return Ok(self.builder.push(NodeKind::MapLit, self.span_from(start), []));
                }
                // the first entry decides: `expr :` opens a map, anything
                // else a set
                let entry_start = self.here();
                let first = self.expression()?;
                if self.accept(&Tok::Colon) {
                    let value = self.expression()?;
                    let mut entries = vec![
                        self.builder
                            .push(NodeKind::MapEntry, self.span_from(entry_start), [first, value]),
                    ];
                    while self.accept(&Tok::Comma) {
                        if *self.peek() == Tok::RBrace {
                            break;
                        }
                        let entry_start = self.here();
                        let key = self.expression()?;
                        self.expect(&Tok::Colon, "':' in map entry")?;
                        let value = self.expression()?;
                        entries.push(
                            self.builder
                                .push(NodeKind::MapEntry, self.span_from(entry_start), [key, value]),
                        );
                    }
                    self.expect(&Tok::RBrace, "'}'")?;
                    return Ok(self.builder.push(NodeKind::MapLit, self.span_from(start), entries));
                }
                let mut items = vec![first];
                while self.accept(&Tok::Comma) {
                    if *self.peek() == Tok::RBrace {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(&Tok::RBrace, "'}'")?;
                Ok(self.builder.push(NodeKind::SetLit, self.span_from(start), items))
            }
            Tok::New => {
                self.bump();
                if self.accept(&Tok::LParen) {
                    let class_expr = self.expression()?;
                    self.expect(&Tok::RParen, "')'")?;
                    let args = self.arguments()?;
                    return Ok(self.builder.push(
                        NodeKind::New { class_name: None },
                        self.span_from(start),
                        [class_expr, args],
                    ));
                }
                let (first, _) = self.ident("class name")?;
                let mut dotted = first.to_string();
                while *self.peek() == Tok::Dot {
                    self.bump();
                    let (part, _) = self.ident("class name")?;
                    dotted.push('.');
                    dotted.push_str(&part);
                }
                let args = self.arguments()?;
                Ok(self.builder.push(
                    NodeKind::New {
                        class_name: Some(Arc::from(dotted.as_str())),
                    },
                    self.span_from(start),
                    [args],
                ))
            }
            _ => Err(self.error_here("expected an expression")),
        }
    }

    /// Namespace calls require `ident:ident(` written without spaces, which
    /// keeps the ':' unambiguous with ternaries and map entries.
    fn namespace_call_ahead(&self) -> bool {
        self.namespace_call_at(self.pos)
    }

    fn namespace_call_at(&self, at: usize) -> bool {
        let token = |offset: usize| &self.tokens[(at + offset).min(self.tokens.len() - 1)];
        matches!(token(0).tok, Tok::Ident(_))
            && matches!(token(1).tok, Tok::Colon)
            && matches!(token(2).tok, Tok::Ident(_))
            && matches!(token(3).tok, Tok::LParen)
            && token(1).span.start == token(0).span.end
            && token(2).span.start == token(1).span.end
    }

    /// Detects `(p1, p2, ...) ->` without committing; on success the
    /// parameter list and the closing parenthesis are consumed and the
    /// arrow token is next.
    fn lambda_params_ahead(&mut self) -> Option<Vec<Arc<str>>> {
        let save = self.pos;
        if !self.accept(&Tok::LParen) {
            return None;
        }
        let mut params = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::RParen => {
                    self.bump();
                    break;
                }
                Tok::Ident(name) => {
                    self.bump();
                    params.push(name);
                    if self.accept(&Tok::Comma) {
                        continue;
                    }
                    if *self.peek() == Tok::RParen {
                        self.bump();
                        break;
                    }
                    self.pos = save;
                    return None;
                }
                _ => {
                    self.pos = save;
                    return None;
                }
            }
        }
        if matches!(self.peek(), Tok::Arrow | Tok::FatArrow) {
            Some(params)
        } else {
            self.pos = save;
            None
        }
    }

    /// Parses a lambda body in a fresh scope. The arrow token (for arrow
    /// styles) must already be consumed.
    fn lambda(&mut self, start: Span, params: Vec<Arc<str>>, arrow: ArrowStyle) -> EvalResult<NodeId> {
        self.scopes.push(Scope::new());
        for param in params {
            self.scope().declare_param(param);
        }
        let body = if *self.peek() == Tok::LBrace {
            self.block()
        } else {
            self.expression()
        };
        let scope = self.scopes.pop().expect("lambda scope pushed above");
        let body = body?;
        Ok(self.builder.push(
            NodeKind::Lambda {
                scope: Arc::new(scope),
                arrow,
            },
            self.span_from(start),
            [body],
        ))
    }
}
