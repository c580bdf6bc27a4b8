//! Error taxonomy and control-flow unwinding.
//!
//! `EvalError` is the public error type surfaced to the host; it carries the
//! error kind plus, when available, the span and the exact source fragment of
//! the offending node. `Unwind` is the internal control-flow sum threaded
//! through the recursive walk; `break`, `continue`, and `return` are ordinary
//! results there, never host-visible errors.

use std::fmt;

use strum::Display;

use crate::{span::Span, value::Value};

/// Result alias for fallible engine operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Result alias for the interpreter walk. The error side is control flow,
/// not necessarily a failure.
pub(crate) type Step<T> = Result<T, Unwind>;

/// What went wrong with an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VariableIssue {
    /// The identifier resolves nowhere.
    #[strum(serialize = "undefined")]
    Undefined,
    /// The identifier resolves to null where a value is required.
    #[strum(serialize = "null")]
    NullValue,
    /// The identifier was redeclared within the same lexical block.
    #[strum(serialize = "redefined")]
    Redefined,
    /// Assignment to an already initialised constant.
    #[strum(serialize = "constant")]
    Const,
}

/// The error taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Source text does not conform to the grammar.
    Parse(String),
    /// Identifier resolution failure.
    Variable { name: String, issue: VariableIssue },
    /// Property access failure. `undefined` distinguishes a missing property
    /// from a null-valued one.
    Property { path: String, undefined: bool },
    /// No method of this name and argument shape could be resolved.
    Method { name: String },
    /// Operator dispatch failure.
    Operator { symbol: &'static str, message: String },
    /// An annotation processor failed or the annotation is unknown.
    Annotation { name: String, message: String },
    /// A null operand reached an operator that is strict for nulls.
    NullOperand { symbol: &'static str },
    /// Evaluation was cancelled cooperatively.
    Cancelled,
    /// A user `throw`. The payload is the thrown value.
    Thrown(Value),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "parse error: {message}"),
            Self::Variable { name, issue } => match issue {
                VariableIssue::Undefined => write!(f, "variable '{name}' is undefined"),
                VariableIssue::NullValue => write!(f, "variable '{name}' is null"),
                VariableIssue::Redefined => write!(f, "variable '{name}' is already declared in this block"),
                VariableIssue::Const => write!(f, "cannot assign constant '{name}'"),
            },
            Self::Property { path, undefined } => {
                if *undefined {
                    write!(f, "undefined property '{path}'")
                } else {
                    write!(f, "null property '{path}'")
                }
            }
            Self::Method { name } => write!(f, "unsolvable method '{name}'"),
            Self::Operator { symbol, message } => write!(f, "operator '{symbol}' error: {message}"),
            Self::Annotation { name, message } => write!(f, "annotation '@{name}' error: {message}"),
            Self::NullOperand { symbol } => write!(f, "null operand for operator '{symbol}'"),
            Self::Cancelled => write!(f, "evaluation cancelled"),
            Self::Thrown(value) => write!(f, "thrown: {value}"),
        }
    }
}

/// An evaluation or parse error, locatable in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    kind: ErrorKind,
    span: Option<Span>,
    fragment: Option<Box<str>>,
    line: u32,
    col: u32,
}

impl EvalError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            span: None,
            fragment: None,
            line: 0,
            col: 0,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(message.into()))
    }

    pub fn variable(name: impl Into<String>, issue: VariableIssue) -> Self {
        Self::new(ErrorKind::Variable { name: name.into(), issue })
    }

    pub fn property(path: impl Into<String>, undefined: bool) -> Self {
        Self::new(ErrorKind::Property { path: path.into(), undefined })
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::Method { name: name.into() })
    }

    pub fn operator(symbol: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operator { symbol, message: message.into() })
    }

    pub fn annotation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Annotation { name: name.into(), message: message.into() })
    }

    pub fn null_operand(symbol: &'static str) -> Self {
        Self::new(ErrorKind::NullOperand { symbol })
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    pub fn thrown(value: Value) -> Self {
        Self::new(ErrorKind::Thrown(value))
    }

    /// Attaches the node span and extracts the source fragment it covers.
    ///
    /// The first location attached wins; re-locating while an error
    /// propagates outward must not widen the reported fragment.
    #[must_use]
    pub fn located(mut self, span: Span, source: &str) -> Self {
        if self.span.is_none() {
            let (line, col) = span.line_col(source);
            self.span = Some(span);
            self.fragment = Some(span.slice(source).into());
            self.line = line;
            self.col = col;
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The byte offsets bounding the offending source fragment, when known.
    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// The reconstructed source fragment for the offending node, when known.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// The thrown value for user exceptions, the message string otherwise.
    pub fn to_value(&self) -> Value {
        match &self.kind {
            ErrorKind::Thrown(value) => value.clone(),
            kind => Value::str(kind.to_string()),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(fragment) = &self.fragment {
            write!(f, " at {}:{} '{fragment}'", self.line, self.col)?;
        }
        Ok(())
    }
}

impl std::error::Error for EvalError {}

/// Control-flow signal for the recursive walk.
///
/// `break`, `continue`, and `return` unwind to the nearest enclosing loop or
/// script body; `Throw` carries a real error outward.
#[derive(Debug)]
pub(crate) enum Unwind {
    Break,
    Continue,
    Return(Value),
    Throw(EvalError),
}

impl From<EvalError> for Unwind {
    fn from(err: EvalError) -> Self {
        Self::Throw(err)
    }
}

impl Unwind {
    /// Converts a loose control-flow signal at a boundary into an error.
    pub fn into_error(self) -> EvalError {
        match self {
            Self::Throw(err) => err,
            Self::Break => EvalError::parse("'break' outside of a loop"),
            Self::Continue => EvalError::parse("'continue' outside of a loop"),
            Self::Return(_) => EvalError::parse("'return' outside of a script"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_keeps_first_location() {
        let src = "undef + 1";
        let err = EvalError::variable("undef", VariableIssue::Undefined)
            .located(Span::new(0, 5), src)
            .located(Span::new(0, 9), src);
        assert_eq!(err.fragment(), Some("undef"));
        assert_eq!(err.span(), Some(Span::new(0, 5)));
    }

    #[test]
    fn display_includes_fragment() {
        let src = "x + y";
        let err = EvalError::null_operand("+").located(Span::new(0, 5), src);
        assert_eq!(err.to_string(), "null operand for operator '+' at 1:1 'x + y'");
    }
}
