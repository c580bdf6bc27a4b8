//! Line-oriented templates composing text and script.
//!
//! A template source is processed line by line. A line whose first
//! non-space characters are the directive prefix (for example `$$`) is
//! script code; any other line is verbatim text in which `${expr}`
//! interpolates an expression. Inside a directive line, a second directive
//! prefix followed by `{` hands the rest of the line back to verbatim
//! processing with one prefix character stripped, so loops can emit
//! per-iteration text without leaving the line.
//!
//! Compilation composes one script from the directive code with
//! `elex:print(n)` calls emitting the n-th pre-parsed literal part and
//! `elex:echo(expr)` calls emitting interpolated values; evaluation runs
//! that script with an output sink attached and flushes the result to the
//! caller's writer. Because the composition is a single script,
//! interpolations see the directives' loop variables and locals.

use std::{cell::RefCell, fmt, rc::Rc, sync::Arc};

use crate::{
    engine::EngineCore,
    error::{EvalError, EvalResult},
    interpreter::Interpreter,
    options::Options,
    parse,
    tree::Ast,
    value::Value,
};

/// The namespace reserved for template output calls.
pub(crate) const TEMPLATE_NAMESPACE: &str = "elex";

/// Per-evaluation output hook handed to the interpreter.
#[derive(Clone)]
pub(crate) struct TemplateSink {
    lits: Arc<Vec<Arc<str>>>,
    out: Rc<RefCell<String>>,
}

impl TemplateSink {
    pub fn write_literal(&self, index: usize) {
        if let Some(lit) = self.lits.get(index) {
            self.out.borrow_mut().push_str(lit);
        }
    }

    pub fn write_value(&self, value: &Value) {
        use std::fmt::Write;
        let _ = write!(self.out.borrow_mut(), "{value}");
    }
}

/// A compiled template.
pub struct Template {
    core: Arc<EngineCore>,
    ast: Arc<Ast>,
    lits: Arc<Vec<Arc<str>>>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template").field("literals", &self.lits.len()).finish()
    }
}

impl Template {
    pub(crate) fn parse(core: Arc<EngineCore>, prefix: &str, source: &str) -> EvalResult<Self> {
        if prefix.is_empty() {
            return Err(EvalError::parse("template prefix must not be empty"));
        }
        // the immediate (interpolation) prefix is the first character of
        // the directive prefix; "$$" directives pair with "${...}"
        let immediate = &prefix[..prefix.chars().next().map_or(1, char::len_utf8)];
        let inline = format!("{prefix}{{");
        let mut code = String::new();
        let mut lits: Vec<Arc<str>> = Vec::new();
        for raw in source.split_inclusive('\n') {
            // the terminator belongs to the verbatim output, never to code
            let (content, terminator) = match raw.strip_suffix('\n') {
                Some(c) => (c.strip_suffix('\r').unwrap_or(c), "\n"),
                None => (raw, ""),
            };
            let stripped = content.trim_start();
            if let Some(rest) = stripped.strip_prefix(prefix) {
                if let Some(at) = rest.find(&inline) {
                    code.push_str(&rest[..at]);
                    // drop one immediate char, turning `$${e}` into `${e}`
                    let tail = format!("{}{terminator}", &rest[at + immediate.len()..]);
                    compose_verbatim(&tail, immediate, &mut code, &mut lits)?;
                } else {
                    code.push_str(rest);
                }
                code.push('\n');
            } else {
                let tail = format!("{content}{terminator}");
                compose_verbatim(&tail, immediate, &mut code, &mut lits)?;
                code.push('\n');
            }
        }
        let ast = Arc::new(parse::parse_script(&code, "<template>")?);
        Ok(Self {
            core,
            ast,
            lits: Arc::new(lits),
        })
    }

    /// Evaluates the template, streaming output to `writer`.
    pub fn evaluate(&self, context: &mut dyn crate::context::Context, writer: &mut dyn fmt::Write) -> EvalResult<()> {
        let options = self.core.options.clone();
        self.evaluate_with(context, writer, &options)
    }

    pub fn evaluate_with(
        &self,
        context: &mut dyn crate::context::Context,
        writer: &mut dyn fmt::Write,
        options: &Options,
    ) -> EvalResult<()> {
        let sink = TemplateSink {
            lits: self.lits.clone(),
            out: Rc::new(RefCell::new(String::new())),
        };
        Interpreter::new(&self.core, &self.ast, context, options.clone())
            .with_sink(sink.clone())
            .run()?;
        writer
            .write_str(&sink.out.borrow())
            .map_err(|_| EvalError::operator("template", "writer failed"))
    }

    /// The composed script source, mainly useful for diagnostics.
    pub fn composed_source(&self) -> &str {
        &self.ast.source
    }
}

/// Turns verbatim text into `elex:print`/`elex:echo` calls, collecting
/// literal parts into the table.
fn compose_verbatim(text: &str, immediate: &str, code: &mut String, lits: &mut Vec<Arc<str>>) -> EvalResult<()> {
    use std::fmt::Write;
    let opener = format!("{immediate}{{");
    let mut rest = text;
    let mut literal = String::new();
    while let Some(at) = rest.find(&opener) {
        literal.push_str(&rest[..at]);
        let body = &rest[at + opener.len()..];
        let Some(end) = matching_brace(body) else {
            return Err(EvalError::parse("unterminated template interpolation"));
        };
        if !literal.is_empty() {
            let _ = write!(code, "{TEMPLATE_NAMESPACE}:print({});", lits.len());
            lits.push(Arc::from(literal.as_str()));
            literal.clear();
        }
        let _ = write!(code, "{TEMPLATE_NAMESPACE}:echo({});", &body[..end]);
        rest = &body[end + 1..];
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        let _ = write!(code, "{TEMPLATE_NAMESPACE}:print({});", lits.len());
        lits.push(Arc::from(literal.as_str()));
    }
    Ok(())
}

/// Offset of the `}` closing an interpolation, counting nested braces.
fn matching_brace(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (index, c) in body.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}
