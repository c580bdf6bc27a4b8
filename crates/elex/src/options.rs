//! Per-evaluation configuration.

use std::sync::Arc;

use ahash::AHashMap;

use crate::value::Value;

/// Evaluation options. Captured at interpreter construction and immutable
/// for the duration of one evaluation.
#[derive(Debug, Clone)]
pub struct Options {
    /// Unresolved variables, properties, and strict-null operands raise
    /// instead of degrading to null.
    pub strict: bool,
    /// Surfaced errors are downgraded to debug log events and the
    /// evaluation yields null.
    pub silent: bool,
    /// Null navigation on simple identifier references yields null silently.
    pub safe: bool,
    /// The shared cancellation flag is honoured.
    pub cancellable: bool,
    /// Block-level redeclaration of a symbol is an error.
    pub lexical: bool,
    /// Symbols whose block exited become invisible instead of falling
    /// through to the context.
    pub lexical_shade: bool,
    /// An unresolved dotted identifier chain falls back to a single
    /// composite variable name in the context.
    pub antish: bool,
    namespaces: AHashMap<Arc<str>, Value>,
    imports: Vec<Arc<str>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strict: false,
            silent: false,
            safe: false,
            cancellable: true,
            lexical: false,
            lexical_shade: false,
            antish: true,
            namespaces: AHashMap::new(),
            imports: Vec::new(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    #[must_use]
    pub fn cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    #[must_use]
    pub fn lexical(mut self, lexical: bool) -> Self {
        self.lexical = lexical;
        self
    }

    #[must_use]
    pub fn lexical_shade(mut self, shade: bool) -> Self {
        self.lexical_shade = shade;
        self
    }

    #[must_use]
    pub fn antish(mut self, antish: bool) -> Self {
        self.antish = antish;
        self
    }

    /// Registers a namespace handle under a prefix for this evaluation.
    #[must_use]
    pub fn namespace(mut self, prefix: impl Into<Arc<str>>, handle: Value) -> Self {
        self.namespaces.insert(prefix.into(), handle);
        self
    }

    /// Appends a package to the ordered import list used for class name
    /// resolution.
    #[must_use]
    pub fn import(mut self, package: impl Into<Arc<str>>) -> Self {
        self.imports.push(package.into());
        self
    }

    /// Shading implies lexical checking.
    pub fn is_lexical(&self) -> bool {
        self.lexical || self.lexical_shade
    }

    pub fn namespaces(&self) -> &AHashMap<Arc<str>, Value> {
        &self.namespaces
    }

    pub fn imports(&self) -> &[Arc<str>] {
        &self.imports
    }
}
