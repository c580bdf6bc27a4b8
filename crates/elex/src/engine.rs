//! The engine: shared state and the public evaluation surface.
//!
//! An `Engine` is thread-safe and long-lived; it owns the arithmetic, the
//! introspector, the registered namespaces, and the source cache, and
//! produces `Script`s that evaluate against a host `Context`. Each
//! evaluation runs an independent single-use interpreter.

use std::{fmt, sync::Arc};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    arithmetic::{Arithmetic, ArithmeticRef, DefaultArithmetic},
    cache::SourceCache,
    context::Context,
    error::{EvalError, EvalResult},
    interpreter::{Interpreter, run_closure},
    introspect::{ClassDescriptor, DefaultStrategy, Introspector, Permissions, ResolverStrategy},
    options::Options,
    parse,
    template::Template,
    tree::{Ast, Features},
    value::Value,
};

/// Handles `@name(...)` annotations ahead of the annotated statement.
pub trait AnnotationProcessor: Send + Sync {
    /// Returns whether the annotated statement should execute. Errors
    /// surface as annotation errors carrying the annotation name.
    fn process(&self, name: &str, args: &[Value]) -> EvalResult<bool>;
}

pub(crate) struct EngineCore {
    pub(crate) arithmetic: ArithmeticRef,
    pub(crate) introspector: Introspector,
    pub(crate) namespaces: AHashMap<Arc<str>, Value>,
    pub(crate) annotations: Option<Arc<dyn AnnotationProcessor>>,
    pub(crate) options: Options,
    pub(crate) cache: SourceCache,
}

impl fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCore")
            .field("arithmetic", &self.arithmetic)
            .field("namespaces", &self.namespaces.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

/// A thread-safe expression/script engine.
#[derive(Debug, Clone)]
pub struct Engine {
    core: Arc<EngineCore>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with stock arithmetic, unrestricted permissions, and
    /// default options.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Parses a script (statements), consulting the source cache first.
    pub fn create_script(&self, source: &str) -> EvalResult<Script> {
        if let Some(ast) = self.core.cache.get(source, false) {
            return Ok(Script {
                core: self.core.clone(),
                ast,
            });
        }
        let ast = Arc::new(parse::parse_script(source, "<script>")?);
        self.core.cache.put(ast.source.clone(), false, ast.clone());
        Ok(Script {
            core: self.core.clone(),
            ast,
        })
    }

    /// Parses a single expression, consulting the source cache first.
    pub fn create_expression(&self, source: &str) -> EvalResult<Script> {
        if let Some(ast) = self.core.cache.get(source, true) {
            return Ok(Script {
                core: self.core.clone(),
                ast,
            });
        }
        let ast = Arc::new(parse::parse_expression(source, "<expression>")?);
        self.core.cache.put(ast.source.clone(), true, ast.clone());
        Ok(Script {
            core: self.core.clone(),
            ast,
        })
    }

    /// Parses a template with the given directive prefix.
    pub fn create_template(&self, prefix: &str, source: &str) -> EvalResult<Template> {
        Template::parse(self.core.clone(), prefix, source)
    }

    /// Parse-and-evaluate convenience for one-off expressions.
    pub fn evaluate(&self, source: &str, context: &mut dyn Context) -> EvalResult<Value> {
        self.create_expression(source)?.execute(context)
    }

    /// Invokes a lambda value produced by an earlier evaluation.
    pub fn invoke(&self, lambda: &Value, context: &mut dyn Context, args: Vec<Value>) -> EvalResult<Value> {
        let Value::Lambda(closure) = lambda else {
            return Err(EvalError::method(format!("{} is not callable", lambda.type_name())));
        };
        let options = self.core.options.clone();
        let cancel = if options.cancellable { context.cancellation() } else { None };
        run_closure(&self.core, context, options, cancel, None, closure, args).map_err(crate::error::Unwind::into_error)
    }

    /// Registers a class for by-name lookup after construction.
    pub fn register_class(&self, descriptor: Arc<ClassDescriptor>) {
        self.core.introspector.register_class(descriptor);
    }

    pub fn class_by_name(&self, name: &str) -> Option<Arc<ClassDescriptor>> {
        self.core.introspector.class_by_name(name)
    }

    /// Version counter of the shared introspection tier; bumps whenever
    /// the tier is collapsed.
    pub fn introspection_version(&self) -> u64 {
        self.core.introspector.version()
    }

    /// Drops the source cache and the shared introspection tier. Both
    /// repopulate transparently on later use.
    pub fn clear_caches(&self) {
        self.core.cache.clear();
        self.core.introspector.clear_cache();
    }

    pub fn options(&self) -> &Options {
        &self.core.options
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    arithmetic: Option<ArithmeticRef>,
    permissions: Permissions,
    strategy: Arc<dyn ResolverStrategy>,
    namespaces: AHashMap<Arc<str>, Value>,
    annotations: Option<Arc<dyn AnnotationProcessor>>,
    classes: Vec<Arc<ClassDescriptor>>,
    options: Options,
    cache_size: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            arithmetic: None,
            permissions: Permissions::unrestricted(),
            strategy: Arc::new(DefaultStrategy),
            namespaces: AHashMap::new(),
            annotations: None,
            classes: Vec::new(),
            options: Options::default(),
            cache_size: 256,
        }
    }
}

impl EngineBuilder {
    #[must_use]
    pub fn arithmetic(mut self, arithmetic: impl Arithmetic + 'static) -> Self {
        self.arithmetic = Some(Arc::new(arithmetic));
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: impl ResolverStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    /// Registers a namespace handle (an instance, a class, or a class
    /// name) under a prefix for every evaluation of this engine.
    #[must_use]
    pub fn namespace(mut self, prefix: impl Into<Arc<str>>, handle: Value) -> Self {
        self.namespaces.insert(prefix.into(), handle);
        self
    }

    #[must_use]
    pub fn annotation_processor(mut self, processor: impl AnnotationProcessor + 'static) -> Self {
        self.annotations = Some(Arc::new(processor));
        self
    }

    #[must_use]
    pub fn register_class(mut self, descriptor: Arc<ClassDescriptor>) -> Self {
        self.classes.push(descriptor);
        self
    }

    /// Default evaluation options, used by `Script::execute`.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Source cache capacity; zero disables the cache.
    #[must_use]
    pub fn cache_size(mut self, capacity: usize) -> Self {
        self.cache_size = capacity;
        self
    }

    pub fn build(self) -> Engine {
        let introspector = Introspector::new(self.permissions, self.strategy);
        for class in self.classes {
            introspector.register_class(class);
        }
        Engine {
            core: Arc::new(EngineCore {
                arithmetic: self.arithmetic.unwrap_or_else(|| Arc::new(DefaultArithmetic::new())),
                introspector,
                namespaces: self.namespaces,
                annotations: self.annotations,
                options: self.options,
                cache: SourceCache::new(self.cache_size),
            }),
        }
    }
}

/// A parsed script or expression bound to its engine.
#[derive(Debug, Clone)]
pub struct Script {
    core: Arc<EngineCore>,
    ast: Arc<Ast>,
}

impl Script {
    /// Evaluates with the engine's default options.
    pub fn execute(&self, context: &mut dyn Context) -> EvalResult<Value> {
        let options = self.core.options.clone();
        self.execute_with(context, &options)
    }

    /// Evaluates with explicit options.
    pub fn execute_with(&self, context: &mut dyn Context, options: &Options) -> EvalResult<Value> {
        Interpreter::new(&self.core, &self.ast, context, options.clone()).run()
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.ast.source
    }

    /// Script-level pragmas, in declaration order.
    pub fn pragmas(&self) -> &IndexMap<String, Value> {
        &self.ast.pragmas
    }

    /// Language dialect flags observed while parsing.
    pub fn features(&self) -> Features {
        self.ast.features
    }

    /// Ordered names of the script's top-level local variables.
    pub fn local_names(&self) -> Vec<Arc<str>> {
        self.ast.scope.names().cloned().collect()
    }
}
