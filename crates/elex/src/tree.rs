//! The syntax tree consumed by the interpreter.
//!
//! Nodes live in a flat arena owned by the `Ast`; children are arena indices
//! and every node carries a parent back-reference fixed at build time. The
//! tree is immutable after parsing with one exception: the per-node cache
//! slot, an atomic reference cell memoising the last successful resolution
//! for that node (a property accessor, a method executor, a resolved
//! namespace, or a negative-lookup marker).

use std::{
    fmt,
    sync::{Arc, RwLock},
};

use indexmap::IndexMap;
use num_bigint::BigInt;
use smallvec::SmallVec;

use crate::{
    introspect::{MethodExec, PropertyGetExec, PropertySetExec},
    operators::{Operator, OverloadHandler},
    scope::Scope,
    span::Span,
    value::{Shape, Value},
};

/// Index of a node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(u32);

impl NodeId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("tree too large"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lambda syntax style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowStyle {
    /// `function(a, b) { ... }`
    Function,
    /// `(a, b) -> expr`
    Thin,
    /// `(a, b) => expr`
    Fat,
}

/// The kind tag of a node, with per-kind payload.
///
/// Binary operator kinds have children `[left, right]`, unary kinds
/// `[operand]`; structured kinds document their child layout inline.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    // --- literals ---
    Null,
    True,
    False,
    Int(i64),
    Big(Arc<BigInt>),
    Real(f64),
    Str(Arc<str>),
    /// `[a, b, c]`; children are the items.
    ArrayLit,
    /// `{k: v, ...}`; children are `MapEntry` nodes.
    MapLit,
    /// One `key: value` pair; children `[key, value]`.
    MapEntry,
    /// `{a, b, c}`; children are the elements.
    SetLit,

    // --- identifiers ---
    /// A name reference. `symbol` is the frame slot when the parser bound it
    /// to a declared local, `None` for context variables.
    Identifier { name: Arc<str>, symbol: Option<u32> },

    // --- binary operators ---
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Sar,
    Shru,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    NullCoalesce,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    /// `l..r`, an inclusive integer range.
    Range,

    // --- unary operators ---
    Not,
    Negate,
    Positivize,
    Complement,
    Empty,
    Size,

    // --- conditionals ---
    /// `c ? t : f`; children `[condition, then, otherwise]`.
    Ternary,
    /// `c ?: f`; children `[condition, otherwise]`.
    Elvis,

    // --- assignment ---
    /// `target = value`; children `[target, value]`.
    Assign,
    SelfAdd,
    SelfSubtract,
    SelfMultiply,
    SelfDivide,
    SelfMod,
    SelfAnd,
    SelfOr,
    SelfXor,
    SelfShl,
    SelfSar,
    SelfShru,
    /// Prefix `++x`; child `[target]`. Yields the incremented value.
    IncrementGet,
    /// Postfix `x++`; child `[target]`. Yields the prior value.
    GetIncrement,
    /// Prefix `--x`.
    DecrementGet,
    /// Postfix `x--`.
    GetDecrement,

    // --- navigation ---
    /// `a.b` or `a?.b`; children `[object, identifier]`.
    Property { safe: bool },
    /// `a[k]` or `a?[k]`; children `[object, key]`.
    Index { safe: bool },

    // --- calls ---
    /// `f(args)`; children `[callee, arguments]`.
    Call,
    /// `a.m(args)` or `a?.m(args)`; children `[object, identifier, arguments]`.
    MethodCall { safe: bool },
    /// `ns:f(args)`; children `[arguments]`.
    NamespaceCall { ns: Arc<str>, name: Arc<str> },
    /// `new T(args)`. With a resolved name, children `[arguments]`;
    /// otherwise children `[class-expression, arguments]`.
    New { class_name: Option<Arc<str>> },
    /// Argument grouping; children are the argument expressions.
    Arguments,
    /// A lambda; child `[body]`. Parameters and locals live in `scope`.
    Lambda { scope: Arc<Scope>, arrow: ArrowStyle },

    // --- statements ---
    /// Script root; children are the top-level statements.
    Script,
    /// `{ ... }`; children are the statements.
    Block,
    /// `var|let|const name (= init)?`; child `[init]` when `has_init`.
    Var {
        name: Arc<str>,
        symbol: u32,
        constant: bool,
        lexical: bool,
        has_init: bool,
    },
    /// Children `[condition, then]` plus `[otherwise]` when `has_else`.
    If { has_else: bool },
    /// Children `[condition, body]`.
    While,
    /// Children `[body, condition]`.
    DoWhile,
    /// `for (init; cond; step) body`; present children in that order.
    ForLoop {
        has_init: bool,
        has_cond: bool,
        has_step: bool,
    },
    /// `for (x : iterable) body`; children `[iterable, body]`.
    ForEach {
        name: Arc<str>,
        symbol: Option<u32>,
        lexical: bool,
    },
    /// Child `[value]` when `has_value`.
    Return { has_value: bool },
    Break,
    Continue,
    /// Child `[value]`.
    Throw,
    /// `try (resources) body catch(e) handler finally cleanup`.
    ///
    /// Children: `resources` leading `Var` nodes, then the body, then the
    /// catch handler when `catch_name` is set, then the finally block when
    /// `has_finally`.
    Try {
        resources: u16,
        catch_name: Option<Arc<str>>,
        catch_symbol: Option<u32>,
        has_finally: bool,
    },
    /// Children `[discriminant, case...]`.
    Switch,
    /// A switch arm. Non-default arms have the match expression first, then
    /// the arm statements.
    Case { is_default: bool },
    /// `@name(args) statement`; children `[arguments, statement]`.
    Annotation { name: Arc<str> },
}

impl NodeKind {
    /// Navigation kinds are transparent for ternary-protection walks.
    fn is_navigation(&self) -> bool {
        matches!(self, Self::Property { .. } | Self::Index { .. })
    }
}

/// A node in the arena.
#[derive(Debug)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub children: SmallVec<[NodeId; 2]>,
    pub parent: Option<NodeId>,
    pub span: Span,
    pub cache: CacheSlot,
}

/// The argument-shape key recorded with cached operator resolutions.
pub(crate) type ShapeKey = SmallVec<[Shape; 2]>;

pub(crate) fn shape_key(args: &[Value]) -> ShapeKey {
    args.iter().map(Value::shape).collect()
}

pub(crate) fn shapes_match(key: &ShapeKey, args: &[Value]) -> bool {
    key.len() == args.len() && key.iter().zip(args).all(|(shape, arg)| *shape == arg.shape())
}

/// Payload of a node cache slot: the last successful resolution for the
/// node, or a negative marker recording that an overload search already
/// failed for a given argument shape.
pub(crate) enum NodeCache {
    PropertyGet(Arc<dyn PropertyGetExec>),
    PropertySet(Arc<dyn PropertySetExec>),
    Method(Arc<dyn MethodExec>),
    /// A resolved engine-registered namespace. Per-evaluation functors are
    /// never cached here.
    Namespace(Value),
    Overload {
        op: Operator,
        shape: ShapeKey,
        handler: OverloadHandler,
    },
    MissingOverload { op: Operator, shape: ShapeKey },
}

impl fmt::Debug for NodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyGet(_) => write!(f, "PropertyGet"),
            Self::PropertySet(_) => write!(f, "PropertySet"),
            Self::Method(_) => write!(f, "Method"),
            Self::Namespace(ns) => write!(f, "Namespace({ns:?})"),
            Self::Overload { op, shape, .. } => write!(f, "Overload({op}, {shape:?})"),
            Self::MissingOverload { op, shape } => write!(f, "MissingOverload({op}, {shape:?})"),
        }
    }
}

/// The node-local cache slot.
///
/// A single atomic reference: readers load the current `Arc`, writers
/// publish a replacement wholesale. At most one evaluation writes a given
/// tree at a time, so the worst interleaving loses a cache entry, never
/// tears a value.
#[derive(Default)]
pub(crate) struct CacheSlot(RwLock<Option<Arc<NodeCache>>>);

impl CacheSlot {
    pub fn load(&self) -> Option<Arc<NodeCache>> {
        self.0.read().expect("cache slot poisoned").clone()
    }

    pub fn store(&self, cache: NodeCache) {
        *self.0.write().expect("cache slot poisoned") = Some(Arc::new(cache));
    }

    pub fn clear(&self) {
        *self.0.write().expect("cache slot poisoned") = None;
    }
}

impl fmt::Debug for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0.read().expect("cache slot poisoned") {
            Some(cache) => write!(f, "CacheSlot({cache:?})"),
            None => write!(f, "CacheSlot(empty)"),
        }
    }
}

/// Language dialect flags observed while parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Features {
    pub fat_arrow: bool,
    pub thin_arrow: bool,
    pub lexical_declarations: bool,
    pub namespace_calls: bool,
}

/// A parsed script: the node arena plus its top-level scope and metadata.
#[derive(Debug)]
pub(crate) struct Ast {
    pub(crate) name: Arc<str>,
    pub(crate) source: Arc<str>,
    nodes: Vec<Node>,
    root: NodeId,
    pub(crate) scope: Arc<Scope>,
    pub(crate) pragmas: IndexMap<String, Value>,
    pub(crate) features: Features,
}

impl Ast {
    pub fn new(
        name: Arc<str>,
        source: Arc<str>,
        nodes: Vec<Node>,
        root: NodeId,
        scope: Arc<Scope>,
        pragmas: IndexMap<String, Value>,
        features: Features,
    ) -> Self {
        debug_assert!(root.index() < nodes.len());
        Self {
            name,
            source,
            nodes,
            root,
            scope,
            pragmas,
            features,
        }
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    #[inline]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    /// The source fragment a node covers.
    pub fn fragment(&self, id: NodeId) -> &str {
        self.span(id).slice(&self.source)
    }

    /// Whether a node sits under the condition of a ternary or
    /// null-coalescing form, reached only through navigation nodes.
    ///
    /// Protected nodes absorb strictness failures and evaluate to null.
    pub fn is_ternary_protected(&self, mut id: NodeId) -> bool {
        loop {
            let Some(parent) = self.node(id).parent else {
                return false;
            };
            let pnode = self.node(parent);
            match &pnode.kind {
                NodeKind::Ternary | NodeKind::Elvis | NodeKind::NullCoalesce => {
                    return pnode.children[0] == id;
                }
                kind if kind.is_navigation() => id = parent,
                _ => return false,
            }
        }
    }
}

/// Incremental arena builder used by the parser.
///
/// Children are created bottom-up; pushing a parent patches their
/// back-references, keeping the parent/child links consistent by
/// construction.
#[derive(Debug, Default)]
pub(crate) struct AstBuilder {
    nodes: Vec<Node>,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: NodeKind, span: Span, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        let children: SmallVec<[NodeId; 2]> = children.into_iter().collect();
        for child in &children {
            debug_assert!(self.nodes[child.index()].parent.is_none(), "child already parented");
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(Node {
            kind,
            children,
            parent: None,
            span,
            cache: CacheSlot::default(),
        });
        id
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id.index()].span
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}
