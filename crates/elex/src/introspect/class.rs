//! Host capability descriptors.
//!
//! The engine never reflects over host types; instead a host registers a
//! `ClassDescriptor` per type it exposes, listing named properties, method
//! overloads, fields, an optional keyed container accessor, and
//! constructors. The introspection pipeline resolves identifiers against
//! these capability records and caches the permission-filtered view per
//! class.

use std::{any::Any, fmt, sync::Arc};

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    context::Context,
    error::EvalResult,
    value::{Shape, Value},
};

pub type GetterFn = Arc<dyn Fn(&Value) -> EvalResult<Value> + Send + Sync>;
pub type SetterFn = Arc<dyn Fn(&Value, Value) -> EvalResult<()> + Send + Sync>;
pub type MethodFn = Arc<dyn Fn(&Value, &[Value]) -> EvalResult<Value> + Send + Sync>;
pub type CtorFn = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;
pub type KeyedGetFn = Arc<dyn Fn(&Value, &Value) -> EvalResult<Value> + Send + Sync>;
pub type KeyedSetFn = Arc<dyn Fn(&Value, &Value, Value) -> EvalResult<()> + Send + Sync>;
pub type FunctorFn = Arc<dyn Fn(&mut dyn Context) -> EvalResult<Value> + Send + Sync>;

/// A host value exposed to scripts through capability queries.
pub trait HostObject: Any + Send + Sync + fmt::Debug {
    /// The capability record for this object's type. Implementations
    /// normally return a shared static descriptor.
    fn descriptor(&self) -> Arc<ClassDescriptor>;

    fn as_any(&self) -> &dyn Any;

    /// Rendering used by string coercion and template output.
    fn display(&self) -> String {
        format!("<object {:?}>", self)
    }
}

/// Downcasts a value to a concrete host type.
pub fn downcast_host<T: 'static>(value: &Value) -> Option<&T> {
    value.as_object()?.as_any().downcast_ref::<T>()
}

/// A named property with bean-style accessors.
#[derive(Clone)]
pub struct PropertyDef {
    pub(crate) getter: Option<GetterFn>,
    pub(crate) setter: Option<SetterFn>,
}

impl fmt::Debug for PropertyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PropertyDef(get: {}, set: {})",
            self.getter.is_some(),
            self.setter.is_some()
        )
    }
}

/// One method overload: a fixed parameter shape list plus the invoker.
#[derive(Clone)]
pub struct MethodDef {
    pub(crate) name: Arc<str>,
    pub(crate) params: SmallVec<[Shape; 2]>,
    pub(crate) invoke: MethodFn,
}

impl MethodDef {
    pub(crate) fn matches(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(shape, arg)| shape.matches(arg))
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodDef({}/{})", self.name, self.params.len())
    }
}

/// A constructor overload.
#[derive(Clone)]
pub struct CtorDef {
    pub(crate) params: SmallVec<[Shape; 2]>,
    pub(crate) invoke: CtorFn,
}

impl CtorDef {
    pub(crate) fn matches(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(shape, arg)| shape.matches(arg))
    }
}

impl fmt::Debug for CtorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CtorDef/{}", self.params.len())
    }
}

/// A keyed composite accessor, the indexed-property pattern: one getter
/// taking a key and one setter taking a key and a value.
#[derive(Clone)]
pub struct ContainerDef {
    pub(crate) get: KeyedGetFn,
    pub(crate) set: Option<KeyedSetFn>,
}

impl fmt::Debug for ContainerDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerDef(set: {})", self.set.is_some())
    }
}

/// The capability record for one host type.
///
/// The `name` is a dotted identifier ("acme.geo.Point"); permission rules
/// match against it package-wise.
pub struct ClassDescriptor {
    name: Arc<str>,
    pub(crate) properties: AHashMap<Arc<str>, PropertyDef>,
    pub(crate) fields: AHashMap<Arc<str>, PropertyDef>,
    pub(crate) methods: AHashMap<Arc<str>, Vec<MethodDef>>,
    pub(crate) container: Option<ContainerDef>,
    pub(crate) constructors: Vec<CtorDef>,
    pub(crate) functor: Option<FunctorFn>,
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("name", &self.name)
            .field("properties", &self.properties.len())
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("constructors", &self.constructors.len())
            .finish()
    }
}

impl ClassDescriptor {
    pub fn builder(name: impl Into<Arc<str>>) -> ClassBuilder {
        ClassBuilder {
            descriptor: Self {
                name: name.into(),
                properties: AHashMap::new(),
                fields: AHashMap::new(),
                methods: AHashMap::new(),
                container: None,
                constructors: Vec::new(),
                functor: None,
            },
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }
}

/// Fluent construction of a [`ClassDescriptor`].
pub struct ClassBuilder {
    descriptor: ClassDescriptor,
}

impl ClassBuilder {
    /// Read-only property.
    #[must_use]
    pub fn property_get(
        mut self,
        name: impl Into<Arc<str>>,
        getter: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.properties.insert(
            name.into(),
            PropertyDef {
                getter: Some(Arc::new(getter)),
                setter: None,
            },
        );
        self
    }

    /// Read-write property.
    #[must_use]
    pub fn property(
        mut self,
        name: impl Into<Arc<str>>,
        getter: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
        setter: impl Fn(&Value, Value) -> EvalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.properties.insert(
            name.into(),
            PropertyDef {
                getter: Some(Arc::new(getter)),
                setter: Some(Arc::new(setter)),
            },
        );
        self
    }

    /// A direct named attribute. Fields resolve after properties under the
    /// default strategy.
    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<Arc<str>>,
        getter: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.fields.insert(
            name.into(),
            PropertyDef {
                getter: Some(Arc::new(getter)),
                setter: None,
            },
        );
        self
    }

    #[must_use]
    pub fn field_mut(
        mut self,
        name: impl Into<Arc<str>>,
        getter: impl Fn(&Value) -> EvalResult<Value> + Send + Sync + 'static,
        setter: impl Fn(&Value, Value) -> EvalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.fields.insert(
            name.into(),
            PropertyDef {
                getter: Some(Arc::new(getter)),
                setter: Some(Arc::new(setter)),
            },
        );
        self
    }

    /// Adds a method overload. Call repeatedly with the same name and
    /// different parameter shapes to build an overload set.
    #[must_use]
    pub fn method(
        mut self,
        name: impl Into<Arc<str>>,
        params: impl IntoIterator<Item = Shape>,
        invoke: impl Fn(&Value, &[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.descriptor.methods.entry(name.clone()).or_default().push(MethodDef {
            name,
            params: params.into_iter().collect(),
            invoke: Arc::new(invoke),
        });
        self
    }

    /// Registers the keyed composite accessor.
    #[must_use]
    pub fn container(
        mut self,
        get: impl Fn(&Value, &Value) -> EvalResult<Value> + Send + Sync + 'static,
        set: Option<KeyedSetFn>,
    ) -> Self {
        self.descriptor.container = Some(ContainerDef {
            get: Arc::new(get),
            set,
        });
        self
    }

    #[must_use]
    pub fn constructor(
        mut self,
        params: impl IntoIterator<Item = Shape>,
        invoke: impl Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.constructors.push(CtorDef {
            params: params.into_iter().collect(),
            invoke: Arc::new(invoke),
        });
        self
    }

    /// Registers the context-bound constructor used when this class backs a
    /// namespace prefix. The produced instance is cached per evaluation.
    #[must_use]
    pub fn functor(mut self, make: impl Fn(&mut dyn Context) -> EvalResult<Value> + Send + Sync + 'static) -> Self {
        self.descriptor.functor = Some(Arc::new(make));
        self
    }

    pub fn build(self) -> Arc<ClassDescriptor> {
        Arc::new(self.descriptor)
    }
}
