//! Resolver tags and the pluggable ordering strategy.

use std::fmt;

use strum::Display;

use crate::{operators::Operator, value::Value};

/// One stage of the property-access pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResolverKind {
    /// Bean-style named accessors, trying the original and
    /// first-letter-flipped spellings.
    Property,
    /// Keyed mapping access on map values.
    Map,
    /// Index access on ordered values when the key coerces to a
    /// non-negative integer.
    List,
    /// Duck-typed `get`/`set`/`contains` methods on the target.
    Duck,
    /// A direct named attribute of the target's class.
    Field,
    /// The keyed composite accessor (indexed-property pattern).
    Container,
}

/// Produces the resolver order for a given access.
///
/// Supplied at engine construction; the default tailors the order to the
/// operator performing the access.
pub trait ResolverStrategy: Send + Sync + fmt::Debug {
    fn resolvers(&self, op: Option<Operator>, target: &Value) -> &[ResolverKind];
}

const PROPERTY_FIRST: &[ResolverKind] = &[
    ResolverKind::Property,
    ResolverKind::Map,
    ResolverKind::List,
    ResolverKind::Duck,
    ResolverKind::Field,
    ResolverKind::Container,
];

const INDEX_FIRST: &[ResolverKind] = &[
    ResolverKind::List,
    ResolverKind::Map,
    ResolverKind::Duck,
    ResolverKind::Property,
    ResolverKind::Field,
    ResolverKind::Container,
];

/// The stock strategy: index access prefers ordered containers, everything
/// else prefers named properties.
#[derive(Debug, Default)]
pub struct DefaultStrategy;

impl ResolverStrategy for DefaultStrategy {
    fn resolvers(&self, op: Option<Operator>, _target: &Value) -> &[ResolverKind] {
        match op {
            Some(Operator::ArrayGet | Operator::ArraySet) => INDEX_FIRST,
            _ => PROPERTY_FIRST,
        }
    }
}
