//! The shared per-class introspection tier.
//!
//! One permission-filtered `ClassInfo` per class name, shared by every
//! interpreter of an engine. Population is lazy and concurrent; the whole
//! tier can be dropped under memory pressure via [`ClassMap::clear`], after
//! which lookups miss and rebuild transparently. Each clear bumps a
//! monotonically increasing version so downstream caches can invalidate
//! their own entries.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use ahash::{AHashMap, RandomState};
use dashmap::DashMap;

use crate::introspect::{
    class::{ClassDescriptor, ContainerDef, CtorDef, MethodDef, PropertyDef},
    permissions::Permissions,
};

/// The permission-filtered view of one class.
#[derive(Debug)]
pub(crate) struct ClassInfo {
    pub descriptor: Arc<ClassDescriptor>,
    pub properties: AHashMap<Arc<str>, PropertyDef>,
    pub fields: AHashMap<Arc<str>, PropertyDef>,
    pub methods: AHashMap<Arc<str>, Vec<MethodDef>>,
    pub container: Option<ContainerDef>,
    pub constructors: Vec<CtorDef>,
}

impl ClassInfo {
    /// Applies the permission filter at population time. Returns `None` for
    /// a disallowed class.
    fn filtered(descriptor: &Arc<ClassDescriptor>, permissions: &Permissions) -> Option<Self> {
        let class = descriptor.name().as_ref();
        if !permissions.allow_class(class) {
            return None;
        }
        let keep = |name: &Arc<str>| permissions.allow_member(class, name);
        Some(Self {
            descriptor: descriptor.clone(),
            properties: descriptor
                .properties
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, def)| (name.clone(), def.clone()))
                .collect(),
            fields: descriptor
                .fields
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, def)| (name.clone(), def.clone()))
                .collect(),
            methods: descriptor
                .methods
                .iter()
                .filter(|(name, _)| keep(name))
                .map(|(name, defs)| (name.clone(), defs.clone()))
                .collect(),
            container: descriptor.container.clone(),
            constructors: descriptor.constructors.clone(),
        })
    }
}

/// The concurrent class-info store.
#[derive(Debug)]
pub(crate) struct ClassMap {
    classes: DashMap<Arc<str>, Arc<ClassInfo>, RandomState>,
    version: AtomicU64,
}

impl ClassMap {
    pub fn new() -> Self {
        Self {
            classes: DashMap::default(),
            version: AtomicU64::new(0),
        }
    }

    /// The filtered info for a class, populating the tier on first sight.
    ///
    /// Concurrent populations of the same class are benign: the entry API
    /// keeps one winner and the filtered view is deterministic.
    pub fn info(&self, descriptor: &Arc<ClassDescriptor>, permissions: &Permissions) -> Option<Arc<ClassInfo>> {
        if let Some(info) = self.classes.get(descriptor.name()) {
            return Some(info.clone());
        }
        let info = Arc::new(ClassInfo::filtered(descriptor, permissions)?);
        let entry = self
            .classes
            .entry(descriptor.name().clone())
            .or_insert_with(|| info)
            .clone();
        Some(entry)
    }

    /// Drops every cached class view and bumps the version counter.
    pub fn clear(&self) {
        self.classes.clear();
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_class() -> Arc<ClassDescriptor> {
        ClassDescriptor::builder("acme.geo.Point")
            .property_get("x", |_| Ok(crate::value::Value::Int(1)))
            .property_get("hidden", |_| Ok(crate::value::Value::Int(2)))
            .build()
    }

    #[test]
    fn filtering_removes_denied_members() {
        let map = ClassMap::new();
        let permissions = Permissions::parse(["acme.geo.Point#hidden"]);
        let info = map.info(&point_class(), &permissions).unwrap();
        assert!(info.properties.contains_key("x"));
        assert!(!info.properties.contains_key("hidden"));
    }

    #[test]
    fn clear_bumps_version_and_rebuilds() {
        let map = ClassMap::new();
        let permissions = Permissions::unrestricted();
        let class = point_class();
        let v0 = map.version();
        map.info(&class, &permissions).unwrap();
        map.clear();
        assert_eq!(map.version(), v0 + 1);
        // transparently repopulates
        assert!(map.info(&class, &permissions).is_some());
    }

    #[test]
    fn disallowed_class_never_populates() {
        let map = ClassMap::new();
        let permissions = Permissions::parse(["!acme.geo.Point"]);
        assert!(map.info(&point_class(), &permissions).is_none());
    }
}
