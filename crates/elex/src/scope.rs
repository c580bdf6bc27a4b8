//! Compile-time symbol tables.
//!
//! A `Scope` is attached to a script or lambda and lists its parameters,
//! locals, and captured symbols, each with a fixed slot index. Name lookup
//! during parsing walks the scope stack outward; at runtime all access is
//! O(1) by slot index through the `Frame`.

use ahash::AHashMap;
use std::sync::Arc;

/// Per-symbol compile-time flags.
#[derive(Debug, Clone)]
pub(crate) struct SymbolInfo {
    pub name: Arc<str>,
    /// Declared `const`; assignment after initialisation fails.
    pub constant: bool,
    /// Declared `let`/`const`; block-scoped regardless of evaluation options.
    pub lexical: bool,
    /// Lives in a shared cell because some lambda captures it or it was
    /// captured from an enclosing scope.
    pub captured: bool,
}

/// A symbol captured from the enclosing scope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Capture {
    /// Slot in this scope.
    pub local: u32,
    /// Slot in the enclosing scope.
    pub in_parent: u32,
}

/// Symbol table for one activation (script or lambda).
#[derive(Debug, Default)]
pub struct Scope {
    params: u32,
    symbols: Vec<SymbolInfo>,
    by_name: AHashMap<Arc<str>, u32>,
    captures: Vec<Capture>,
}

impl Scope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Declares a parameter. Parameters are always declared first, in order.
    pub(crate) fn declare_param(&mut self, name: Arc<str>) -> u32 {
        debug_assert_eq!(self.params as usize, self.symbols.len(), "parameters must come first");
        let index = self.add(name, false, false);
        self.params += 1;
        index
    }

    /// Declares a local variable, reusing the slot when the name was already
    /// declared in this scope (later declarations shadow in place).
    ///
    /// Redeclaring a `const`, or redeclaring any name as `const`, is a
    /// compile-time error and yields `Err` with the offending name.
    pub(crate) fn declare_var(&mut self, name: Arc<str>, constant: bool, lexical: bool) -> Result<u32, Arc<str>> {
        if let Some(&index) = self.by_name.get(&name) {
            let existing = &mut self.symbols[index as usize];
            if existing.constant || constant {
                return Err(name);
            }
            existing.lexical |= lexical;
            return Ok(index);
        }
        Ok(self.add(name, constant, lexical))
    }

    /// Declares a capture of `in_parent` from the enclosing scope.
    pub(crate) fn declare_capture(&mut self, name: Arc<str>, in_parent: u32, constant: bool) -> u32 {
        if let Some(&index) = self.by_name.get(&name) {
            return index;
        }
        let local = self.add(name, constant, false);
        self.symbols[local as usize].captured = true;
        self.captures.push(Capture { local, in_parent });
        local
    }

    fn add(&mut self, name: Arc<str>, constant: bool, lexical: bool) -> u32 {
        let index = u32::try_from(self.symbols.len()).expect("too many symbols");
        self.by_name.insert(name.clone(), index);
        self.symbols.push(SymbolInfo {
            name,
            constant,
            lexical,
            captured: false,
        });
        index
    }

    /// Marks a symbol as cell-backed because an inner lambda captures it.
    pub(crate) fn mark_captured(&mut self, index: u32) {
        self.symbols[index as usize].captured = true;
    }

    /// Resolves a name in this scope only.
    pub(crate) fn resolve(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn symbol(&self, index: u32) -> &SymbolInfo {
        &self.symbols[index as usize]
    }

    pub(crate) fn captures(&self) -> &[Capture] {
        &self.captures
    }

    pub(crate) fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Ordered parameter names.
    pub fn parameters(&self) -> impl Iterator<Item = &Arc<str>> {
        self.symbols[..self.params as usize].iter().map(|s| &s.name)
    }

    /// Ordered names of every symbol, parameters first.
    pub fn names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.symbols.iter().map(|s| &s.name)
    }

    pub(crate) fn param_count(&self) -> usize {
        self.params as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaration_reuses_slot() {
        let mut scope = Scope::new();
        let a = scope.declare_var("x".into(), false, false).unwrap();
        let b = scope.declare_var("x".into(), false, false).unwrap();
        assert_eq!(a, b);
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn const_redeclaration_is_rejected() {
        let mut scope = Scope::new();
        scope.declare_var("x".into(), true, true).unwrap();
        assert!(scope.declare_var("x".into(), false, false).is_err());
        scope.declare_var("y".into(), false, false).unwrap();
        assert!(scope.declare_var("y".into(), true, true).is_err());
    }

    #[test]
    fn captures_record_parent_slots() {
        let mut outer = Scope::new();
        let x = outer.declare_var("x".into(), false, false).unwrap();
        outer.mark_captured(x);

        let mut inner = Scope::new();
        inner.declare_param("n".into());
        let local = inner.declare_capture("x".into(), x, false);
        assert_eq!(local, 1);
        assert_eq!(inner.captures().len(), 1);
        assert_eq!(inner.captures()[0].in_parent, x);
        assert!(inner.symbol(local).captured);
    }
}
