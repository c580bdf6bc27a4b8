//! The compiled-artifact cache.
//!
//! A size-bounded, LRU-ordered map from source text to its parsed tree.
//! Lookups run under the reader lock, bumping a per-entry access stamp;
//! inserts and eviction take the writer lock. The whole cache can be
//! dropped (the memory-pressure analogue); later lookups miss and the
//! artifact is re-parsed transparently.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use ahash::AHashMap;

use crate::tree::Ast;

#[derive(Debug)]
struct Entry {
    ast: Arc<Ast>,
    stamp: AtomicU64,
}

#[derive(Debug, Default)]
struct Inner {
    scripts: AHashMap<Arc<str>, Entry>,
    expressions: AHashMap<Arc<str>, Entry>,
    tick: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct SourceCache {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl SourceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn get(&self, source: &str, expression: bool) -> Option<Arc<Ast>> {
        let inner = self.inner.read().expect("source cache poisoned");
        let map = if expression { &inner.expressions } else { &inner.scripts };
        let entry = map.get(source)?;
        entry.stamp.store(inner.tick.fetch_add(1, Ordering::Relaxed), Ordering::Relaxed);
        Some(entry.ast.clone())
    }

    pub fn put(&self, source: Arc<str>, expression: bool, ast: Arc<Ast>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.write().expect("source cache poisoned");
        while inner.scripts.len() + inner.expressions.len() >= self.capacity {
            if !evict_oldest(&mut inner) {
                break;
            }
        }
        let stamp = inner.tick.fetch_add(1, Ordering::Relaxed);
        let map = if expression { &mut inner.expressions } else { &mut inner.scripts };
        map.insert(
            source,
            Entry {
                ast,
                stamp: AtomicU64::new(stamp),
            },
        );
    }

    /// Drops every cached artifact.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("source cache poisoned");
        inner.scripts.clear();
        inner.expressions.clear();
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("source cache poisoned");
        inner.scripts.len() + inner.expressions.len()
    }
}

/// Removes the least recently used entry across both maps.
fn evict_oldest(inner: &mut Inner) -> bool {
    let oldest_script = inner
        .scripts
        .iter()
        .min_by_key(|(_, entry)| entry.stamp.load(Ordering::Relaxed))
        .map(|(key, entry)| (key.clone(), entry.stamp.load(Ordering::Relaxed)));
    let oldest_expression = inner
        .expressions
        .iter()
        .min_by_key(|(_, entry)| entry.stamp.load(Ordering::Relaxed))
        .map(|(key, entry)| (key.clone(), entry.stamp.load(Ordering::Relaxed)));
    match (oldest_script, oldest_expression) {
        (Some((key, a)), Some((_, b))) if a <= b => inner.scripts.remove(&key).is_some(),
        (_, Some((key, _))) => inner.expressions.remove(&key).is_some(),
        (Some((key, _)), None) => inner.scripts.remove(&key).is_some(),
        (None, None) => false,
    }
}
