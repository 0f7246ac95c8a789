//! Stable names for query functions.
//!
//! Synced queries are addressed by `namespace.name`, never by function value, so every
//! plain query function handed to a client or server is registered here first. Entries
//! hold a `Weak` to the function: a dropped closure (and whatever it captured) is not
//! kept alive by the registry, and its slot is pruned on the next registration.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::synced::{PlainQueryFn, QueryFn};

struct Entry {
    func: Weak<PlainQueryFn>,
    name: String,
}

#[derive(Default)]
pub struct QueryNameRegistry {
    inner: RwLock<HashMap<usize, Entry>>,
}

fn addr(f: &Arc<PlainQueryFn>) -> usize { Arc::as_ptr(f) as *const () as usize }

impl QueryNameRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn register<S: Into<String>>(&self, f: &QueryFn, name: S) {
        let mut map = self.inner.write();
        map.retain(|_, e| e.func.strong_count() > 0);
        map.insert(addr(f.inner()), Entry { func: Arc::downgrade(f.inner()), name: name.into() });
    }

    pub fn lookup(&self, f: &QueryFn) -> Option<String> {
        let map = self.inner.read();
        let entry = map.get(&addr(f.inner()))?;
        // address reuse after a drop must not resolve to the old name
        (entry.func.strong_count() > 0).then(|| entry.name.clone())
    }

    pub fn len(&self) -> usize { self.inner.read().values().filter(|e| e.func.strong_count() > 0).count() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

static QUERY_NAMES: Lazy<QueryNameRegistry> = Lazy::new(QueryNameRegistry::new);

pub fn global_query_names() -> &'static QueryNameRegistry { &QUERY_NAMES }

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> QueryFn { QueryFn::new(|zql, _args| zql.table("message")) }

    #[test]
    fn lookup_is_by_identity_not_shape() {
        let reg = QueryNameRegistry::new();
        let a = plain();
        let b = plain();
        reg.register(&a, "message.all");
        assert_eq!(reg.lookup(&a).as_deref(), Some("message.all"));
        assert_eq!(reg.lookup(&a.clone()).as_deref(), Some("message.all"));
        assert_eq!(reg.lookup(&b), None);
    }

    #[test]
    fn dropped_functions_are_not_retained() {
        let reg = QueryNameRegistry::new();
        let a = plain();
        reg.register(&a, "message.all");
        assert_eq!(reg.len(), 1);
        drop(a);
        assert_eq!(reg.len(), 0);
        let b = plain();
        reg.register(&b, "message.other");
        assert_eq!(reg.inner.read().len(), 1);
    }
}
