use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::predicate::Where;

/// Table name -> predicate. Populated when models are declared; last write wins.
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    inner: RwLock<HashMap<String, Where>>,
}

impl PermissionRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn set(&self, table: &str, where_: Where) {
        let replaced = self.inner.write().insert(table.to_string(), where_).is_some();
        if replaced {
            debug!(target: "rowgate::permission", "replaced permission predicate for {}", table);
        }
    }

    pub fn get(&self, table: &str) -> Option<Where> { self.inner.read().get(table).cloned() }

    pub fn tables(&self) -> Vec<String> {
        let mut v: Vec<String> = self.inner.read().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn len(&self) -> usize { self.inner.read().len() }

    pub fn is_empty(&self) -> bool { self.inner.read().is_empty() }
}
