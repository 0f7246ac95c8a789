//! Synced queries.
//!
//! Plain query functions are grouped by namespace, registered under their stable
//! `namespace.name` and looked up by that name on both sides of the wire. The
//! `permission.check` query is built in here rather than in an application registry,
//! since every table with CRUD permissions gets it for free.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{GateError, GateResult};
use crate::identity::AuthData;
use crate::permissions::{Permissions, Subject};
use crate::query::{Condition, Query, QueryBuilder};
use crate::registry::{global_query_names, PermissionRegistry, QueryNameRegistry};
use crate::run::QueryArgs;
use crate::schema::Schema;

pub const PERMISSION_CHECK: &str = "permission.check";

pub type PlainQueryFn = dyn Fn(&QueryBuilder, &Value) -> GateResult<Query> + Send + Sync;

/// A plain query function. Clones share identity, so a clone resolves to the same name.
#[derive(Clone)]
pub struct QueryFn {
    inner: Arc<PlainQueryFn>,
    debug_name: Option<String>,
}

impl QueryFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&QueryBuilder, &Value) -> GateResult<Query> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f), debug_name: None }
    }

    /// Like `new`, with a name used only in error messages.
    pub fn named<S, F>(name: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&QueryBuilder, &Value) -> GateResult<Query> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f), debug_name: Some(name.into()) }
    }

    pub(crate) fn inner(&self) -> &Arc<PlainQueryFn> { &self.inner }

    pub fn debug_name(&self) -> &str { self.debug_name.as_deref().unwrap_or("anonymous") }

    pub fn call(&self, zql: &QueryBuilder, args: &Value) -> GateResult<Query> { (self.inner)(zql, args) }
}

impl fmt::Debug for QueryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "QueryFn({})", self.debug_name()) }
}

/// Query functions grouped by namespace, as handed to the client and server.
#[derive(Debug, Clone, Default)]
pub struct GroupedQueries {
    groups: BTreeMap<String, BTreeMap<String, QueryFn>>,
}

impl GroupedQueries {
    pub fn new() -> Self { Self::default() }

    pub fn query<N: Into<String>, M: Into<String>>(mut self, namespace: N, name: M, f: QueryFn) -> Self {
        self.groups.entry(namespace.into()).or_default().insert(name.into(), f);
        self
    }

    pub fn is_empty(&self) -> bool { self.groups.is_empty() }
}

/// The shared `namespace.name` -> query registry.
#[derive(Debug, Clone)]
pub struct SyncedQueries {
    zql: QueryBuilder,
    namespaces: BTreeMap<String, BTreeMap<String, QueryFn>>,
}

impl SyncedQueries {
    /// Build from grouped queries, registering each function's stable name globally.
    pub fn from_groups(schema: Arc<Schema>, grouped: GroupedQueries) -> Self {
        Self::from_groups_in(global_query_names(), schema, grouped)
    }

    pub fn from_groups_in(names: &QueryNameRegistry, schema: Arc<Schema>, grouped: GroupedQueries) -> Self {
        for (namespace, queries) in &grouped.groups {
            for (name, f) in queries {
                names.register(f, format!("{}.{}", namespace, name));
            }
        }
        Self { zql: QueryBuilder::new(schema), namespaces: grouped.groups }
    }

    pub fn zql(&self) -> &QueryBuilder { &self.zql }

    pub fn get(&self, dotted: &str) -> Option<&QueryFn> {
        let (namespace, name) = dotted.split_once('.')?;
        self.namespaces.get(namespace)?.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .flat_map(|(ns, qs)| qs.keys().map(move |n| format!("{}.{}", ns, n)))
            .collect()
    }

    /// Run the named query function with `args`. Server side entry point.
    pub fn call(&self, dotted: &str, args: &Value) -> GateResult<Query> {
        let f = self.get(dotted).ok_or_else(|| {
            GateError::configuration(format!(
                "CustomQuery '{}' not found. Check that the query is exported and the namespace/name matches.",
                dotted
            ))
        })?;
        f.call(&self.zql, args)
    }
}

/// Resolve a plain query function to its query through the global name registry.
pub fn resolve_query(queries: &SyncedQueries, f: &QueryFn, args: &QueryArgs) -> GateResult<Query> {
    resolve_query_in(global_query_names(), queries, f, args)
}

pub fn resolve_query_in(
    names: &QueryNameRegistry,
    queries: &SyncedQueries,
    f: &QueryFn,
    args: &QueryArgs,
) -> GateResult<Query> {
    let name = names.lookup(f).ok_or_else(|| {
        GateError::configuration(format!(
            "Query function '{}' not registered. Ensure it is exported from a queries module and passed to the client via grouped queries.",
            f.debug_name()
        ))
    })?;
    debug!(target: "rowgate::query", "resolve {}", name);
    queries.call(&name, &args.to_value())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionCheckArgs {
    pub table: String,
    #[serde(rename = "objOrId", default, skip_serializing_if = "Option::is_none")]
    pub obj_or_id: Option<Subject>,
}

/// One-row query answering "may the current identity act on this subject".
/// No subject matches nothing; a table without a registered predicate is a configuration error.
pub fn permission_check_query(
    gate: &Permissions,
    registry: &PermissionRegistry,
    zql: &QueryBuilder,
    auth: Option<&AuthData>,
    args: &PermissionCheckArgs,
) -> GateResult<Query> {
    let base = zql.table(&args.table)?;
    let Some(subject) = &args.obj_or_id else {
        return Ok(base.where_condition(Condition::always_false()).one());
    };
    let perm = registry
        .get(&args.table)
        .ok_or_else(|| GateError::configuration(format!("[permission] no permission defined for table: {}", args.table)))?;
    Ok(base
        .try_where(|eb| gate.build_permission_query(auth, eb, &perm, subject, Some(&args.table)))?
        .one())
}
