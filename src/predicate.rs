//! Permission predicates.
//!
//! A `Where` is a pure function of an expression builder and an identity that returns
//! either a blanket allow/deny or a filter condition. The table it guards travels with
//! the value, so the gate and the synced permission query never need a side table to
//! find out which schema to consult.

use std::fmt;
use std::sync::Arc;

use crate::context::Environment;
use crate::identity::{current_environment, query_or_mutator_auth_data, AuthData};
use crate::query::{Condition, ExpressionBuilder, Operator};

/// Outcome of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Permit {
    Bool(bool),
    Condition(Condition),
}

impl From<bool> for Permit {
    fn from(b: bool) -> Self { Permit::Bool(b) }
}

impl From<Condition> for Permit {
    fn from(c: Condition) -> Self { Permit::Condition(c) }
}

/// `None` means the predicate has no answer for this identity, which the compiler rejects.
pub type PredicateFn = dyn Fn(&ExpressionBuilder, Option<&AuthData>) -> Option<Permit> + Send + Sync;

#[derive(Clone)]
pub struct Where {
    inner: Arc<PredicateFn>,
    table: Option<String>,
    server_only: bool,
}

impl Where {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ExpressionBuilder, Option<&AuthData>) -> Option<Permit> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f), table: None, server_only: false }
    }

    /// Predicate bound to a table; required for `can`.
    pub fn table<S, F>(table: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&ExpressionBuilder, Option<&AuthData>) -> Option<Permit> + Send + Sync + 'static,
    {
        Self::new(f).with_table(table)
    }

    /// Predicate whose clauses only mean something on the server. On a client it always passes.
    pub fn server_only<S, F>(table: S, f: F) -> Self
    where
        S: Into<String>,
        F: Fn(&ExpressionBuilder, Option<&AuthData>) -> Option<Permit> + Send + Sync + 'static,
    {
        Self { server_only: true, ..Self::table(table, f) }
    }

    /// Constant predicate.
    pub fn allow_all<S: Into<String>>(table: S) -> Self { Self::table(table, |_, _| Some(Permit::Bool(true))) }

    pub fn deny_all<S: Into<String>>(table: S) -> Self { Self::table(table, |_, _| Some(Permit::Bool(false))) }

    pub fn with_table<S: Into<String>>(mut self, table: S) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn table_name(&self) -> Option<&str> { self.table.as_deref() }

    pub fn is_server_only(&self) -> bool { self.server_only }

    /// Raw predicate result.
    pub fn evaluate(&self, eb: &ExpressionBuilder, auth: Option<&AuthData>) -> Option<Permit> { (self.inner)(eb, auth) }

    /// Predicate as a filter condition. Booleans become `0 = 0` / `1 = 0`; a server-only
    /// predicate on a client becomes an empty `AND`.
    pub fn apply(&self, eb: &ExpressionBuilder, auth: Option<&AuthData>, environment: Environment) -> Option<Condition> {
        if self.server_only && environment == Environment::Client {
            return Some(eb.and([]));
        }
        match self.evaluate(eb, auth)? {
            Permit::Bool(true) => Some(eb.cmp_lit(0, Operator::Eq, 0)),
            Permit::Bool(false) => Some(eb.cmp_lit(1, Operator::Eq, 0)),
            Permit::Condition(c) => Some(c),
        }
    }

    /// `apply` with the identity and environment of whatever scope is active.
    pub fn apply_ambient(&self, eb: &ExpressionBuilder) -> Option<Condition> {
        let auth = query_or_mutator_auth_data();
        self.apply(eb, auth.as_ref(), current_environment())
    }
}

impl fmt::Debug for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Where").field("table", &self.table).field("server_only", &self.server_only).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{with_request_context, RequestContext};
    use crate::query::eval::matches;
    use crate::query::Row;
    use serde_json::json;

    fn author_is_me() -> Where {
        Where::table("message", |eb, auth| auth.map(|a| eb.cmp("authorId", a.id.as_str()).into()))
    }

    #[test]
    fn booleans_become_literal_comparisons() {
        let eb = ExpressionBuilder::new("message");
        let row = Row::new();
        let yes = Where::allow_all("message").apply(&eb, None, Environment::Server).unwrap();
        let no = Where::deny_all("message").apply(&eb, None, Environment::Server).unwrap();
        assert!(matches(&yes, &row));
        assert!(!matches(&no, &row));
    }

    #[test]
    fn server_only_is_permissive_on_client() {
        let w = Where::server_only("message", |_, _| Some(Permit::Bool(false)));
        let eb = ExpressionBuilder::new("message");
        assert_eq!(w.apply(&eb, None, Environment::Client), Some(eb.and([])));
        assert_eq!(w.apply(&eb, None, Environment::Server), Some(eb.cmp_lit(1, Operator::Eq, 0)));
    }

    #[test]
    fn undefined_result_passes_through() {
        let eb = ExpressionBuilder::new("message");
        assert_eq!(author_is_me().apply(&eb, None, Environment::Server), None);
        assert_eq!(author_is_me().table_name(), Some("message"));
        assert_eq!(Where::new(|_, _| None).table_name(), None);
    }

    #[tokio::test]
    async fn ambient_identity_comes_from_request_scope() {
        let eb = ExpressionBuilder::new("message");
        let w = author_is_me();
        assert_eq!(w.apply_ambient(&eb), None);
        let ctx = RequestContext::server(Some(AuthData::new("u1")));
        let cond = with_request_context(ctx, async { w.apply_ambient(&eb) }).await.unwrap();
        let row: Row = json!({"authorId": "u1"}).as_object().cloned().unwrap();
        assert!(matches(&cond, &row));
    }
}
