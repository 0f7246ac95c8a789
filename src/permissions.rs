//! Permission compiler and enforcement gate.
//!
//! `build_permission_query` turns a `Where` plus a subject into a filter condition and
//! never touches storage. `can` is the checkpoint mutation code calls: on a server it
//! runs a one-row existence query inside the active transaction and fails closed, on a
//! client it returns immediately because the server re-validates every push.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::{try_current_context, Environment, MutatorContext};
use crate::error::{GateError, GateResult};
use crate::identity::AuthData;
use crate::predicate::{Permit, Where};
use crate::query::pretty::{pretty_format_query, PrettyMode};
use crate::query::{Condition, ExpressionBuilder, Operator, Query, QueryBuilder, Row};
use crate::schema::{Schema, TableSchema};

/// What a permission is checked against: a bare primary key value or a (partial) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Subject {
    Row(Row),
    Id(Value),
}

impl Subject {
    /// Primary key column/value pairs. A bare id is used for every key column.
    pub fn key_values(&self, table: &TableSchema) -> GateResult<Vec<(String, Value)>> {
        table
            .primary_key
            .iter()
            .map(|col| {
                let value = match self {
                    Subject::Id(v) => v.clone(),
                    Subject::Row(row) => row.get(col).cloned().ok_or_else(|| {
                        GateError::configuration(format!("subject for {} is missing primary key column {}", table.name, col))
                    })?,
                };
                Ok((col.clone(), value))
            })
            .collect()
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self { Subject::Id(Value::from(s)) }
}

impl From<String> for Subject {
    fn from(s: String) -> Self { Subject::Id(Value::from(s)) }
}

impl From<i64> for Subject {
    fn from(n: i64) -> Self { Subject::Id(Value::from(n)) }
}

impl From<Row> for Subject {
    fn from(r: Row) -> Self { Subject::Row(r) }
}

impl From<&Row> for Subject {
    fn from(r: &Row) -> Self { Subject::Row(r.clone()) }
}

impl From<Value> for Subject {
    fn from(v: Value) -> Self {
        match v {
            Value::Object(m) => Subject::Row(m),
            other => Subject::Id(other),
        }
    }
}

impl From<&Subject> for Subject {
    fn from(s: &Subject) -> Self { s.clone() }
}

pub struct Permissions {
    environment: Environment,
    schema: Arc<Schema>,
    zql: QueryBuilder,
    diagnostics: bool,
}

impl Permissions {
    pub fn new(environment: Environment, schema: Arc<Schema>) -> Self {
        let zql = QueryBuilder::new(schema.clone());
        Self { environment, schema, zql, diagnostics: true }
    }

    /// Embed the pretty-printed existence query in denial errors. Off in production.
    pub fn with_diagnostics(mut self, on: bool) -> Self {
        self.diagnostics = on;
        self
    }

    pub fn environment(&self) -> Environment { self.environment }

    pub fn schema(&self) -> &Arc<Schema> { &self.schema }

    fn resolve_table<'a>(&'a self, where_: &'a Where, table_override: Option<&'a str>) -> GateResult<(&'a str, &'a TableSchema)> {
        let name = table_override
            .or_else(|| where_.table_name())
            .ok_or_else(|| GateError::configuration("Must use a table-bound Where for build_permission_query"))?;
        let table = self
            .schema
            .get(name)
            .ok_or_else(|| GateError::configuration(format!("No schema for table {}", name)))?;
        Ok((name, table))
    }

    /// Compile `where_` against one subject.
    ///
    /// A boolean outcome becomes a literal comparison (`true = true` / `true = false`)
    /// with no key filter; a condition is ANDed with equality on every primary key column.
    pub fn build_permission_query(
        &self,
        auth: Option<&AuthData>,
        eb: &ExpressionBuilder,
        where_: &Where,
        subject: &Subject,
        table_override: Option<&str>,
    ) -> GateResult<Condition> {
        self.compile(self.environment, auth, eb, where_, subject, table_override)
    }

    fn compile(
        &self,
        environment: Environment,
        auth: Option<&AuthData>,
        eb: &ExpressionBuilder,
        where_: &Where,
        subject: &Subject,
        table_override: Option<&str>,
    ) -> GateResult<Condition> {
        let (name, table) = self.resolve_table(where_, table_override)?;
        let permit = if where_.is_server_only() && environment == Environment::Client {
            Some(Permit::Condition(eb.and([])))
        } else {
            where_.evaluate(eb, auth)
        };
        match permit {
            None => Err(GateError::configuration(format!("No permission defined for {}", name))),
            Some(Permit::Bool(true)) => Ok(eb.cmp_lit(true, Operator::Eq, true)),
            Some(Permit::Bool(false)) => Ok(eb.cmp_lit(true, Operator::Eq, false)),
            Some(Permit::Condition(cond)) => {
                let mut parts = vec![cond];
                for (col, value) in subject.key_values(table)? {
                    parts.push(eb.cmp(&col, value));
                }
                Ok(eb.and(parts))
            }
        }
    }

    /// One-row query that returns a row exactly when the subject is permitted.
    pub fn existence_query(
        &self,
        auth: Option<&AuthData>,
        where_: &Where,
        subject: &Subject,
        table_override: Option<&str>,
    ) -> GateResult<Query> {
        self.existence_query_in(self.environment, auth, where_, subject, table_override)
    }

    fn existence_query_in(
        &self,
        environment: Environment,
        auth: Option<&AuthData>,
        where_: &Where,
        subject: &Subject,
        table_override: Option<&str>,
    ) -> GateResult<Query> {
        let (name, _) = self.resolve_table(where_, table_override)?;
        let base = self.zql.table(name)?;
        Ok(base.try_where(|eb| self.compile(environment, auth, eb, where_, subject, table_override))?.one())
    }

    /// Suppression key for a subject: table plus its primary key values.
    pub fn subject_key(&self, table: &str, subject: &Subject) -> GateResult<String> {
        let ts = self.schema.require(table)?;
        let values: Vec<Value> = subject.key_values(ts)?.into_iter().map(|(_, v)| v).collect();
        Ok(format!("{}:{}", table, Value::Array(values)))
    }

    /// Authorize the current mutation against `where_`. Needs an active mutation on the server.
    pub async fn can<S: Into<Subject>>(&self, where_: &Where, subject: S) -> GateResult<()> {
        match try_current_context() {
            Some(ctx) => self.can_in(&ctx, where_, &subject.into()).await,
            None if self.environment == Environment::Client => Ok(()),
            None => Err(GateError::NotInMutator),
        }
    }

    /// The context decides the environment, whatever this gate was built for.
    pub(crate) async fn can_in(&self, ctx: &MutatorContext, where_: &Where, subject: &Subject) -> GateResult<()> {
        // optimistic on the client, the server is authoritative
        if ctx.environment == Environment::Client {
            return Ok(());
        }
        let table = where_
            .table_name()
            .ok_or_else(|| GateError::configuration("Must use a table-bound Where to pass to can()"))?;
        self.ensure_permission(ctx, table, where_, subject).await?;
        ctx.mark_permission_checked(self.subject_key(table, subject)?);
        Ok(())
    }

    async fn ensure_permission(&self, ctx: &MutatorContext, table: &str, where_: &Where, subject: &Subject) -> GateResult<()> {
        let auth = ctx.auth_data.as_ref();
        if auth.map(|a| a.is_admin()).unwrap_or(false) {
            debug!(target: "rowgate::permission", "admin bypass on {}", table);
            return Ok(());
        }
        let title = format!("{} with auth id: {}", table, auth.map(|a| a.id.as_str()).unwrap_or("none"));
        let query = self.existence_query_in(ctx.environment, auth, where_, subject, None)?;
        match ctx.tx.run(&query).await {
            Ok(rows) if !rows.is_empty() => {
                debug!(target: "rowgate::permission", "allowed: {}", title);
                Ok(())
            }
            Ok(_) => {
                debug!(target: "rowgate::permission", "denied: {}", title);
                let query = self.diagnostics.then(|| pretty_format_query(&query, PrettyMode::Full));
                Err(GateError::AuthorizationDenied { subject: title, query })
            }
            Err(e) => Err(GateError::AuthorizationCheckFailed { subject: title, message: e.to_string() }),
        }
    }
}

impl std::fmt::Debug for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permissions")
            .field("environment", &self.environment)
            .field("tables", &self.schema.tables.len())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}
