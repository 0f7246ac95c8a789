//!
//! rowgate query layer
//! -------------------
//! The narrow slice of a reactive query engine that the permission layer needs:
//! an expression builder (`cmp`, `cmp_lit`, `and`, `or`), a chainable table query
//! (`where_`, `one`, `limit`, `start`, `order_by`) and a completed-AST accessor that
//! the pretty printer and the row store both read.

pub mod builder;
pub mod condition;
pub mod eval;
pub mod pretty;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use builder::{ExpressionBuilder, QueryBuilder};
pub use condition::{Condition, Operand, Operator};

pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction { Asc, Desc }

/// Cursor: results begin after (or at, when `exclusive` is false) this row in sort order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub row: Row,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAst {
    pub table: String,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(rename = "orderBy", default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<(String, Direction)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    ast: QueryAst,
    primary_key: Vec<String>,
    one: bool,
}

impl Query {
    pub(crate) fn new<S: Into<String>>(table: S, primary_key: Vec<String>) -> Self {
        Self {
            ast: QueryAst { table: table.into(), where_: None, limit: None, order_by: Vec::new(), start: None },
            primary_key,
            one: false,
        }
    }

    pub fn table(&self) -> &str { &self.ast.table }

    pub fn primary_key(&self) -> &[String] { &self.primary_key }

    /// Add a filter built from the table's expression builder. Repeated calls are ANDed.
    pub fn where_<F>(self, f: F) -> Self
    where
        F: FnOnce(&ExpressionBuilder) -> Condition,
    {
        let eb = ExpressionBuilder::new(self.ast.table.clone());
        let cond = f(&eb);
        self.where_condition(cond)
    }

    /// Fallible variant of `where_` for builders that can fail, e.g. permission compilation.
    pub fn try_where<F, E>(self, f: F) -> Result<Self, E>
    where
        F: FnOnce(&ExpressionBuilder) -> Result<Condition, E>,
    {
        let eb = ExpressionBuilder::new(self.ast.table.clone());
        let cond = f(&eb)?;
        Ok(self.where_condition(cond))
    }

    pub fn where_condition(mut self, cond: Condition) -> Self {
        self.ast.where_ = Some(match self.ast.where_.take() {
            Some(existing) => existing.and(cond),
            None => cond,
        });
        self
    }

    /// Single-row query.
    pub fn one(mut self) -> Self {
        self.one = true;
        self.ast.limit = Some(1);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.ast.limit = Some(n);
        self
    }

    pub fn start(mut self, row: Row) -> Self {
        self.ast.start = Some(Bound { row, exclusive: true });
        self
    }

    pub fn order_by<S: Into<String>>(mut self, column: S, dir: Direction) -> Self {
        self.ast.order_by.push((column.into(), dir));
        self
    }

    pub fn is_one(&self) -> bool { self.one }

    pub fn ast(&self) -> &QueryAst { &self.ast }

    /// AST with the primary key appended to the ordering so results and cursors are stable.
    pub fn complete_ast(&self) -> QueryAst {
        let mut ast = self.ast.clone();
        for pk in &self.primary_key {
            if !ast.order_by.iter().any(|(c, _)| c == pk) {
                ast.order_by.push((pk.clone(), Direction::Asc));
            }
        }
        ast
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Local data only; the server may still change the answer.
    #[default]
    Unknown,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub status: ResultStatus,
}

impl QueryResult {
    pub fn complete(rows: Vec<Row>) -> Self { Self { rows, status: ResultStatus::Complete } }

    pub fn first(&self) -> Option<&Row> { self.rows.first() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}
