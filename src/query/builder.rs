use std::sync::Arc;

use serde_json::Value;

use super::condition::{Condition, Operand, Operator};
use super::Query;
use crate::error::GateResult;
use crate::schema::Schema;

/// Builds conditions against one table. Handed to predicates and `Query::where_` closures.
#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    table: String,
}

impl ExpressionBuilder {
    pub fn new<S: Into<String>>(table: S) -> Self { Self { table: table.into() } }

    pub fn table(&self) -> &str { &self.table }

    /// `column = value`
    pub fn cmp<V: Into<Value>>(&self, column: &str, value: V) -> Condition {
        self.cmp_op(column, Operator::Eq, value)
    }

    pub fn cmp_op<V: Into<Value>>(&self, column: &str, op: Operator, value: V) -> Condition {
        Condition::Simple { op, left: Operand::column(column), right: Operand::literal(value) }
    }

    /// Literal on both sides; used for constant true/false conditions.
    pub fn cmp_lit<L: Into<Value>, R: Into<Value>>(&self, lhs: L, op: Operator, rhs: R) -> Condition {
        Condition::Simple { op, left: Operand::literal(lhs), right: Operand::literal(rhs) }
    }

    /// Conjunction. A single condition is returned as-is and an empty list is always true.
    pub fn and<I: IntoIterator<Item = Condition>>(&self, conditions: I) -> Condition {
        let mut flat = Vec::new();
        for c in conditions {
            match c {
                Condition::And { conditions } => flat.extend(conditions),
                c => flat.push(c),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Condition::And { conditions: flat }
    }

    /// Disjunction. An empty list is never true.
    pub fn or<I: IntoIterator<Item = Condition>>(&self, conditions: I) -> Condition {
        let mut flat: Vec<Condition> = conditions.into_iter().collect();
        if flat.len() == 1 {
            return flat.remove(0);
        }
        Condition::Or { conditions: flat }
    }
}

/// Entry point for building table queries from a schema.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    schema: Arc<Schema>,
}

impl QueryBuilder {
    pub fn new(schema: Arc<Schema>) -> Self { Self { schema } }

    pub fn schema(&self) -> &Arc<Schema> { &self.schema }

    pub fn table(&self, name: &str) -> GateResult<Query> {
        let ts = self.schema.require(name)?;
        Ok(Query::new(name, ts.primary_key.clone()))
    }
}
