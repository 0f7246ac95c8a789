//! Condition AST produced by the expression builder and consumed by the row store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "ILIKE")]
    ILike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS")]
    Is,
    #[serde(rename = "IS NOT")]
    IsNot,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Operator {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_uppercase().as_str() {
            "=" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "LIKE" => Operator::Like,
            "ILIKE" => Operator::ILike,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "IS" => Operator::Is,
            "IS NOT" => Operator::IsNot,
            other => return Err(GateError::invalid(format!("unknown operator '{}'", other))),
        };
        Ok(op)
    }
}

/// One side of a simple comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Column { name: String },
    Literal { value: Value },
}

impl Operand {
    pub fn column<S: Into<String>>(name: S) -> Self { Operand::Column { name: name.into() } }
    pub fn literal<V: Into<Value>>(value: V) -> Self { Operand::Literal { value: value.into() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Simple { op: Operator, left: Operand, right: Operand },
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
}

impl Condition {
    /// `true = true`: satisfied by every row and composable inside `AND`.
    pub fn always_true() -> Self {
        Condition::Simple { op: Operator::Eq, left: Operand::literal(true), right: Operand::literal(true) }
    }

    /// `true = false`: satisfied by no row.
    pub fn always_false() -> Self {
        Condition::Simple { op: Operator::Eq, left: Operand::literal(true), right: Operand::literal(false) }
    }

    /// Combine with another condition, flattening nested `AND`s.
    pub fn and(self, other: Condition) -> Condition {
        let mut out = Vec::new();
        for c in [self, other] {
            match c {
                Condition::And { conditions } => out.extend(conditions),
                c => out.push(c),
            }
        }
        Condition::And { conditions: out }
    }

    /// Columns referenced anywhere in this condition.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Simple { left, right, .. } => {
                for o in [left, right] {
                    if let Operand::Column { name } = o { out.push(name.as_str()); }
                }
            }
            Condition::And { conditions } | Condition::Or { conditions } => {
                for c in conditions { c.collect_columns(out); }
            }
        }
    }
}
