//!
//! rowgate schema
//! --------------
//! Table declarations shared by client and server: column names, simple logical
//! types, insert-time defaults and the primary key. The permission compiler only
//! ever reads `primary_key`; the in-memory store also uses columns and defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GateError, GateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType { String, Number, Boolean, Json }

/// Value applied to a column when an insert leaves it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ColumnDefault {
    Value(Value),
    /// Epoch milliseconds at insert time.
    NowMillis,
}

impl ColumnDefault {
    pub fn produce(&self) -> Value {
        match self {
            ColumnDefault::Value(v) => v.clone(),
            ColumnDefault::NowMillis => Value::from(chrono::Utc::now().timestamp_millis()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<ColumnDefault>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(rename = "primaryKey")]
    pub primary_key: Vec<String>,
}

impl TableSchema {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), columns: Vec::new(), primary_key: Vec::new() }
    }

    pub fn column<S: Into<String>>(mut self, name: S, kind: ColumnType) -> Self {
        self.columns.push(ColumnDef { name: name.into(), kind, optional: false, default: None });
        self
    }

    pub fn optional_column<S: Into<String>>(mut self, name: S, kind: ColumnType) -> Self {
        self.columns.push(ColumnDef { name: name.into(), kind, optional: true, default: None });
        self
    }

    pub fn column_with_default<S: Into<String>>(mut self, name: S, kind: ColumnType, default: ColumnDefault) -> Self {
        self.columns.push(ColumnDef { name: name.into(), kind, optional: true, default: Some(default) });
        self
    }

    pub fn primary_key<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = cols.into_iter().map(Into::into).collect();
        self
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> { self.columns.iter().find(|c| c.name == name) }

    /// A table is usable only if it has a primary key made of declared columns.
    pub fn validate(&self) -> GateResult<()> {
        if self.primary_key.is_empty() {
            return Err(GateError::configuration(format!("table '{}' has no primary key", self.name)));
        }
        for pk in &self.primary_key {
            if self.column_def(pk).is_none() {
                return Err(GateError::configuration(format!(
                    "table '{}' primary key column '{}' is not declared",
                    self.name, pk
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self { Self::default() }

    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> { self.tables.get(name) }

    pub fn require(&self, name: &str) -> GateResult<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| GateError::configuration(format!("no schema for table '{}'", name)))
    }

    pub fn validate(&self) -> GateResult<()> {
        for t in self.tables.values() { t.validate()?; }
        Ok(())
    }
}
