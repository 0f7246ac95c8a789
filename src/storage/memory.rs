//! In-memory transactional row store.
//!
//! Tables live behind one `RwLock`; a transaction works on a private copy and swaps it
//! in on commit. Writers are serialized by an async mutex held for the life of the
//! transaction, so committed state never interleaves.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{CrudAction, Database, SharedTransaction, Transaction};
use crate::error::{GateError, GateResult};
use crate::query::eval::{matches, sort_cmp};
use crate::query::{Direction, Query, QueryResult, Row};
use crate::run::{QueryRunner, RunOptions};
use crate::schema::{Schema, TableSchema};

type Tables = BTreeMap<String, Vec<Row>>;

#[derive(Clone)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    tables: Arc<RwLock<Tables>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStore {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema, tables: Arc::new(RwLock::new(BTreeMap::new())), writer: Arc::new(tokio::sync::Mutex::new(())) }
    }

    pub fn schema(&self) -> &Arc<Schema> { &self.schema }

    /// Insert rows outside any transaction (fixtures, bootstrapping).
    pub fn seed(&self, table: &str, rows: Vec<Row>) -> GateResult<()> {
        let mut tables = self.tables.write();
        for row in rows {
            apply_mutation(&self.schema, &mut tables, table, CrudAction::Insert, row)?;
        }
        Ok(())
    }

    /// Committed rows of a table, in primary key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read();
        let mut rows = tables.get(table).cloned().unwrap_or_default();
        if let Some(ts) = self.schema.get(table) {
            let order: Vec<(String, Direction)> = ts.primary_key.iter().map(|c| (c.clone(), Direction::Asc)).collect();
            rows.sort_by(|a, b| cmp_rows(a, b, &order));
        }
        rows
    }

    /// Read committed state.
    pub fn execute(&self, query: &Query) -> GateResult<Vec<Row>> {
        let tables = self.tables.read();
        execute_on(&self.schema, &tables, query)
    }

    pub async fn begin_tx(&self) -> MemoryTransaction {
        let guard = self.writer.clone().lock_owned().await;
        let working = self.tables.read().clone();
        MemoryTransaction {
            schema: self.schema.clone(),
            committed: self.tables.clone(),
            working: Mutex::new(Some(working)),
            guard: Mutex::new(Some(guard)),
        }
    }
}

impl Database for MemoryStore {
    fn begin(&self) -> BoxFuture<'_, GateResult<SharedTransaction>> {
        async move {
            let tx: SharedTransaction = Arc::new(self.begin_tx().await);
            Ok(tx)
        }
        .boxed()
    }

    // committed snapshot, no writer lock
    fn read<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, GateResult<Vec<Row>>> {
        let out = self.execute(query);
        async move { out }.boxed()
    }
}

impl QueryRunner for MemoryStore {
    fn run(&self, query: Query, _options: RunOptions) -> BoxFuture<'static, GateResult<QueryResult>> {
        let result = self.execute(&query).map(QueryResult::complete);
        async move { result }.boxed()
    }
}

pub struct MemoryTransaction {
    schema: Arc<Schema>,
    committed: Arc<RwLock<Tables>>,
    working: Mutex<Option<Tables>>,
    guard: Mutex<Option<OwnedMutexGuard<()>>>,
}

fn closed() -> GateError { GateError::store("tx_closed", "transaction already settled") }

impl MemoryTransaction {
    fn settle(&self, keep: bool) -> GateResult<()> {
        let working = self.working.lock().take().ok_or_else(closed)?;
        if keep {
            *self.committed.write() = working;
        }
        self.guard.lock().take();
        Ok(())
    }
}

impl Transaction for MemoryTransaction {
    fn run<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, GateResult<Vec<Row>>> {
        let out = match self.working.lock().as_ref() {
            Some(tables) => execute_on(&self.schema, tables, query),
            None => Err(closed()),
        };
        async move { out }.boxed()
    }

    fn mutate<'a>(&'a self, table: &'a str, action: CrudAction, row: Row) -> BoxFuture<'a, GateResult<()>> {
        let out = match self.working.lock().as_mut() {
            Some(tables) => apply_mutation(&self.schema, tables, table, action, row),
            None => Err(closed()),
        };
        async move { out }.boxed()
    }

    fn commit(&self) -> BoxFuture<'_, GateResult<()>> {
        let out = self.settle(true);
        async move { out }.boxed()
    }

    fn rollback(&self) -> BoxFuture<'_, GateResult<()>> {
        let out = self.settle(false);
        async move { out }.boxed()
    }
}

fn execute_on(schema: &Schema, tables: &Tables, query: &Query) -> GateResult<Vec<Row>> {
    schema.require(query.table())?;
    let ast = query.complete_ast();
    let mut rows: Vec<Row> = tables
        .get(&ast.table)
        .map(|rows| rows.iter().filter(|r| ast.where_.as_ref().map(|w| matches(w, r)).unwrap_or(true)).cloned().collect())
        .unwrap_or_default();
    rows.sort_by(|a, b| cmp_rows(a, b, &ast.order_by));
    if let Some(bound) = &ast.start {
        rows.retain(|r| match cmp_rows(r, &bound.row, &ast.order_by) {
            Ordering::Greater => true,
            Ordering::Equal => !bound.exclusive,
            Ordering::Less => false,
        });
    }
    if let Some(limit) = ast.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

fn cmp_rows(a: &Row, b: &Row, order: &[(String, Direction)]) -> Ordering {
    for (col, dir) in order {
        let av = a.get(col).unwrap_or(&Value::Null);
        let bv = b.get(col).unwrap_or(&Value::Null);
        let o = sort_cmp(av, bv);
        let o = if *dir == Direction::Desc { o.reverse() } else { o };
        if o != Ordering::Equal {
            return o;
        }
    }
    Ordering::Equal
}

fn key_of(ts: &TableSchema, row: &Row) -> GateResult<Vec<Value>> {
    let mut key = Vec::with_capacity(ts.primary_key.len());
    for pk in &ts.primary_key {
        match row.get(pk) {
            Some(v) if !v.is_null() => key.push(v.clone()),
            _ => return Err(GateError::invalid(format!("{}: missing primary key column '{}'", ts.name, pk))),
        }
    }
    Ok(key)
}

fn position(ts: &TableSchema, rows: &[Row], key: &[Value]) -> Option<usize> {
    rows.iter().position(|r| ts.primary_key.iter().zip(key).all(|(c, v)| r.get(c) == Some(v)))
}

fn check_columns(ts: &TableSchema, row: &Row) -> GateResult<()> {
    for name in row.keys() {
        if ts.column_def(name).is_none() {
            return Err(GateError::invalid(format!("{}: unknown column '{}'", ts.name, name)));
        }
    }
    Ok(())
}

fn with_defaults(ts: &TableSchema, mut row: Row) -> GateResult<Row> {
    for col in &ts.columns {
        if row.get(&col.name).map(|v| !v.is_null()).unwrap_or(false) {
            continue;
        }
        if let Some(d) = &col.default {
            row.insert(col.name.clone(), d.produce());
        } else if !col.optional {
            return Err(GateError::invalid(format!("{}: column '{}' is required", ts.name, col.name)));
        }
    }
    Ok(row)
}

fn apply_mutation(schema: &Schema, tables: &mut Tables, table: &str, action: CrudAction, row: Row) -> GateResult<()> {
    let ts = schema.require(table)?;
    check_columns(ts, &row)?;
    let key = key_of(ts, &row)?;
    let rows = tables.entry(table.to_string()).or_default();
    let existing = position(ts, rows, &key);
    debug!(target: "rowgate::storage", "{} {} key={:?} existing={}", action.as_str(), table, key, existing.is_some());
    match (action, existing) {
        (CrudAction::Insert, Some(_)) => {
            return Err(GateError::store("duplicate_key", format!("{}: row {:?} already exists", table, key)));
        }
        (CrudAction::Insert, None) | (CrudAction::Upsert, None) => rows.push(with_defaults(ts, row)?),
        (CrudAction::Upsert, Some(i)) | (CrudAction::Update, Some(i)) => {
            for (k, v) in row {
                rows[i].insert(k, v);
            }
        }
        (CrudAction::Update, None) | (CrudAction::Delete, None) => {}
        (CrudAction::Delete, Some(i)) => {
            rows.remove(i);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use crate::schema::{ColumnDefault, ColumnType};
    use serde_json::json;

    fn row(v: Value) -> Row { v.as_object().cloned().unwrap() }

    fn store() -> MemoryStore {
        let schema = Schema::new().table(
            TableSchema::new("message")
                .column("id", ColumnType::String)
                .column("authorId", ColumnType::String)
                .optional_column("body", ColumnType::String)
                .column_with_default("createdAt", ColumnType::Number, ColumnDefault::NowMillis)
                .primary_key(["id"]),
        );
        MemoryStore::new(Arc::new(schema))
    }

    #[tokio::test]
    async fn commit_publishes_and_rollback_discards() {
        let s = store();
        let tx = s.begin_tx().await;
        tx.mutate("message", CrudAction::Insert, row(json!({"id": "m1", "authorId": "u1"}))).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(s.rows("message").len(), 1);
        assert!(s.rows("message")[0].get("createdAt").unwrap().is_i64());

        let tx = s.begin_tx().await;
        tx.mutate("message", CrudAction::Delete, row(json!({"id": "m1"}))).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(s.rows("message").len(), 1);
        assert!(matches!(tx.commit().await, Err(GateError::Store { .. })));
    }

    #[tokio::test]
    async fn insert_validates_shape() {
        let s = store();
        let tx = s.begin_tx().await;
        let dup = row(json!({"id": "m1", "authorId": "u1"}));
        tx.mutate("message", CrudAction::Insert, dup.clone()).await.unwrap();
        assert!(tx.mutate("message", CrudAction::Insert, dup).await.is_err());
        assert!(tx.mutate("message", CrudAction::Insert, row(json!({"id": "m2"}))).await.is_err());
        assert!(tx.mutate("message", CrudAction::Insert, row(json!({"id": "m3", "authorId": "u", "x": 1}))).await.is_err());
        assert!(tx.mutate("message", CrudAction::Insert, row(json!({"authorId": "u"}))).await.is_err());
    }

    #[tokio::test]
    async fn update_merges_and_missing_rows_are_noops() {
        let s = store();
        s.seed("message", vec![row(json!({"id": "m1", "authorId": "u1", "body": "a"}))]).unwrap();
        let tx = s.begin_tx().await;
        tx.mutate("message", CrudAction::Update, row(json!({"id": "m1", "body": "b"}))).await.unwrap();
        tx.mutate("message", CrudAction::Update, row(json!({"id": "zz", "body": "b"}))).await.unwrap();
        tx.mutate("message", CrudAction::Upsert, row(json!({"id": "m2", "authorId": "u2"}))).await.unwrap();
        tx.commit().await.unwrap();
        let rows = s.rows("message");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["body"], "b");
        assert_eq!(rows[0]["authorId"], "u1");
    }

    #[tokio::test]
    async fn cursor_and_limit_page_in_key_order() {
        let s = store();
        for i in 0..5 {
            s.seed("message", vec![row(json!({"id": format!("m{}", i), "authorId": "u"}))]).unwrap();
        }
        let zql = QueryBuilder::new(s.schema().clone());
        let page1 = s.execute(&zql.table("message").unwrap().limit(2)).unwrap();
        assert_eq!(page1.iter().map(|r| r["id"].as_str().unwrap()).collect::<Vec<_>>(), vec!["m0", "m1"]);
        let page2 = s.execute(&zql.table("message").unwrap().limit(2).start(page1[1].clone())).unwrap();
        assert_eq!(page2.iter().map(|r| r["id"].as_str().unwrap()).collect::<Vec<_>>(), vec!["m2", "m3"]);
    }
}
