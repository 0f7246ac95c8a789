//! Chunked iteration over large queries.

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::error::GateResult;
use crate::query::{Query, Row};
use crate::run::{QueryRunner, RunOptions};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub chunk: usize,
    pub pause: Option<Duration>,
    /// Maximum number of chunks before giving up.
    pub stop_after: usize,
}

impl Default for BatchOptions {
    fn default() -> Self { Self { chunk: 20, pause: None, stop_after: 100_000 } }
}

/// Feed `query` to `mapper` `chunk` rows at a time, paging with an exclusive `start`
/// cursor on the last row seen. Returns the number of chunks processed.
pub async fn batch_query<F, Fut>(runner: &dyn QueryRunner, query: Query, mut mapper: F, opts: BatchOptions) -> GateResult<usize>
where
    F: FnMut(Vec<Row>) -> Fut,
    Fut: Future<Output = GateResult<()>>,
{
    let chunk = opts.chunk.max(1);
    let mut last: Option<Row> = None;
    let mut iterations = 0usize;
    loop {
        let mut page = query.clone().limit(chunk);
        if let Some(row) = last.take() {
            page = page.start(row);
        }
        let rows = runner.run(page, RunOptions::complete()).await?.rows;
        let has_more = rows.len() >= chunk;
        last = rows.last().cloned();
        mapper(rows).await?;
        iterations += 1;
        if !has_more {
            break;
        }
        if iterations >= opts.stop_after {
            error!(target: "rowgate::query", "[batch_query] stopping batch, ran {} chunks", opts.stop_after);
            break;
        }
        if let Some(p) = opts.pause {
            tokio::time::sleep(p).await;
        }
    }
    Ok(iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use crate::schema::{ColumnType, Schema, TableSchema};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn store(n: usize) -> (MemoryStore, QueryBuilder) {
        let schema = Arc::new(Schema::new().table(
            TableSchema::new("item").column("id", ColumnType::Number).primary_key(["id"]),
        ));
        let store = MemoryStore::new(schema.clone());
        let rows = (0..n).map(|i| json!({"id": i}).as_object().cloned().unwrap()).collect();
        store.seed("item", rows).unwrap();
        (store, QueryBuilder::new(schema))
    }

    #[tokio::test]
    async fn visits_every_row_once() {
        let (store, zql) = store(45);
        let mut seen = Vec::new();
        let chunks = batch_query(
            &store,
            zql.table("item").unwrap(),
            |rows| {
                seen.extend(rows.iter().map(|r| r["id"].as_i64().unwrap()));
                async { Ok(()) }
            },
            BatchOptions { chunk: 10, ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(chunks, 5);
        assert_eq!(seen, (0..45).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn stop_after_caps_chunks() {
        let (store, zql) = store(100);
        let mut total = 0;
        let chunks = batch_query(
            &store,
            zql.table("item").unwrap(),
            |rows| {
                total += rows.len();
                async { Ok(()) }
            },
            BatchOptions { chunk: 10, pause: None, stop_after: 3 },
        )
        .await
        .unwrap();
        assert_eq!(chunks, 3);
        assert_eq!(total, 30);
    }
}
