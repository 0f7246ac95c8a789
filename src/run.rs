//! One-shot query execution through a process-wide runner.
//!
//! The client installs a runner that forwards to its current backing instance and the
//! server installs one that executes inside a transaction. Code that only has a plain
//! query function calls `run` and does not care which side it is on.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GateError, GateResult};
use crate::query::{Query, QueryResult};
use crate::synced::{resolve_query, QueryFn, SyncedQueries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Whatever is available locally.
    #[default]
    Unknown,
    /// Wait for the authoritative answer.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(rename = "type", default)]
    pub kind: RunKind,
}

impl RunOptions {
    pub fn complete() -> Self { Self { kind: RunKind::Complete } }
}

pub trait QueryRunner: Send + Sync {
    fn run(&self, query: Query, options: RunOptions) -> BoxFuture<'static, GateResult<QueryResult>>;
}

/// Arguments to a query function. Parameterless and parameterized calls are told
/// apart by this tag, never by the shape of the value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryArgs {
    #[default]
    None,
    Params(Value),
}

impl QueryArgs {
    pub fn to_value(&self) -> Value {
        match self {
            QueryArgs::None => Value::Null,
            QueryArgs::Params(v) => v.clone(),
        }
    }
}

impl From<Value> for QueryArgs {
    fn from(v: Value) -> Self { QueryArgs::Params(v) }
}

static RUNNER: Lazy<RwLock<Option<Arc<dyn QueryRunner>>>> = Lazy::new(|| RwLock::new(None));
static CUSTOM_QUERIES: Lazy<RwLock<Option<Arc<SyncedQueries>>>> = Lazy::new(|| RwLock::new(None));

pub fn set_runner(runner: Arc<dyn QueryRunner>) { *RUNNER.write() = Some(runner); }

pub fn runner() -> GateResult<Arc<dyn QueryRunner>> {
    RUNNER.read().clone().ok_or_else(|| {
        GateError::configuration("Query runner not initialized. Ensure a SyncClient is connected or a SyncServer was created.")
    })
}

pub fn set_custom_queries(queries: Arc<SyncedQueries>) { *CUSTOM_QUERIES.write() = Some(queries); }

pub fn custom_queries() -> GateResult<Arc<SyncedQueries>> {
    CUSTOM_QUERIES.read().clone().ok_or_else(|| {
        GateError::configuration("Custom queries not initialized. Ensure a SyncClient or SyncServer has been created.")
    })
}

/// Run a registered query function once and return its rows. Not reactive.
pub async fn run(f: &QueryFn, args: QueryArgs, options: RunOptions) -> GateResult<QueryResult> {
    let queries = custom_queries()?;
    let query = resolve_query(&queries, f, &args)?;
    let runner = runner()?;
    runner.run(query, options).await
}

/// Run an already built query through the installed runner.
pub async fn run_query(query: Query, options: RunOptions) -> GateResult<QueryResult> {
    let runner = runner()?;
    runner.run(query, options).await
}
