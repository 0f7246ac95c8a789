#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use rowgate::config::{GateConfig, RunMode};
use rowgate::query::{Operator, Row};
use rowgate::schema::{ColumnDefault, ColumnType, Schema, TableSchema};
use rowgate::server::{PushMutation, PushRequest, SyncServer, SyncServerOptions};
use rowgate::storage::MemoryStore;
use rowgate::{Models, Where};

pub fn schema() -> Arc<Schema> {
    Arc::new(
        Schema::new()
            .table(
                TableSchema::new("message")
                    .column("id", ColumnType::String)
                    .column("authorId", ColumnType::String)
                    .optional_column("text", ColumnType::String)
                    .column_with_default("createdAt", ColumnType::Number, ColumnDefault::NowMillis)
                    .primary_key(["id"]),
            )
            .table(
                TableSchema::new("member")
                    .column("teamId", ColumnType::String)
                    .column("userId", ColumnType::String)
                    .primary_key(["teamId", "userId"]),
            ),
    )
}

pub fn row(v: Value) -> Row { v.as_object().cloned().expect("object literal") }

/// `message`: m1 by u1, m2 by u2.
pub fn seeded_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new(schema());
    store
        .seed(
            "message",
            vec![
                row(json!({"id": "m1", "authorId": "u1", "text": "hello"})),
                row(json!({"id": "m2", "authorId": "u2", "text": "hi"})),
            ],
        )
        .expect("seed");
    Arc::new(store)
}

/// Allow if `message.authorId == auth.id`; undefined for anonymous callers.
pub fn author_is_me() -> Where {
    Where::table("message", |eb, auth| auth.map(|a| eb.cmp("authorId", a.id.as_str()).into()))
}

/// `author_is_me` that also counts how often it is evaluated.
pub fn counted_author_is_me(counter: Arc<AtomicUsize>) -> Where {
    Where::table("message", move |eb, auth| {
        counter.fetch_add(1, Ordering::SeqCst);
        auth.map(|a| eb.cmp("authorId", a.id.as_str()).into())
    })
}

/// Only rows that already carry a server generated `createdAt` pass.
pub fn author_with_timestamp() -> Where {
    Where::table("message", |eb, auth| {
        auth.map(|a| eb.and([eb.cmp("authorId", a.id.as_str()), eb.cmp_op("createdAt", Operator::Gt, 0)]).into())
    })
}

pub fn config(mode: RunMode) -> GateConfig {
    let mut cfg = GateConfig::for_mode(mode);
    cfg.mutation_timeout_ms = 2_000;
    cfg
}

pub fn server(store: Arc<MemoryStore>, models: Models, cfg: GateConfig) -> SyncServer {
    SyncServer::new(SyncServerOptions {
        schema: store.schema().clone(),
        database: store,
        models: Arc::new(models),
        queries: None,
        create_server_actions: None,
        config: cfg,
        processor: None,
    })
}

pub fn push(mutations: &[(&str, Value)]) -> PushRequest {
    PushRequest {
        client_group_id: "g1".into(),
        mutations: mutations
            .iter()
            .enumerate()
            .map(|(i, (name, args))| PushMutation { id: i as u64 + 1, client_id: "c1".into(), name: name.to_string(), args: args.clone() })
            .collect(),
    }
}

pub fn find<'a>(rows: &'a [Row], id: &str) -> Option<&'a Row> { rows.iter().find(|r| r["id"] == id) }
