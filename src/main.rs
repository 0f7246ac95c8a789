use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rowgate::config::GateConfig;
use rowgate::schema::{ColumnDefault, ColumnType, Schema, TableSchema};
use rowgate::server::{MutationOutcome, PushMutation, PushRequest, SyncServer, SyncServerOptions};
use rowgate::storage::MemoryStore;
use rowgate::{AuthData, Model, Models, Where};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = GateConfig::from_env();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "rowgate",
        "rowgate demo starting: RUST_LOG='{}', mode={:?}, mutation_timeout_ms={}",
        rust_log, config.mode, config.mutation_timeout_ms
    );

    let schema = Arc::new(
        Schema::new().table(
            TableSchema::new("message")
                .column("id", ColumnType::String)
                .column("authorId", ColumnType::String)
                .column("text", ColumnType::String)
                .column_with_default("createdAt", ColumnType::Number, ColumnDefault::NowMillis)
                .primary_key(["id"]),
        ),
    );
    schema.validate()?;

    let store = Arc::new(MemoryStore::new(schema.clone()));
    store.seed(
        "message",
        vec![
            json!({"id": "m1", "authorId": "u1", "text": "hello"}).as_object().cloned().unwrap_or_default(),
            json!({"id": "m2", "authorId": "u2", "text": "hi"}).as_object().cloned().unwrap_or_default(),
        ],
    )?;

    let author_is_me = Where::table("message", |eb, auth| auth.map(|a| eb.cmp("authorId", a.id.as_str()).into()));
    let models = Arc::new(Models::new().model(Model::crud("message", author_is_me)));

    let server = SyncServer::new(SyncServerOptions {
        schema,
        database: store.clone(),
        models,
        queries: None,
        create_server_actions: None,
        config,
        processor: None,
    });

    let push = PushRequest {
        client_group_id: "demo".into(),
        mutations: vec![
            PushMutation { id: 1, client_id: "c1".into(), name: "message.update".into(), args: json!({"id": "m2", "text": "edited"}) },
            PushMutation { id: 2, client_id: "c1".into(), name: "message.update".into(), args: json!({"id": "m1", "text": "edited"}) },
        ],
    };
    let out = server.handle_mutation_request(Some(AuthData::new("u1")), push, false).await?;
    for m in &out.response.mutations {
        match &m.result {
            MutationOutcome::Ok => info!(target: "rowgate", "mutation {} applied", m.id),
            MutationOutcome::Error { error } => warn!(target: "rowgate", "mutation {} rejected: {}", m.id, error),
        }
    }
    for row in store.rows("message") {
        info!(target: "rowgate", "{}", serde_json::Value::Object(row));
    }
    Ok(())
}
