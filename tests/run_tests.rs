//! The `run` helper and the client share process-wide runner state, so everything that
//! touches it lives in one sequential test.

mod support;

use std::sync::Arc;

use anyhow::Result;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};

use rowgate::client::{ClientInstance, PermissionState, SyncClient, SyncClientOptions};
use rowgate::config::RunMode;
use rowgate::identity::query_or_mutator_auth_data;
use rowgate::query::{Direction, Query, QueryResult, ResultStatus};
use rowgate::run::{run, run_query, QueryArgs, QueryRunner, RunOptions};
use rowgate::server::{SyncServer, SyncServerOptions};
use rowgate::storage::{Database, MemoryStore, SharedTransaction};
use rowgate::synced::{GroupedQueries, QueryFn, SyncedQueries};
use rowgate::{GateError, Model, Models, Subject, Where};

use support::*;

/// Local replica that has not heard back from the server yet.
struct PartialReplica(MemoryStore);

impl QueryRunner for PartialReplica {
    fn run(&self, query: Query, _options: RunOptions) -> BoxFuture<'static, rowgate::GateResult<QueryResult>> {
        let rows = self.0.execute(&query);
        async move { Ok(QueryResult { rows: rows?, status: ResultStatus::Unknown }) }.boxed()
    }
}

impl Database for PartialReplica {
    fn begin(&self) -> BoxFuture<'_, rowgate::GateResult<SharedTransaction>> { self.0.begin() }
}

fn by_author() -> QueryFn {
    QueryFn::named("byAuthor", |zql, args: &Value| {
        let author = args["authorId"].as_str().unwrap_or_default().to_string();
        Ok(zql.table("message")?.where_(|eb| eb.cmp("authorId", author)).order_by("id", Direction::Asc))
    })
}

fn mine() -> QueryFn {
    QueryFn::named("mine", |zql, _args: &Value| {
        let me = query_or_mutator_auth_data().map(|a| a.id).unwrap_or_default();
        Ok(zql.table("message")?.where_(|eb| eb.cmp("authorId", me)))
    })
}

fn ids(result: &QueryResult) -> Vec<String> {
    result.rows.iter().filter_map(|r| r["id"].as_str().map(str::to_string)).collect()
}

#[tokio::test]
async fn run_helper_and_client_lifecycle() -> Result<()> {
    let by_author = by_author();
    let mine = mine();
    let grouped = GroupedQueries::new().query("messages", "byAuthor", by_author.clone()).query("messages", "mine", mine.clone());

    // server side: runner executes in its own transaction
    let store = seeded_store();
    let _srv = SyncServer::new(SyncServerOptions {
        schema: store.schema().clone(),
        database: store.clone(),
        models: Arc::new(Models::new()),
        queries: Some(Arc::new(SyncedQueries::from_groups(store.schema().clone(), grouped.clone()))),
        create_server_actions: None,
        config: config(RunMode::Test),
        processor: None,
    });
    let res = run(&by_author, QueryArgs::Params(json!({"authorId": "u2"})), RunOptions::complete()).await?;
    assert_eq!(ids(&res), vec!["m2"]);
    assert_eq!(res.status, ResultStatus::Complete);

    let stray = QueryFn::new(|zql, _args: &Value| zql.table("message"));
    let err = run(&stray, QueryArgs::None, RunOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("Query function 'anonymous' not registered"));

    // client side: the global runner now forwards to the connected instance
    let models = Arc::new(Models::new().model(Model::crud("message", author_is_me())).model(Model::crud(
        "member",
        Where::server_only("member", |eb, auth| auth.map(|a| eb.cmp("userId", a.id.as_str()).into())),
    )));
    let client = SyncClient::new(SyncClientOptions {
        schema: schema(),
        models,
        grouped_queries: grouped,
        config: config(RunMode::Test),
    });

    let err = run_query(client.queries().zql().table("message")?, RunOptions::default()).await.unwrap_err();
    assert!(matches!(err, GateError::Configuration { .. }));

    let replica_u1 = seeded_store();
    replica_u1.seed("member", vec![row(json!({"teamId": "t1", "userId": "u9"}))])?;
    client.connect(ClientInstance::new(Some(rowgate::AuthData::new("u1")), replica_u1.clone()));
    let res = run(&by_author, json!({"authorId": "u1"}).into(), RunOptions::default()).await?;
    assert_eq!(ids(&res), vec!["m1"]);
    // client.run scopes the identity for plain query functions
    let res = client.run(&mine, QueryArgs::None, RunOptions::default()).await?;
    assert_eq!(ids(&res), vec!["m1"]);

    assert_eq!(client.permission("message", Some("m1".into())).await?, PermissionState::Allowed);
    assert_eq!(client.permission("message", Some("m2".into())).await?, PermissionState::Denied);
    assert_eq!(client.permission("message", None).await?, PermissionState::Denied);

    // server-only clauses are not enforced on the client
    let member: Subject = json!({"teamId": "t1", "userId": "u9"}).into();
    assert_eq!(client.permission("member", Some(member)).await?, PermissionState::Allowed);

    // optimistic mutation skips the gate locally
    client.mutate("message.update", json!({"id": "m2", "text": "optimistic"})).await?;
    assert_eq!(find(&replica_u1.rows("message"), "m2").map(|r| r["text"].clone()), Some(json!("optimistic")));

    // re-login swaps the instance; the existing handle keeps working
    let replica_u2 = PartialReplica(MemoryStore::new(schema()));
    replica_u2.0.seed("message", vec![row(json!({"id": "m2", "authorId": "u2"}))])?;
    client.connect(ClientInstance::new(Some(rowgate::AuthData::new("u2")), Arc::new(replica_u2)));
    assert_eq!(client.auth_data().map(|a| a.id), Some("u2".to_string()));
    let res = client.run(&mine, QueryArgs::None, RunOptions::default()).await?;
    assert_eq!(ids(&res), vec!["m2"]);
    assert_eq!(res.status, ResultStatus::Unknown);
    assert_eq!(client.permission("message", Some("m2".into())).await?, PermissionState::Allowed);
    assert_eq!(client.permission("message", Some("m1".into())).await?, PermissionState::Loading);

    client.disconnect();
    assert!(client.mutators().is_err());
    Ok(())
}
