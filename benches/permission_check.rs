use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use serde_json::json;

use rowgate::config::{GateConfig, RunMode};
use rowgate::context::Environment;
use rowgate::query::Row;
use rowgate::schema::{ColumnType, Schema, TableSchema};
use rowgate::server::{PushMutation, PushRequest, SyncServer, SyncServerOptions};
use rowgate::storage::MemoryStore;
use rowgate::{AuthData, Model, Models, Permissions, Subject, Where};

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new().table(
        TableSchema::new("message")
            .column("id", ColumnType::String)
            .column("authorId", ColumnType::String)
            .optional_column("text", ColumnType::String)
            .primary_key(["id"]),
    ))
}

fn store_with(n: usize) -> Arc<MemoryStore> {
    let store = MemoryStore::new(schema());
    let rows: Vec<Row> = (0..n)
        .map(|i| {
            let v = json!({"id": format!("m{:06}", i), "authorId": format!("u{}", i % 16), "text": "x"});
            v.as_object().cloned().unwrap_or_default()
        })
        .collect();
    store.seed("message", rows).expect("seed");
    Arc::new(store)
}

fn author_is_me() -> Where {
    Where::table("message", |eb, auth| auth.map(|a| eb.cmp("authorId", a.id.as_str()).into()))
}

fn bench_permission(c: &mut Criterion) {
    let ns = [1_000usize, 10_000usize];
    let mut group = c.benchmark_group("permission_check");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    let gate = Permissions::new(Environment::Server, schema());
    let auth = AuthData::new("u3");
    let where_ = author_is_me();

    // Compile only
    group.bench_function("compile_existence_query", |b| {
        let subject: Subject = "m000003".into();
        b.iter(|| {
            let q = gate.existence_query(Some(&auth), &where_, &subject, None).expect("compile");
            criterion::black_box(q);
        });
    });

    for &n in &ns {
        let store = store_with(n);

        // Compile + execute against committed state
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("existence_query_execute", n), &n, |b, &n| {
            let subject: Subject = format!("m{:06}", n / 2).into();
            b.iter(|| {
                let q = gate.existence_query(Some(&auth), &where_, &subject, None).expect("compile");
                criterion::black_box(store.execute(&q).expect("execute"));
            });
        });

        // Full push of 16 updates, half of them denied
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
        let mut cfg = GateConfig::for_mode(RunMode::Production);
        cfg.development_logging = false;
        let server = SyncServer::new(SyncServerOptions {
            schema: schema(),
            database: store.clone(),
            models: Arc::new(Models::new().model(Model::crud("message", author_is_me()))),
            queries: None,
            create_server_actions: None,
            config: cfg,
            processor: None,
        });
        group.throughput(Throughput::Elements(16));
        group.bench_with_input(BenchmarkId::new("push_16_updates", n), &n, |b, _| {
            b.iter(|| {
                let mutations = (0..16u64)
                    .map(|i| PushMutation {
                        id: i + 1,
                        client_id: "bench".into(),
                        name: "message.update".into(),
                        // u3 owns rows 3, 19, 35, ...; odd i lands on u11's rows
                        args: json!({"id": format!("m{:06}", 3 + i * 8), "text": format!("edit {}", i)}),
                    })
                    .collect();
                let req = PushRequest { client_group_id: "bench".into(), mutations };
                let out = rt.block_on(server.handle_mutation_request(Some(AuthData::new("u3")), req, true));
                criterion::black_box(out.map(|o| o.response.mutations.len()).unwrap_or(0));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_permission);
criterion_main!(benches);
