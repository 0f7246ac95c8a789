//!
//! rowgate server
//! --------------
//! Authoritative side of the gate. `SyncServer` owns the database handle, the models
//! and the server-environment permission gate, and exposes:
//! - `handle_mutation_request`: run a push through freshly decorated mutators, then fire
//!   the post-commit async tasks without waiting for them.
//! - `handle_query_request`: resolve a synced query by name for one identity and run it.
//!   `permission.check` is answered here for every table with CRUD permissions.
//! - `transaction`, `mutate` and `query` for trusted server-side code.
//!
//! Creating a server installs its runner and synced queries for the global `run` helper.

pub mod push;

use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::GateConfig;
use crate::context::{try_current_context, AsyncTasks, Environment};
use crate::error::{GateError, GateResult};
use crate::identity::{with_request_context, AuthData, RequestContext, ADMIN_ROLE};
use crate::mutations::Models;
use crate::mutators::{create_mutators, Mutators, MutatorsOptions, ServerActionsFactory};
use crate::permissions::Permissions;
use crate::query::{Query, QueryBuilder, QueryResult, Row};
use crate::run::{set_custom_queries, set_runner, QueryRunner, RunOptions};
use crate::schema::Schema;
use crate::storage::{Database, SharedTransaction};
use crate::synced::{permission_check_query, PermissionCheckArgs, SyncedQueries, PERMISSION_CHECK};

pub use push::{MutationOutcome, MutationResult, PushMutation, PushProcessor, PushRequest, PushResponse, TransactionalPushProcessor};

pub struct SyncServerOptions {
    pub schema: Arc<Schema>,
    pub database: Arc<dyn Database>,
    pub models: Arc<Models>,
    pub queries: Option<Arc<SyncedQueries>>,
    pub create_server_actions: Option<ServerActionsFactory>,
    pub config: GateConfig,
    /// Defaults to `TransactionalPushProcessor` over `database`.
    pub processor: Option<Arc<dyn PushProcessor>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub name: String,
    pub rows: Vec<Row>,
}

pub struct MutationResponse {
    pub response: PushResponse,
    /// Post-commit tasks queued by this push. Empty unless `skip_async_tasks` was set.
    pub async_tasks: AsyncTasks,
}

struct Inner {
    zql: QueryBuilder,
    database: Arc<dyn Database>,
    models: Arc<Models>,
    queries: Option<Arc<SyncedQueries>>,
    create_server_actions: Option<ServerActionsFactory>,
    config: GateConfig,
    processor: Arc<dyn PushProcessor>,
    permissions: Arc<Permissions>,
}

#[derive(Clone)]
pub struct SyncServer {
    inner: Arc<Inner>,
}

impl SyncServer {
    pub fn new(opts: SyncServerOptions) -> Self {
        let permissions = Arc::new(
            Permissions::new(Environment::Server, opts.schema.clone()).with_diagnostics(opts.config.diagnostics()),
        );
        let processor = opts
            .processor
            .unwrap_or_else(|| Arc::new(TransactionalPushProcessor::new(opts.database.clone())));
        let server = Self {
            inner: Arc::new(Inner {
                zql: QueryBuilder::new(opts.schema),
                database: opts.database,
                models: opts.models,
                queries: opts.queries,
                create_server_actions: opts.create_server_actions,
                config: opts.config,
                processor,
                permissions,
            }),
        };
        if let Some(q) = &server.inner.queries {
            set_custom_queries(q.clone());
        }
        set_runner(Arc::new(ServerRunner { database: server.inner.database.clone() }));
        info!(
            target: "rowgate::push",
            "sync server ready: {} models, {} synced queries",
            server.inner.models.len(),
            server.inner.queries.as_ref().map(|q| q.names().len()).unwrap_or(0)
        );
        server
    }

    pub fn permissions(&self) -> &Arc<Permissions> { &self.inner.permissions }

    pub fn zql(&self) -> &QueryBuilder { &self.inner.zql }

    /// Server-environment mutators for one identity, queuing side effects into `async_tasks`.
    pub fn mutators(&self, auth_data: Option<AuthData>, async_tasks: AsyncTasks) -> Mutators {
        create_mutators(MutatorsOptions {
            models: self.inner.models.clone(),
            environment: Environment::Server,
            auth_data,
            permissions: self.inner.permissions.clone(),
            async_tasks,
            create_server_actions: self.inner.create_server_actions.clone(),
            config: self.inner.config.clone(),
        })
    }

    pub async fn handle_mutation_request(
        &self,
        auth_data: Option<AuthData>,
        request: PushRequest,
        skip_async_tasks: bool,
    ) -> GateResult<MutationResponse> {
        // mutations run inside a transaction, so side effects wait until after it
        let async_tasks = AsyncTasks::new();
        let mutators = self.mutators(auth_data, async_tasks.clone());
        let response = self.inner.processor.process(&mutators, request).await?;
        if !skip_async_tasks {
            async_tasks.spawn_all();
        }
        Ok(MutationResponse { response, async_tasks })
    }

    pub async fn handle_query_request(&self, auth_data: Option<AuthData>, request: QueryRequest) -> GateResult<QueryResponse> {
        let queries = self.inner.queries.clone().ok_or_else(|| {
            GateError::configuration(
                "No queries registered with SyncServer. Pass the synced queries registry via the queries option.",
            )
        })?;
        let scope = RequestContext::server(auth_data.clone());
        let name = request.name.clone();
        let rows = with_request_context(scope, async move {
            let query = if request.name == PERMISSION_CHECK {
                let args: PermissionCheckArgs = serde_json::from_value(request.args)?;
                permission_check_query(
                    &self.inner.permissions,
                    self.inner.models.permission_registry(),
                    &self.inner.zql,
                    auth_data.as_ref(),
                    &args,
                )?
            } else {
                queries.call(&request.name, &request.args)?
            };
            debug!(target: "rowgate::query", "query request {}", request.name);
            self.read(&query).await
        })
        .await?;
        Ok(QueryResponse { name, rows })
    }

    /// Run `f` in a transaction, reusing the active mutation's transaction when nested.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> GateResult<T>
    where
        F: FnOnce(SharedTransaction) -> Fut,
        Fut: Future<Output = GateResult<T>>,
    {
        if let Some(ctx) = try_current_context() {
            return f(ctx.tx.clone()).await;
        }
        let tx = self.inner.database.begin().await?;
        match f(tx.clone()).await {
            Ok(v) => {
                tx.commit().await?;
                Ok(v)
            }
            Err(e) => {
                error!(target: "rowgate::query", "Error running transaction(): {}", e);
                if let Err(rb) = tx.rollback().await {
                    error!(target: "rowgate::query", "rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    /// Trusted server-side mutation. Runs as admin unless `auth_data` says otherwise and
    /// waits for the queued async tasks before returning.
    pub async fn mutate<F, Fut>(&self, f: F, auth_data: Option<AuthData>) -> GateResult<()>
    where
        F: FnOnce(SharedTransaction, Mutators) -> Fut,
        Fut: Future<Output = GateResult<()>>,
    {
        let auth = match auth_data {
            Some(a) => AuthData {
                role: a.role.or_else(|| Some(ADMIN_ROLE.to_string())),
                email: a.email.or_else(|| AuthData::admin().email),
                ..a
            },
            None => AuthData::admin(),
        };
        let async_tasks = AsyncTasks::new();
        let mutators = self.mutators(Some(auth), async_tasks.clone());
        self.transaction(|tx| f(tx, mutators)).await?;
        let failures: Vec<String> = async_tasks.run_all().await.into_iter().filter_map(|r| r.err()).map(|e| e.to_string()).collect();
        if !failures.is_empty() {
            return Err(GateError::mutation(format!("async tasks failed: {}", failures.join("; "))));
        }
        Ok(())
    }

    /// Run a query built from the schema against committed state, or the active mutation.
    pub async fn query<F>(&self, f: F) -> GateResult<QueryResult>
    where
        F: FnOnce(&QueryBuilder) -> GateResult<Query>,
    {
        let query = f(&self.inner.zql)?;
        let rows = self.read(&query).await?;
        Ok(QueryResult::complete(rows))
    }

    /// Inside a mutation read through its transaction, otherwise read committed state.
    async fn read(&self, query: &Query) -> GateResult<Vec<Row>> {
        match try_current_context() {
            Some(ctx) => ctx.tx.run(query).await,
            None => self.inner.database.read(query).await,
        }
    }
}

/// Runner installed for `run::run` on the server.
struct ServerRunner {
    database: Arc<dyn Database>,
}

impl QueryRunner for ServerRunner {
    fn run(&self, query: Query, _options: RunOptions) -> BoxFuture<'static, GateResult<QueryResult>> {
        let ambient = try_current_context().map(|ctx| ctx.tx.clone());
        let database = self.database.clone();
        async move {
            let rows = match ambient {
                Some(tx) => tx.run(&query).await?,
                None => database.read(&query).await?,
            };
            Ok(QueryResult::complete(rows))
        }
        .boxed()
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("models", &self.inner.models.len())
            .field("queries", &self.inner.queries.as_ref().map(|q| q.names()))
            .field("config", &self.inner.config)
            .finish()
    }
}
