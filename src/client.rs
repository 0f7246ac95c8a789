//! Client side of the gate.
//!
//! `SyncClient` is built once per application. The backing instance (identity plus local
//! replica) lives in a swappable slot, so a re-login replaces it without invalidating any
//! `SyncClient` handle held elsewhere. Client mutations run optimistically: `can` is a
//! no-op here and the server re-validates the push.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::GateConfig;
use crate::context::{AsyncTasks, Environment};
use crate::error::{GateError, GateResult};
use crate::identity::{with_request_context, AuthData, RequestContext};
use crate::mutations::Models;
use crate::mutators::{create_mutators, Mutators, MutatorsOptions};
use crate::permissions::{Permissions, Subject};
use crate::query::pretty::{pretty_format_query, PrettyMode};
use crate::query::{Query, QueryResult, ResultStatus};
use crate::run::{set_custom_queries, set_runner, QueryArgs, QueryRunner, RunOptions};
use crate::schema::Schema;
use crate::storage::Database;
use crate::synced::{permission_check_query, resolve_query, GroupedQueries, PermissionCheckArgs, QueryFn, SyncedQueries};

/// One logged-in (or anonymous) session: identity plus local replica.
pub struct ClientInstance {
    auth_data: Option<AuthData>,
    runner: Arc<dyn QueryRunner>,
    database: Arc<dyn Database>,
}

impl ClientInstance {
    pub fn new<S>(auth_data: Option<AuthData>, store: Arc<S>) -> Self
    where
        S: QueryRunner + Database + 'static,
    {
        Self { auth_data, runner: store.clone(), database: store }
    }

    pub fn auth_data(&self) -> Option<&AuthData> { self.auth_data.as_ref() }
}

/// Reactive permission answer. `Loading` means only local, possibly stale data was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Loading,
    Allowed,
    Denied,
}

impl PermissionState {
    pub fn is_allowed(&self) -> bool { *self == PermissionState::Allowed }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error { reason: Option<String> },
    NeedsAuth { reason: Option<String> },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error { .. } => "error",
            ConnectionState::NeedsAuth { .. } => "needs-auth",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    Error { message: String },
}

/// Turns connection state changes into `SyncEvent`s. Only transitions emit.
pub struct ConnectionMonitor {
    last: Mutex<&'static str>,
    events: broadcast::Sender<SyncEvent>,
}

impl ConnectionMonitor {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { last: Mutex::new(ConnectionState::Connecting.name()), events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> { self.events.subscribe() }

    pub fn observe(&self, state: &ConnectionState) -> Option<SyncEvent> {
        let name = state.name();
        {
            let mut last = self.last.lock();
            if *last == name {
                return None;
            }
            *last = name;
        }
        let reason = match state {
            ConnectionState::Error { reason } | ConnectionState::NeedsAuth { reason } => reason.clone(),
            _ => return None,
        };
        let event = SyncEvent::Error { message: reason.unwrap_or_else(|| name.to_string()) };
        warn!(target: "rowgate::client", "connection {}: {:?}", name, event);
        // no subscribers is fine
        let _ = self.events.send(event.clone());
        Some(event)
    }
}

pub struct SyncClientOptions {
    pub schema: Arc<Schema>,
    pub models: Arc<Models>,
    pub grouped_queries: GroupedQueries,
    pub config: GateConfig,
}

type Slot = Arc<RwLock<Option<Arc<ClientInstance>>>>;

pub struct SyncClient {
    models: Arc<Models>,
    queries: Arc<SyncedQueries>,
    permissions: Arc<Permissions>,
    slot: Slot,
    monitor: ConnectionMonitor,
    config: GateConfig,
}

impl SyncClient {
    /// Registers the grouped queries and installs this client as the global runner.
    pub fn new(opts: SyncClientOptions) -> Self {
        let queries = Arc::new(SyncedQueries::from_groups(opts.schema.clone(), opts.grouped_queries));
        set_custom_queries(queries.clone());
        let slot: Slot = Arc::new(RwLock::new(None));
        set_runner(Arc::new(ClientRunner { slot: slot.clone() }));
        Self {
            models: opts.models,
            queries,
            permissions: Arc::new(Permissions::new(Environment::Client, opts.schema)),
            slot,
            monitor: ConnectionMonitor::new(16),
            config: opts.config,
        }
    }

    /// Swap the backing instance, e.g. after login. Existing handles keep working.
    pub fn connect(&self, instance: ClientInstance) {
        info!(
            target: "rowgate::client",
            "client instance for {}",
            instance.auth_data.as_ref().map(|a| a.id.as_str()).unwrap_or("anonymous")
        );
        *self.slot.write() = Some(Arc::new(instance));
    }

    pub fn disconnect(&self) { *self.slot.write() = None; }

    pub fn instance(&self) -> GateResult<Arc<ClientInstance>> { current_instance(&self.slot) }

    pub fn auth_data(&self) -> Option<AuthData> { self.instance().ok().and_then(|i| i.auth_data.clone()) }

    pub fn queries(&self) -> &Arc<SyncedQueries> { &self.queries }

    /// Client-environment mutators for the current identity.
    pub fn mutators(&self) -> GateResult<Mutators> {
        let instance = self.instance()?;
        Ok(create_mutators(MutatorsOptions {
            models: self.models.clone(),
            environment: Environment::Client,
            auth_data: instance.auth_data.clone(),
            permissions: self.permissions.clone(),
            async_tasks: AsyncTasks::new(),
            create_server_actions: None,
            config: self.config.clone(),
        }))
    }

    /// Apply a mutation optimistically to the local replica.
    pub async fn mutate(&self, name: &str, args: Value) -> GateResult<()> {
        let mutators = self.mutators()?;
        let instance = self.instance()?;
        let tx = instance.database.begin().await?;
        match mutators.call(name, tx.clone(), args).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// Resolve and run a registered query function against the local replica.
    pub async fn run(&self, f: &QueryFn, args: QueryArgs, options: RunOptions) -> GateResult<QueryResult> {
        let instance = self.instance()?;
        let scope = RequestContext::client(instance.auth_data.clone());
        with_request_context(scope, async {
            // plain query functions may read the ambient identity
            let query = resolve_query(&self.queries, f, &args)?;
            instance.runner.run(query, options).await
        })
        .await
    }

    /// The `permission.check` query for `table` and `subject` as this client would run it.
    pub fn permission_query(&self, table: &str, subject: Option<Subject>) -> GateResult<Query> {
        let args = PermissionCheckArgs { table: table.to_string(), obj_or_id: subject };
        permission_check_query(
            &self.permissions,
            self.models.permission_registry(),
            self.queries.zql(),
            self.auth_data().as_ref(),
            &args,
        )
    }

    /// Tri-state permission for UI. A missing subject is always `Denied`.
    pub async fn permission(&self, table: &str, subject: Option<Subject>) -> GateResult<PermissionState> {
        if subject.is_none() {
            return Ok(PermissionState::Denied);
        }
        let instance = self.instance()?;
        let query = self.permission_query(table, subject)?;
        debug!(target: "rowgate::client", "permission {}", pretty_format_query(&query, PrettyMode::Minimal));
        let result = instance.runner.run(query, RunOptions::default()).await?;
        Ok(match (result.is_empty(), result.status) {
            (false, _) => PermissionState::Allowed,
            (true, ResultStatus::Complete) => PermissionState::Denied,
            (true, ResultStatus::Unknown) => PermissionState::Loading,
        })
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> { self.monitor.subscribe() }

    pub fn connection_changed(&self, state: &ConnectionState) -> Option<SyncEvent> { self.monitor.observe(state) }
}

fn current_instance(slot: &Slot) -> GateResult<Arc<ClientInstance>> {
    slot.read().clone().ok_or_else(|| {
        GateError::configuration("Sync client instance not initialized. Call SyncClient::connect before using it.")
    })
}

/// Forwards the global `run` helper to whatever instance is in the slot at call time.
struct ClientRunner {
    slot: Slot,
}

impl QueryRunner for ClientRunner {
    fn run(&self, query: Query, options: RunOptions) -> BoxFuture<'static, GateResult<QueryResult>> {
        match current_instance(&self.slot) {
            Ok(instance) => instance.runner.run(query, options),
            Err(e) => async move { Err(e) }.boxed(),
        }
    }
}
