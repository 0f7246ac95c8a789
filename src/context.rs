//! Ambient mutator context.
//!
//! Every mutation runs inside `run_with_context`, which binds an `Arc<MutatorContext>`
//! to the current tokio task. Nested calls read it back with `current_context()` no
//! matter how many awaits sit in between, and two mutations on different tasks never
//! see each other's context. Work handed to `tokio::spawn` leaves the scope and must
//! be passed the context explicitly.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{GateError, GateResult};
use crate::identity::AuthData;
use crate::permissions::{Permissions, Subject};
use crate::predicate::Where;
use crate::storage::SharedTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Client,
    Server,
}

/// Post-commit side effect. Failures are logged and never fail the mutation.
pub type AsyncAction = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Bag of side effects collected during a push and run after the transaction commits.
#[derive(Clone, Default)]
pub struct AsyncTasks {
    inner: Arc<Mutex<Vec<AsyncAction>>>,
}

impl AsyncTasks {
    pub fn new() -> Self { Self::default() }

    pub fn push<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.lock().push(Box::new(move || f().boxed()));
    }

    pub fn len(&self) -> usize { self.inner.lock().len() }

    pub fn is_empty(&self) -> bool { self.inner.lock().is_empty() }

    fn take(&self) -> Vec<AsyncAction> { std::mem::take(&mut *self.inner.lock()) }

    /// Run every queued task concurrently and wait for all of them.
    pub async fn run_all(&self) -> Vec<anyhow::Result<()>> {
        let tasks = self.take();
        join_all(tasks.into_iter().map(|t| t())).await
    }

    /// Fire-and-forget variant used after a push response is produced.
    pub fn spawn_all(&self) -> Option<tokio::task::JoinHandle<()>> {
        let tasks = self.take();
        if tasks.is_empty() {
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        info!(target: "rowgate::push", "complete, running async tasks {} id {}", tasks.len(), id);
        Some(tokio::spawn(async move {
            let results = join_all(tasks.into_iter().map(|t| t())).await;
            let failed: Vec<String> = results.into_iter().filter_map(|r| r.err()).map(|e| e.to_string()).collect();
            if failed.is_empty() {
                info!(target: "rowgate::push", "async tasks complete {}", id);
            } else {
                error!(target: "rowgate::push", "error: async tasks failed id {}: {:?}", id, failed);
            }
        }))
    }
}

pub type ServerActions = Arc<dyn Any + Send + Sync>;

/// Server-only part of the context.
#[derive(Clone)]
pub struct ServerContext {
    pub actions: ServerActions,
    pub async_tasks: AsyncTasks,
}

impl ServerContext {
    pub fn actions<T: 'static>(&self) -> Option<&T> { self.actions.downcast_ref::<T>() }

    /// Queue work to run once the surrounding transaction has committed.
    pub fn after_commit<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.async_tasks.push(f);
    }
}

/// Per-invocation context. Created fresh for each mutation call and dropped when it settles.
pub struct MutatorContext {
    pub tx: SharedTransaction,
    pub auth_data: Option<AuthData>,
    pub environment: Environment,
    pub server: Option<ServerContext>,
    gate: Arc<Permissions>,
    // table + primary key of every subject the gate has already passed
    checked: Mutex<HashSet<String>>,
}

impl MutatorContext {
    pub fn new(
        tx: SharedTransaction,
        auth_data: Option<AuthData>,
        environment: Environment,
        gate: Arc<Permissions>,
        server: Option<ServerContext>,
    ) -> Self {
        Self { tx, auth_data, environment, server, gate, checked: Mutex::new(HashSet::new()) }
    }

    /// Authorization checkpoint for mutation code. See `Permissions::can`.
    pub async fn can<S: Into<Subject>>(&self, where_: &Where, subject: S) -> GateResult<()> {
        self.gate.can_in(self, where_, &subject.into()).await
    }

    pub fn permissions(&self) -> &Arc<Permissions> { &self.gate }

    pub fn server(&self) -> Option<&ServerContext> { self.server.as_ref() }

    /// True once any permission check passed in this mutation.
    pub fn did_run_permission_check(&self) -> bool { !self.checked.lock().is_empty() }

    pub fn did_run_permission_check_for(&self, table: &str, subject: &Subject) -> GateResult<bool> {
        let key = self.gate.subject_key(table, subject)?;
        Ok(self.checked.lock().contains(&key))
    }

    /// True once a check passed for any subject of `table`.
    pub fn did_run_permission_check_on(&self, table: &str) -> bool {
        let prefix = format!("{}:", table);
        self.checked.lock().iter().any(|k| k.starts_with(&prefix))
    }

    pub(crate) fn mark_permission_checked(&self, key: String) { self.checked.lock().insert(key); }
}

impl fmt::Debug for MutatorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutatorContext")
            .field("auth_data", &self.auth_data)
            .field("environment", &self.environment)
            .field("server", &self.server.is_some())
            .field("checked", &self.checked.lock().len())
            .finish()
    }
}

tokio::task_local! {
    static MUTATOR_CONTEXT: Arc<MutatorContext>;
}

pub async fn run_with_context<F: Future>(ctx: Arc<MutatorContext>, fut: F) -> F::Output {
    MUTATOR_CONTEXT.scope(ctx, fut).await
}

pub fn current_context() -> GateResult<Arc<MutatorContext>> {
    MUTATOR_CONTEXT.try_with(|c| c.clone()).map_err(|_| GateError::NotInMutator)
}

pub fn try_current_context() -> Option<Arc<MutatorContext>> { MUTATOR_CONTEXT.try_with(|c| c.clone()).ok() }

pub fn is_in_mutation() -> bool { MUTATOR_CONTEXT.try_with(|_| ()).is_ok() }
