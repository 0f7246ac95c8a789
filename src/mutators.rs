//! Mutator decoration pipeline.
//!
//! Each model mutation is wrapped, innermost first, with context injection, a timeout
//! race and development logging, then exposed under `model.name`.
//!
//! The timeout stops waiting, it does not cancel: the mutation keeps running on its
//! own task and may still touch its transaction until that transaction is settled by
//! the caller. Storage side effects of a timed out mutation must be safe to repeat.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::GateConfig;
use crate::context::{run_with_context, AsyncTasks, Environment, MutatorContext, ServerActions, ServerContext};
use crate::error::{GateError, GateResult};
use crate::identity::AuthData;
use crate::mutations::{Models, MutationFn};
use crate::permissions::Permissions;
use crate::storage::SharedTransaction;

pub type DecoratedMutator = Arc<dyn Fn(SharedTransaction, Value) -> BoxFuture<'static, GateResult<()>> + Send + Sync>;

pub type ServerActionsFactory = Arc<dyn Fn() -> ServerActions + Send + Sync>;

pub struct MutatorsOptions {
    pub models: Arc<Models>,
    pub environment: Environment,
    pub auth_data: Option<AuthData>,
    pub permissions: Arc<Permissions>,
    pub async_tasks: AsyncTasks,
    pub create_server_actions: Option<ServerActionsFactory>,
    pub config: GateConfig,
}

/// Decorated mutators keyed by `model.name`.
#[derive(Clone, Default)]
pub struct Mutators {
    inner: BTreeMap<String, DecoratedMutator>,
}

impl Mutators {
    pub fn get(&self, name: &str) -> Option<&DecoratedMutator> { self.inner.get(name) }

    pub fn names(&self) -> Vec<&str> { self.inner.keys().map(|k| k.as_str()).collect() }

    pub fn len(&self) -> usize { self.inner.len() }

    pub fn is_empty(&self) -> bool { self.inner.is_empty() }

    pub async fn call(&self, name: &str, tx: SharedTransaction, args: Value) -> GateResult<()> {
        let m = self.get(name).ok_or_else(|| GateError::invalid(format!("unknown mutator {}", name)))?;
        m(tx, args).await
    }
}

impl std::fmt::Debug for Mutators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_list().entries(self.inner.keys()).finish() }
}

pub fn create_mutators(opts: MutatorsOptions) -> Mutators {
    let server = match opts.environment {
        Environment::Server => {
            let actions = opts.create_server_actions.as_ref().map(|f| f()).unwrap_or_else(|| Arc::new(()));
            Some(ServerContext { actions, async_tasks: opts.async_tasks.clone() })
        }
        Environment::Client => None,
    };
    let scope = Arc::new(Scope { environment: opts.environment, auth_data: opts.auth_data, permissions: opts.permissions, server });
    let timeout = opts.config.mutation_timeout();

    let mut inner = BTreeMap::new();
    for (model_name, model) in opts.models.iter() {
        for (name, f) in model.mutators() {
            let full = format!("{}.{}", model_name, name);
            let m = with_context(scope.clone(), f);
            let m = with_timeout_guard(full.clone(), timeout, m);
            let m = if opts.config.development_logging { with_development_logging(full.clone(), m) } else { m };
            inner.insert(full, m);
        }
    }
    Mutators { inner }
}

// shared by every mutator of one set; each call gets its own MutatorContext from it
struct Scope {
    environment: Environment,
    auth_data: Option<AuthData>,
    permissions: Arc<Permissions>,
    server: Option<ServerContext>,
}

fn with_context(scope: Arc<Scope>, f: MutationFn) -> DecoratedMutator {
    Arc::new(move |tx, args| {
        let ctx = Arc::new(MutatorContext::new(
            tx,
            scope.auth_data.clone(),
            scope.environment,
            scope.permissions.clone(),
            scope.server.clone(),
        ));
        let fut = f(ctx.clone(), args);
        run_with_context(ctx, fut).boxed()
    })
}

fn with_timeout_guard(name: String, timeout: Duration, f: DecoratedMutator) -> DecoratedMutator {
    Arc::new(move |tx, args| {
        let name = name.clone();
        let handle = tokio::spawn(f(tx, args));
        async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(GateError::mutation(format!("[mutator] {} aborted: {}", name, join))),
                Err(_) => Err(GateError::MutationTimeout { name, timeout_ms: timeout.as_millis() as u64 }),
            }
        }
        .boxed()
    })
}

fn with_development_logging(name: String, f: DecoratedMutator) -> DecoratedMutator {
    Arc::new(move |tx, args| {
        let name = name.clone();
        let shown = args.clone();
        let fut = f(tx, args);
        async move {
            let start = Instant::now();
            info!(target: "rowgate::mutator", "[mutator] {} start", name);
            let result = fut.await;
            let ms = start.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(()) => {
                    info!(target: "rowgate::mutator", "[mutator] {} completed in {:.2}ms", name, ms);
                    debug!(target: "rowgate::mutator", "[mutator] {} args {}", name, shown);
                }
                Err(e) => {
                    let pretty = serde_json::to_string_pretty(&shown).unwrap_or_else(|_| shown.to_string());
                    error!(
                        target: "rowgate::mutator",
                        "[mutator] {} failed after {:.2}ms\nerror: {}\narguments: {}\nstack trace:\n{}",
                        name,
                        ms,
                        e,
                        pretty,
                        std::backtrace::Backtrace::force_capture()
                    );
                }
            }
            result
        }
        .boxed()
    })
}
