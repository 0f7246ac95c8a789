use std::future::Future;

use super::AuthData;
use crate::context::{self, Environment};
use crate::error::{GateError, GateResult};

/// Request-scoped state for code running outside a mutation, e.g. synced query handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub auth_data: Option<AuthData>,
    pub environment: Environment,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn server(auth_data: Option<AuthData>) -> Self {
        Self { auth_data, environment: Environment::Server, request_id: Some(uuid::Uuid::new_v4().to_string()) }
    }

    pub fn client(auth_data: Option<AuthData>) -> Self {
        Self { auth_data, environment: Environment::Client, request_id: None }
    }
}

impl Default for RequestContext {
    fn default() -> Self { Self { auth_data: None, environment: Environment::Server, request_id: None } }
}

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` visible to every nested call on the same task.
pub async fn with_request_context<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
    REQUEST_CONTEXT.scope(ctx, fut).await
}

pub fn current_request() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|c| c.clone()).ok()
}

pub fn request_auth_data() -> Option<AuthData> {
    REQUEST_CONTEXT.try_with(|c| c.auth_data.clone()).ok().flatten()
}

/// Identity of whoever is running right now: the active mutation wins over the request scope.
pub fn query_or_mutator_auth_data() -> Option<AuthData> {
    if let Some(ctx) = context::try_current_context() {
        return ctx.auth_data.clone();
    }
    request_auth_data()
}

/// Environment of the active mutation or request. Outside any scope this is `Server`
/// so server-only predicate clauses stay enforced.
pub fn current_environment() -> Environment {
    if let Some(ctx) = context::try_current_context() {
        return ctx.environment;
    }
    REQUEST_CONTEXT.try_with(|c| c.environment).unwrap_or(Environment::Server)
}

pub fn ensure_logged_in() -> GateResult<AuthData> {
    let ctx = context::current_context()?;
    ctx.auth_data.clone().ok_or(GateError::NotLoggedIn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_scope_is_visible_across_awaits() {
        let ctx = RequestContext::server(Some(AuthData::new("u1")));
        let seen = with_request_context(ctx, async {
            tokio::task::yield_now().await;
            query_or_mutator_auth_data().map(|a| a.id)
        })
        .await;
        assert_eq!(seen.as_deref(), Some("u1"));
        assert!(request_auth_data().is_none());
    }

    #[tokio::test]
    async fn environment_defaults_to_server_outside_scope() {
        assert_eq!(current_environment(), Environment::Server);
        let env = with_request_context(RequestContext::client(None), async { current_environment() }).await;
        assert_eq!(env, Environment::Client);
    }

    #[tokio::test]
    async fn ensure_logged_in_requires_mutation() {
        assert_eq!(ensure_logged_in(), Err(GateError::NotInMutator));
    }
}
