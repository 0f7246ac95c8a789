//! Unified error model for the permission gate, the mutator pipeline and the query layer.
//! Every failure surfaced to a caller is one of these variants, so push responses and
//! telemetry can tell "forbidden" apart from "broken" and from "too slow".

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateError {
    /// Missing table association, schema, registered predicate or query name.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The predicate was evaluated and no row satisfied it.
    #[error("[permission] Not Allowed: {subject}{}", render_query(.query))]
    AuthorizationDenied { subject: String, query: Option<String> },

    /// The existence query itself faulted.
    #[error("Error running permission {subject}\n{message}")]
    AuthorizationCheckFailed { subject: String, message: String },

    #[error("[mutator] {name} timeout after {timeout_ms}ms")]
    MutationTimeout { name: String, timeout_ms: u64 },

    #[error("mutatorContext must be called within a mutator")]
    NotInMutator,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("store error ({code}): {message}")]
    Store { code: String, message: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Business failure raised by a mutation body.
    #[error("{message}")]
    Mutation { message: String },
}

fn render_query(query: &Option<String>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("\n {}", q),
        _ => String::new(),
    }
}

impl GateError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self { GateError::Configuration { message: msg.into() } }
    pub fn store<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { GateError::Store { code: code.into(), message: msg.into() } }
    pub fn invalid<S: Into<String>>(msg: S) -> Self { GateError::InvalidArgument { message: msg.into() } }
    pub fn mutation<S: Into<String>>(msg: S) -> Self { GateError::Mutation { message: msg.into() } }

    pub fn code_str(&self) -> &str {
        match self {
            GateError::Configuration { .. } => "configuration",
            GateError::AuthorizationDenied { .. } => "authorization_denied",
            GateError::AuthorizationCheckFailed { .. } => "authorization_check_failed",
            GateError::MutationTimeout { .. } => "mutation_timeout",
            GateError::NotInMutator => "not_in_mutator",
            GateError::NotLoggedIn => "not_logged_in",
            GateError::Store { code, .. } => code.as_str(),
            GateError::InvalidArgument { .. } => "invalid_argument",
            GateError::Mutation { .. } => "mutation_error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            GateError::Configuration { .. } => 500,
            GateError::AuthorizationDenied { .. } => 403,
            GateError::AuthorizationCheckFailed { .. } => 500,
            GateError::MutationTimeout { .. } => 504,
            GateError::NotInMutator => 500,
            GateError::NotLoggedIn => 401,
            GateError::Store { .. } => 503,
            GateError::InvalidArgument { .. } => 400,
            GateError::Mutation { .. } => 422,
        }
    }

    pub fn is_denied(&self) -> bool { matches!(self, GateError::AuthorizationDenied { .. }) }
    pub fn is_timeout(&self) -> bool { matches!(self, GateError::MutationTimeout { .. }) }
}

pub type GateResult<T> = Result<T, GateError>;

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: a mutation body failed for its own reasons
        GateError::Mutation { message: err.to_string() }
    }
}

impl From<serde_json::Error> for GateError {
    fn from(err: serde_json::Error) -> Self {
        GateError::InvalidArgument { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(GateError::configuration("x").http_status(), 500);
        assert_eq!(GateError::AuthorizationDenied { subject: "s".into(), query: None }.http_status(), 403);
        assert_eq!(GateError::MutationTimeout { name: "m".into(), timeout_ms: 1 }.http_status(), 504);
        assert_eq!(GateError::NotLoggedIn.http_status(), 401);
        assert_eq!(GateError::store("io", "down").http_status(), 503);
        assert_eq!(GateError::invalid("bad").http_status(), 400);
        assert_eq!(GateError::mutation("nope").http_status(), 422);
    }

    #[test]
    fn denied_message_embeds_query_only_when_present() {
        let plain = GateError::AuthorizationDenied { subject: "message with auth id: u1".into(), query: None };
        assert_eq!(plain.to_string(), "[permission] Not Allowed: message with auth id: u1");

        let diag = GateError::AuthorizationDenied {
            subject: "message with auth id: u1".into(),
            query: Some("message.where(authorId, u1)".into()),
        };
        assert!(diag.to_string().ends_with("\n message.where(authorId, u1)"));
    }

    #[test]
    fn denial_and_failure_have_distinct_codes() {
        let denied = GateError::AuthorizationDenied { subject: "t".into(), query: None };
        let failed = GateError::AuthorizationCheckFailed { subject: "t".into(), message: "io".into() };
        assert_ne!(denied.code_str(), failed.code_str());
        assert!(denied.is_denied());
        assert!(!failed.is_denied());
    }

    #[test]
    fn anyhow_maps_to_mutation() {
        let e: GateError = anyhow::anyhow!("boom").into();
        assert_eq!(e, GateError::mutation("boom"));
    }
}
