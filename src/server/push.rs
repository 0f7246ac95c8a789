//! Push processing: applying a client's queued mutations.
//!
//! Mutations of one push are applied strictly in submission order, each in its own
//! transaction. A failure rolls back that mutation only and is reported in its slot of
//! the response; later mutations still run.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{GateError, GateResult};
use crate::mutators::Mutators;
use crate::storage::Database;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMutation {
    pub id: u64,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "clientGroupID")]
    pub client_group_id: String,
    pub mutations: Vec<PushMutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum MutationOutcome {
    Ok,
    Error { error: GateError },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    pub id: u64,
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub result: MutationOutcome,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PushResponse {
    pub mutations: Vec<MutationResult>,
}

impl PushResponse {
    pub fn errors(&self) -> impl Iterator<Item = (&MutationResult, &GateError)> {
        self.mutations.iter().filter_map(|m| match &m.result {
            MutationOutcome::Error { error } => Some((m, error)),
            MutationOutcome::Ok => None,
        })
    }

    pub fn all_ok(&self) -> bool { self.errors().next().is_none() }
}

pub trait PushProcessor: Send + Sync {
    fn process<'a>(&'a self, mutators: &'a Mutators, request: PushRequest) -> BoxFuture<'a, GateResult<PushResponse>>;
}

pub struct TransactionalPushProcessor {
    db: Arc<dyn Database>,
}

impl TransactionalPushProcessor {
    pub fn new(db: Arc<dyn Database>) -> Self { Self { db } }
}

impl PushProcessor for TransactionalPushProcessor {
    fn process<'a>(&'a self, mutators: &'a Mutators, request: PushRequest) -> BoxFuture<'a, GateResult<PushResponse>> {
        async move {
            let mut out = PushResponse::default();
            for m in request.mutations {
                let tx = self.db.begin().await?;
                let result = match mutators.call(&m.name, tx.clone(), m.args).await {
                    Ok(()) => match tx.commit().await {
                        Ok(()) => MutationOutcome::Ok,
                        Err(e) => MutationOutcome::Error { error: e },
                    },
                    Err(e) => {
                        if let Err(rb) = tx.rollback().await {
                            warn!(target: "rowgate::push", "rollback of {} failed: {}", m.name, rb);
                        }
                        error!(target: "rowgate::push", "{} #{} from {} failed: {}", m.name, m.id, m.client_id, e);
                        MutationOutcome::Error { error: e }
                    }
                };
                debug!(target: "rowgate::push", "{} #{} -> {:?}", m.name, m.id, result);
                out.mutations.push(MutationResult { id: m.id, client_id: m.client_id, result });
            }
            Ok(out)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let req: PushRequest = serde_json::from_value(serde_json::json!({
            "clientGroupID": "g1",
            "mutations": [{"id": 1, "clientID": "c1", "name": "message.update", "args": {"id": "m1"}}]
        }))
        .unwrap();
        assert_eq!(req.mutations[0].name, "message.update");

        let resp = PushResponse {
            mutations: vec![MutationResult {
                id: 1,
                client_id: "c1".into(),
                result: MutationOutcome::Error { error: GateError::NotLoggedIn },
            }],
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["mutations"][0]["result"]["status"], "error");
        assert_eq!(v["mutations"][0]["result"]["error"]["type"], "not_logged_in");
        assert!(!resp.all_ok());
    }
}
