//!
//! rowgate storage seam
//! --------------------
//! The transaction handle is the only way mutation code and permission checks touch
//! rows. Real deployments put a database-backed implementation behind these traits;
//! `memory::MemoryStore` is the in-process implementation used by the demo binary,
//! the client cache stand-in and the test-suite.
//!
//! A transaction handle is owned by exactly one mutation. Once `commit` or `rollback`
//! has run, every further call fails with a `tx_closed` store error.

pub mod memory;

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::error::GateResult;
use crate::query::{Query, Row};

pub use memory::{MemoryStore, MemoryTransaction};

/// Row-level write operation. Also the set of auto-generated CRUD mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudAction {
    Insert,
    Upsert,
    Update,
    Delete,
}

impl CrudAction {
    pub const ALL: [CrudAction; 4] = [CrudAction::Insert, CrudAction::Upsert, CrudAction::Update, CrudAction::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrudAction::Insert => "insert",
            CrudAction::Upsert => "upsert",
            CrudAction::Update => "update",
            CrudAction::Delete => "delete",
        }
    }

    pub fn from_name(name: &str) -> Option<CrudAction> {
        CrudAction::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

pub trait Transaction: Send + Sync {
    /// Execute a read inside this transaction.
    fn run<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, GateResult<Vec<Row>>>;

    fn mutate<'a>(&'a self, table: &'a str, action: CrudAction, row: Row) -> BoxFuture<'a, GateResult<()>>;

    fn commit(&self) -> BoxFuture<'_, GateResult<()>>;

    fn rollback(&self) -> BoxFuture<'_, GateResult<()>>;
}

pub type SharedTransaction = Arc<dyn Transaction>;

pub trait Database: Send + Sync {
    fn begin(&self) -> BoxFuture<'_, GateResult<SharedTransaction>>;

    /// Read committed state outside any mutation. Defaults to a throwaway transaction;
    /// stores with snapshot reads should not make readers wait on writers.
    fn read<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, GateResult<Vec<Row>>> {
        async move {
            let tx = self.begin().await?;
            let out = tx.run(query).await;
            match &out {
                Ok(_) => tx.commit().await?,
                Err(_) => tx.rollback().await?,
            }
            out
        }
        .boxed()
    }
}
