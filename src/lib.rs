pub mod error;
pub mod config;
pub mod identity;
pub mod schema;
pub mod query;
pub mod storage;
pub mod context;
pub mod predicate;
pub mod permissions;
pub mod registry;
pub mod synced;
pub mod run;
pub mod batch;
pub mod mutations;
pub mod mutators;
pub mod server;
pub mod client;

pub use context::{current_context, is_in_mutation, run_with_context, Environment, MutatorContext};
pub use error::{GateError, GateResult};
pub use identity::AuthData;
pub use mutations::{mutation, Model, Models};
pub use permissions::{Permissions, Subject};
pub use predicate::{Permit, Where};
