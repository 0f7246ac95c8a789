//! Process-local side tables.
//!
//! `query_names` maps query functions to their stable `namespace.name`; `table_permissions`
//! maps table names to the predicate their CRUD mutations were declared with.

pub mod query_names;
pub mod table_permissions;

pub use query_names::{global_query_names, QueryNameRegistry};
pub use table_permissions::PermissionRegistry;
