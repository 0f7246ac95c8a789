//! Models and their mutations.
//!
//! A model is either a bag of plain named mutations or, when declared with a table and
//! a predicate, a table model that also gets `insert`, `upsert`, `update` and `delete`.
//! Those four are always wrapped with an automatic permission check. A custom body with
//! one of those names replaces the row-store call but keeps the check.
//!
//! Check placement:
//! - `insert` checks after the body, so defaults applied by the insert are visible.
//! - `update`, `upsert` and `delete` check before the body, against the current row.
//!
//! The automatic check runs only in a server context and is skipped when the body has
//! already called `can` for the same table and primary key.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::context::{Environment, MutatorContext};
use crate::error::{GateError, GateResult};
use crate::permissions::Subject;
use crate::predicate::Where;
use crate::registry::PermissionRegistry;
use crate::storage::CrudAction;

pub type MutationFn = Arc<dyn Fn(Arc<MutatorContext>, Value) -> BoxFuture<'static, GateResult<()>> + Send + Sync>;

/// Box an async closure into a `MutationFn`.
pub fn mutation<F, Fut>(f: F) -> MutationFn
where
    F: Fn(Arc<MutatorContext>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GateResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, args| f(ctx, args).boxed())
}

#[derive(Clone)]
pub struct Model {
    name: String,
    permissions: Option<Where>,
    custom: BTreeMap<String, MutationFn>,
}

impl Model {
    /// Plain mutations only, no CRUD and no permissions.
    pub fn new<S: Into<String>>(name: S) -> Self { Self { name: name.into(), permissions: None, custom: BTreeMap::new() } }

    /// Table model with CRUD mutations guarded by `where_`.
    pub fn crud<S: Into<String>>(table: S, where_: Where) -> Self {
        let name = table.into();
        let permissions = Some(where_.with_table(name.clone()));
        Self { name, permissions, custom: BTreeMap::new() }
    }

    pub fn mutation<S: Into<String>>(mut self, name: S, f: MutationFn) -> Self {
        self.custom.insert(name.into(), f);
        self
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn permissions(&self) -> Option<&Where> { self.permissions.as_ref() }

    /// Final mutation map: custom mutations plus, for table models, the four wrapped CRUD ones.
    pub fn mutators(&self) -> BTreeMap<String, MutationFn> {
        let mut out = self.custom.clone();
        if let Some(where_) = &self.permissions {
            for action in CrudAction::ALL {
                let custom = self.custom.get(action.as_str()).cloned();
                out.insert(action.as_str().to_string(), crud_mutation(&self.name, where_.clone(), action, custom));
            }
        }
        out
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn crud_mutation(table: &str, where_: Where, action: CrudAction, custom: Option<MutationFn>) -> MutationFn {
    let table = table.to_string();
    Arc::new(move |ctx: Arc<MutatorContext>, args: Value| {
        let table = table.clone();
        let where_ = where_.clone();
        let custom = custom.clone();
        async move {
            let subject = Subject::from(args.clone());
            if action != CrudAction::Insert {
                automatic_check(&ctx, &table, &where_, &subject).await?;
            }
            match custom {
                Some(body) => body(ctx.clone(), args).await?,
                None => {
                    let row = match args {
                        Value::Object(row) => row,
                        other => return Err(GateError::invalid(format!("{}.{} expects a row, got {}", table, action.as_str(), other))),
                    };
                    ctx.tx.mutate(&table, action, row).await?;
                }
            }
            if action == CrudAction::Insert {
                automatic_check(&ctx, &table, &where_, &subject).await?;
            }
            Ok(())
        }
        .boxed()
    })
}

async fn automatic_check(ctx: &MutatorContext, table: &str, where_: &Where, subject: &Subject) -> GateResult<()> {
    if ctx.environment != Environment::Server {
        return Ok(());
    }
    // args without a full primary key (e.g. a body that generates the id) fall back to the table
    let checked = match ctx.did_run_permission_check_for(table, subject) {
        Ok(checked) => checked,
        Err(_) => ctx.did_run_permission_check_on(table),
    };
    if checked {
        debug!(target: "rowgate::permission", "{} already checked in this mutation", table);
        return Ok(());
    }
    ctx.can(where_, subject).await
}

/// All models of an application, keyed by model name.
///
/// Adding a table model registers its predicate so `permission.check` can find it.
#[derive(Debug)]
pub struct Models {
    models: BTreeMap<String, Model>,
    registry: Arc<PermissionRegistry>,
}

impl Default for Models {
    fn default() -> Self { Self::new() }
}

impl Models {
    pub fn new() -> Self { Self::with_registry(Arc::new(PermissionRegistry::new())) }

    pub fn with_registry(registry: Arc<PermissionRegistry>) -> Self { Self { models: BTreeMap::new(), registry } }

    pub fn model(mut self, model: Model) -> Self {
        if let Some(where_) = model.permissions() {
            self.registry.set(model.name(), where_.clone());
        }
        self.models.insert(model.name().to_string(), model);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Model> { self.models.get(name) }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Model)> { self.models.iter() }

    pub fn permission_registry(&self) -> &Arc<PermissionRegistry> { &self.registry }

    pub fn len(&self) -> usize { self.models.len() }

    pub fn is_empty(&self) -> bool { self.models.is_empty() }
}
