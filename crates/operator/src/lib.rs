//! Trigsync operator: keeps the triggers owned by a function in line with its desired set.
//!
//! `apply` first removes orphans (triggers bound to the function that are no longer desired),
//! then creates or updates every desired trigger in order, optionally waiting until each is
//! observed on a watch. `delete` removes the desired triggers. Both are fail-fast: the first
//! error ends the pass and leaves whatever was already done in place.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};
use trigsync_core::{merge_map, object_name, FunctionRef};
use trigsync_kubehub::{DeletionPropagation, TriggerClient};

mod callbacks;
mod context;
mod error;
mod predicate;
mod wait;

pub use callbacks::{Callback, Callbacks, Subject};
pub use context::{Context, ContextError};
pub use error::{Error, Result};
pub use predicate::{build_orphan_predicate, Predicate};
pub use wait::wait_for;

/// Options shared by apply and delete.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Block after each apply until the trigger is observed on a watch.
    pub wait_for_apply: bool,
    pub callbacks: Callbacks,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Attached verbatim to every applied trigger.
    pub owner_references: Vec<OwnerReference>,
    pub options: Options,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub deletion_propagation: DeletionPropagation,
    pub options: Options,
}

/// Reconciles one function's triggers for a single pass. Not meant to be shared between
/// concurrent passes for the same function.
pub struct TriggersOperator {
    client: Arc<dyn TriggerClient>,
    function: FunctionRef,
    items: Vec<DynamicObject>,
}

impl TriggersOperator {
    pub fn new(
        client: Arc<dyn TriggerClient>,
        function_name: impl Into<String>,
        namespace: impl Into<String>,
        items: impl IntoIterator<Item = DynamicObject>,
    ) -> Self {
        Self { client, function: FunctionRef::new(function_name, namespace), items: items.into_iter().collect() }
    }

    pub fn function(&self) -> &FunctionRef {
        &self.function
    }

    pub async fn apply(&self, ctx: &Context, opts: ApplyOptions) -> Result<()> {
        let t0 = Instant::now();
        info!(function = %self.function, desired = self.items.len(), wait = opts.options.wait_for_apply, "apply started");
        if opts.owner_references.is_empty() {
            warn!(function = %self.function, "applying triggers without owner references");
        }
        match self.apply_all(ctx, &opts).await {
            Ok(()) => {
                histogram!("trigger_apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("trigger_apply_ok", 1u64);
                info!(function = %self.function, "apply finished");
                Ok(())
            }
            Err(e) => {
                counter!("trigger_apply_err", 1u64);
                warn!(function = %self.function, error = %e, "apply failed");
                Err(e)
            }
        }
    }

    async fn apply_all(&self, ctx: &Context, opts: &ApplyOptions) -> Result<()> {
        self.wipe_removed(ctx, &opts.options).await?;

        for (index, item) in self.items.iter().enumerate() {
            if let Some(cause) = ctx.err() {
                return Err(Error::Interrupted(cause));
            }
            let desired = self.desired_document(index, item, &opts.owner_references)?;
            opts.options.callbacks.run_pre(Subject::Item(&desired))?;
            let outcome = self.apply_one(ctx, &desired, opts).await;
            opts.options.callbacks.run_post(Subject::Item(&desired), outcome)?;
        }
        Ok(())
    }

    fn desired_document(
        &self,
        index: usize,
        item: &DynamicObject,
        owner_references: &[OwnerReference],
    ) -> Result<DynamicObject> {
        if item.metadata.name.as_deref().map_or(true, str::is_empty) {
            return Err(Error::InvalidItem { index });
        }
        let mut desired = item.clone();
        if desired.metadata.namespace.is_none() {
            desired.metadata.namespace = Some(self.function.namespace.clone());
        }
        desired.metadata.owner_references = Some(owner_references.to_vec());
        Ok(desired)
    }

    async fn apply_one(&self, ctx: &Context, desired: &DynamicObject, opts: &ApplyOptions) -> Result<()> {
        let name = object_name(desired);
        let namespace = desired.metadata.namespace.as_deref().unwrap_or(&self.function.namespace);

        let (doc, op) = match self.client.get(namespace, name).await {
            Ok(existing) => {
                let mut merged = desired.clone();
                merged.metadata.labels = merge_map(existing.metadata.labels.as_ref(), desired.metadata.labels.as_ref());
                merged.metadata.annotations =
                    merge_map(existing.metadata.annotations.as_ref(), desired.metadata.annotations.as_ref());
                (merged, "updating")
            }
            Err(e) if e.is_not_found() => (desired.clone(), "creating"),
            Err(source) => {
                return Err(Error::Fetch { namespace: namespace.to_string(), name: name.to_string(), source })
            }
        };

        self.client.apply(&doc, &opts.owner_references).await.map_err(|source| Error::Mutation {
            op,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        })?;
        debug!(ns = %namespace, name = %name, op, "trigger applied");

        if opts.options.wait_for_apply {
            wait_for(ctx, self.client.as_ref(), namespace, name).await?;
        }
        Ok(())
    }

    /// Delete every trigger bound to the function that is not in the desired set. Orphans are
    /// deleted with the server's default propagation.
    pub async fn wipe_removed(&self, ctx: &Context, opts: &Options) -> Result<()> {
        let predicate = build_orphan_predicate(&self.function, &self.items);
        wipe_removed(ctx, self.client.as_ref(), &self.function.namespace, &predicate, opts).await
    }

    /// Bound triggers that `wipe_removed` would delete, without deleting them.
    pub async fn orphans(&self) -> Result<Vec<DynamicObject>> {
        let predicate = build_orphan_predicate(&self.function, &self.items);
        list_matching(self.client.as_ref(), &self.function.namespace, &predicate).await
    }

    pub async fn delete(&self, ctx: &Context, opts: DeleteOptions) -> Result<()> {
        info!(function = %self.function, count = self.items.len(), propagation = ?opts.deletion_propagation, "delete started");
        let callbacks = &opts.options.callbacks;
        callbacks.run_pre(Subject::Items(&self.items))?;
        let outcome = self.delete_all(ctx, opts.deletion_propagation).await;
        let res = callbacks.run_post(Subject::Items(&self.items), outcome);
        match &res {
            Ok(()) => {
                counter!("trigger_delete_ok", 1u64);
                info!(function = %self.function, "delete finished");
            }
            Err(e) => {
                counter!("trigger_delete_err", 1u64);
                warn!(function = %self.function, error = %e, "delete failed");
            }
        }
        res
    }

    async fn delete_all(&self, ctx: &Context, propagation: DeletionPropagation) -> Result<()> {
        for item in &self.items {
            if let Some(cause) = ctx.err() {
                return Err(Error::Interrupted(cause));
            }
            let name = object_name(item);
            let namespace = item.metadata.namespace.as_deref().unwrap_or(&self.function.namespace);
            self.client.delete(namespace, name, Some(propagation)).await.map_err(|source| Error::Mutation {
                op: "deleting",
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            })?;
            debug!(ns = %namespace, name = %name, "trigger deleted");
        }
        Ok(())
    }
}

async fn list_matching(client: &dyn TriggerClient, namespace: &str, predicate: &Predicate) -> Result<Vec<DynamicObject>> {
    let listed = client
        .list(namespace)
        .await
        .map_err(|source| Error::List { namespace: namespace.to_string(), source })?;
    let mut out = Vec::new();
    for obj in listed {
        if predicate(&obj)? {
            out.push(obj);
        }
    }
    Ok(out)
}

/// List triggers in `namespace`, delete the ones `predicate` matches, running the callbacks
/// around each delete. Any list, decode, delete or callback error ends the wipe.
pub async fn wipe_removed(
    ctx: &Context,
    client: &dyn TriggerClient,
    namespace: &str,
    predicate: &Predicate,
    opts: &Options,
) -> Result<()> {
    let orphans = list_matching(client, namespace, predicate).await?;
    for orphan in &orphans {
        if let Some(cause) = ctx.err() {
            return Err(Error::Interrupted(cause));
        }
        let name = object_name(orphan);
        let ns = orphan.metadata.namespace.as_deref().unwrap_or(namespace);
        opts.callbacks.run_pre(Subject::Item(orphan))?;
        let outcome = client.delete(ns, name, None).await.map_err(|source| Error::Mutation {
            op: "deleting orphaned",
            namespace: ns.to_string(),
            name: name.to_string(),
            source,
        });
        if outcome.is_ok() {
            counter!("trigger_orphans_deleted", 1u64);
            info!(ns = %ns, name = %name, "orphaned trigger deleted");
        }
        opts.callbacks.run_post(Subject::Item(orphan), outcome)?;
    }
    Ok(())
}
