//! Trigsync kubehub: the trigger client contract and its kube-rs implementation.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use futures::{stream::BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PropagationPolicy},
    core::{ApiResource, DynamicObject, GroupVersionKind, TypeMeta},
    runtime::watcher::{self, Event},
    Client,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default server-side apply field manager.
pub const DEFAULT_FIELD_MANAGER: &str = "trigsync";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {namespace}/{name}")]
    NotFound { namespace: String, name: String },
    #[error("kube api: {0}")]
    Kube(#[from] kube::Error),
    #[error("watch: {0}")]
    Watch(#[from] watcher::Error),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    fn from_kube(e: kube::Error, namespace: &str, name: &str) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => {
                ClientError::NotFound { namespace: namespace.to_string(), name: name.to_string() }
            }
            other => ClientError::Kube(other),
        }
    }
}

/// A change observed on the trigger collection.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),
}

impl WatchEvent {
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

/// Stream of watch events; errors are delivered in-band as `Err` items.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClientError>>;

/// Whether dependents are removed alongside a deleted trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletionPropagation {
    Orphan,
    #[default]
    Background,
    Foreground,
}

impl From<DeletionPropagation> for PropagationPolicy {
    fn from(p: DeletionPropagation) -> Self {
        match p {
            DeletionPropagation::Orphan => PropagationPolicy::Orphan,
            DeletionPropagation::Background => PropagationPolicy::Background,
            DeletionPropagation::Foreground => PropagationPolicy::Foreground,
        }
    }
}

/// Resource client the operator drives. Implementations must report a missing object on
/// `get` as [`ClientError::NotFound`].
#[async_trait::async_trait]
pub trait TriggerClient: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<DynamicObject>, ClientError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClientError>;

    /// Idempotent create-or-update. The stored document carries exactly `owner_references`.
    async fn apply(
        &self,
        doc: &DynamicObject,
        owner_references: &[OwnerReference],
    ) -> Result<DynamicObject, ClientError>;

    /// `None` leaves the propagation policy to the server default.
    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ClientError>;

    async fn watch(&self, namespace: &str) -> Result<WatchStream, ClientError>;
}

/// Group/version/kind of the trigger resource being reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResource {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Default for TriggerResource {
    fn default() -> Self {
        Self { group: "eventing.knative.dev".into(), version: "v1".into(), kind: "Trigger".into() }
    }
}

impl TriggerResource {
    /// Read `TRIGSYNC_TRIGGER_GVK`, falling back to the knative trigger.
    pub fn from_env() -> Result<Self> {
        match std::env::var("TRIGSYNC_TRIGGER_GVK") {
            Ok(key) => Self::parse(&key).context("reading TRIGSYNC_TRIGGER_GVK"),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn parse(key: &str) -> Result<Self> {
        let gvk = parse_gvk_key(key)?;
        Ok(Self { group: gvk.group, version: gvk.version, kind: gvk.kind })
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(&self.group, &self.version, &self.kind))
    }
}

fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

fn field_manager() -> String {
    std::env::var("TRIGSYNC_FIELD_MANAGER").unwrap_or_else(|_| DEFAULT_FIELD_MANAGER.to_string())
}

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from default config")
}

/// Server-populated metadata must not be sent back in an apply patch.
fn strip_server_fields(meta: &mut ObjectMeta) {
    meta.managed_fields = None;
    meta.resource_version = None;
    meta.uid = None;
    meta.generation = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
}

/// [`TriggerClient`] backed by `Api<DynamicObject>` for the configured trigger resource.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    resource: ApiResource,
    field_manager: String,
}

impl KubeClient {
    pub fn new(client: Client, resource: &TriggerResource) -> Self {
        Self { client, resource: resource.api_resource(), field_manager: field_manager() }
    }

    /// Default kube config plus environment configuration.
    pub async fn try_default() -> Result<Self> {
        let client = get_kube_client().await?;
        let resource = TriggerResource::from_env()?;
        info!(gvk = %resource.gvk_key(), "trigger client ready");
        Ok(Self::new(client, &resource))
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }
}

#[async_trait::async_trait]
impl TriggerClient for KubeClient {
    async fn list(&self, namespace: &str) -> Result<Vec<DynamicObject>, ClientError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        debug!(ns = %namespace, count = list.items.len(), "listed triggers");
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClientError> {
        match self.api(namespace).get_opt(name).await? {
            Some(obj) => Ok(obj),
            None => Err(ClientError::NotFound { namespace: namespace.to_string(), name: name.to_string() }),
        }
    }

    async fn apply(
        &self,
        doc: &DynamicObject,
        owner_references: &[OwnerReference],
    ) -> Result<DynamicObject, ClientError> {
        let name = doc
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClientError::InvalidDocument("missing metadata.name".into()))?;
        let namespace = doc
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| ClientError::InvalidDocument(format!("{} missing metadata.namespace", name)))?;

        let mut body = doc.clone();
        body.types = Some(TypeMeta { api_version: self.resource.api_version.clone(), kind: self.resource.kind.clone() });
        strip_server_fields(&mut body.metadata);
        body.metadata.owner_references = Some(owner_references.to_vec());

        let pp = PatchParams::apply(&self.field_manager).force();
        let obj = self
            .api(&namespace)
            .patch(&name, &pp, &Patch::Apply(&body))
            .await
            .map_err(|e| ClientError::from_kube(e, &namespace, &name))?;
        debug!(ns = %namespace, name = %name, rv = ?obj.metadata.resource_version, "trigger applied");
        Ok(obj)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ClientError> {
        let dp = DeleteParams { propagation_policy: propagation.map(Into::into), ..DeleteParams::default() };
        self.api(namespace)
            .delete(name, &dp)
            .await
            .map_err(|e| ClientError::from_kube(e, namespace, name))?;
        Ok(())
    }

    async fn watch(&self, namespace: &str) -> Result<WatchStream, ClientError> {
        let stream = watcher::watcher(self.api(namespace), watcher::Config::default()).flat_map(|res| {
            let events: Vec<Result<WatchEvent, ClientError>> = match res {
                Ok(Event::Applied(o)) => vec![Ok(WatchEvent::Modified(o))],
                Ok(Event::Deleted(o)) => vec![Ok(WatchEvent::Deleted(o))],
                // initial list and relists surface every current object
                Ok(Event::Restarted(list)) => list.into_iter().map(|o| Ok(WatchEvent::Added(o))).collect(),
                Err(e) => vec![Err(ClientError::Watch(e))],
            };
            futures::stream::iter(events)
        });
        info!(ns = %namespace, "trigger watch opened");
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_core_and_grouped_gvk_keys() {
        let core = TriggerResource::parse("v1/ConfigMap").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.gvk_key(), "v1/ConfigMap");

        let grouped = TriggerResource::parse("eventing.knative.dev/v1/Trigger").unwrap();
        assert_eq!(grouped, TriggerResource::default());
        assert_eq!(grouped.gvk_key(), "eventing.knative.dev/v1/Trigger");
    }

    #[test]
    fn rejects_malformed_gvk_keys() {
        for key in ["Trigger", "a/b/c/d", "v1/", ""] {
            let err = TriggerResource::parse(key).unwrap_err().to_string();
            assert!(err.contains("invalid gvk key"), "key={} err={}", key, err);
        }
    }

    #[test]
    fn api_resource_pluralizes_kind() {
        let ar = TriggerResource::default().api_resource();
        assert_eq!(ar.plural, "triggers");
        assert_eq!(ar.api_version, "eventing.knative.dev/v1");
    }

    #[test]
    fn propagation_maps_onto_kube_policy() {
        assert!(matches!(PropagationPolicy::from(DeletionPropagation::Orphan), PropagationPolicy::Orphan));
        assert!(matches!(PropagationPolicy::from(DeletionPropagation::Foreground), PropagationPolicy::Foreground));
        assert_eq!(DeletionPropagation::default(), DeletionPropagation::Background);
    }

    #[test]
    fn strip_server_fields_keeps_user_metadata() {
        let mut meta = ObjectMeta {
            name: Some("t".into()),
            resource_version: Some("42".into()),
            uid: Some("abc".into()),
            generation: Some(3),
            ..Default::default()
        };
        strip_server_fields(&mut meta);
        assert_eq!(meta.name.as_deref(), Some("t"));
        assert!(meta.resource_version.is_none());
        assert!(meta.uid.is_none());
        assert!(meta.generation.is_none());
    }

    #[test]
    fn watch_event_exposes_object() {
        let obj: DynamicObject = serde_json::from_value(serde_json::json!({ "metadata": { "name": "x" } })).unwrap();
        assert_eq!(WatchEvent::Deleted(obj).object().metadata.name.as_deref(), Some("x"));
    }
}
