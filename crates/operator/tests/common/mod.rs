#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use trigsync_kubehub::{ClientError, DeletionPropagation, TriggerClient, WatchEvent, WatchStream};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List(String),
    Get(String, String),
    Apply(String, Vec<OwnerReference>),
    Delete(String, String, Option<DeletionPropagation>),
    Watch(String),
}

/// Scripted in-memory client: records every call and answers from canned state.
#[derive(Default)]
pub struct FakeClient {
    pub listed: Vec<DynamicObject>,
    pub list_error: Option<String>,
    pub existing: HashMap<String, DynamicObject>,
    pub get_error: Option<String>,
    pub apply_error: Option<String>,
    pub delete_error: Option<String>,
    pub watch_events: Vec<WatchEvent>,
    pub watch_error: Option<String>,
    /// Keep the watch open after the scripted events instead of ending the stream.
    pub watch_hold_open: bool,
    pub calls: Mutex<Vec<Call>>,
    pub applied: Mutex<Vec<DynamicObject>>,
}

impl FakeClient {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<DynamicObject> {
        self.applied.lock().unwrap().clone()
    }

    pub fn deleted_names(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(_, name, _) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl TriggerClient for FakeClient {
    async fn list(&self, namespace: &str) -> Result<Vec<DynamicObject>, ClientError> {
        self.record(Call::List(namespace.to_string()));
        match &self.list_error {
            Some(msg) => Err(ClientError::Other(msg.clone())),
            None => Ok(self.listed.clone()),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, ClientError> {
        self.record(Call::Get(namespace.to_string(), name.to_string()));
        if let Some(msg) = &self.get_error {
            return Err(ClientError::Other(msg.clone()));
        }
        self.existing
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound { namespace: namespace.to_string(), name: name.to_string() })
    }

    async fn apply(&self, doc: &DynamicObject, owner_references: &[OwnerReference]) -> Result<DynamicObject, ClientError> {
        let name = doc.metadata.name.clone().unwrap_or_default();
        self.record(Call::Apply(name, owner_references.to_vec()));
        if let Some(msg) = &self.apply_error {
            return Err(ClientError::Other(msg.clone()));
        }
        let mut stored = doc.clone();
        stored.metadata.owner_references = Some(owner_references.to_vec());
        self.applied.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        namespace: &str,
        name: &str,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ClientError> {
        self.record(Call::Delete(namespace.to_string(), name.to_string(), propagation));
        match &self.delete_error {
            Some(msg) => Err(ClientError::Other(msg.clone())),
            None => Ok(()),
        }
    }

    async fn watch(&self, namespace: &str) -> Result<WatchStream, ClientError> {
        self.record(Call::Watch(namespace.to_string()));
        let mut items: Vec<Result<WatchEvent, ClientError>> = self.watch_events.iter().cloned().map(Ok).collect();
        if let Some(msg) = &self.watch_error {
            items.push(Err(ClientError::Other(msg.clone())));
        }
        let scripted = futures::stream::iter(items);
        if self.watch_hold_open {
            Ok(scripted.chain(futures::stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }
}

/// A trigger document subscribed to the `function` service in `namespace`.
pub fn trigger(name: &str, function: &str, namespace: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "eventing.knative.dev/v1",
        "kind": "Trigger",
        "metadata": { "name": name, "namespace": namespace, "labels": { "function": function } },
        "spec": {
            "broker": "default",
            "filter": { "attributes": { "eventtypeversion": "v1", "source": "shop", "type": name } },
            "subscriber": { "ref": { "apiVersion": "v1", "kind": "Service", "name": function, "namespace": namespace } }
        }
    }))
    .unwrap()
}

pub fn owner() -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: "serverless.kyma-project.io/v1alpha2".into(),
        kind: "Function".into(),
        name: "pay".into(),
        uid: "123".into(),
        ..Default::default()
    }]
}
