//! Trigsync core types: the trigger shape, function references and metadata helpers.

#![forbid(unsafe_code)]

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

mod meta;

pub use meta::{contains, merge_map, object_name};

/// Subscriber kind a trigger must point at to be considered bound to a function.
pub const SUBSCRIBER_KIND: &str = "Service";

/// Identifies the function whose triggers are being reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub name: String,
    pub namespace: String,
}

impl FunctionRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default)]
    pub eventtypeversion: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFilter {
    #[serde(default)]
    pub attributes: Attributes,
}

/// Where a trigger delivers events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSubscriber {
    #[serde(default, rename = "ref")]
    pub reference: TriggerReference,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(default)]
    pub filter: TriggerFilter,
    #[serde(default)]
    pub subscriber: TriggerSubscriber,
}

/// Structured view of a trigger document. Only the fields this workspace reads are modelled;
/// anything else on the document is ignored while decoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TriggerSpec,
}

/// A generic document could not be read as a trigger.
#[derive(Debug, thiserror::Error)]
#[error("decoding trigger {}: {source}", .name.as_deref().unwrap_or("<unnamed>"))]
pub struct DecodeError {
    pub name: Option<String>,
    #[source]
    pub source: serde_json::Error,
}

impl Trigger {
    /// Decode a loosely-typed document. Absent fields decode as empty, so a trigger subscribed
    /// by URI has an empty reference and is bound to no function. Wrongly typed fields are errors.
    pub fn from_object(obj: &DynamicObject) -> Result<Self, DecodeError> {
        let name = obj.metadata.name.clone();
        let raw = serde_json::to_value(obj).map_err(|source| DecodeError { name: name.clone(), source })?;
        serde_json::from_value(raw).map_err(|source| DecodeError { name, source })
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    /// True when the subscriber reference points at the function's service.
    pub fn is_reference(&self, function: &FunctionRef) -> bool {
        let r = &self.spec.subscriber.reference;
        r.kind == SUBSCRIBER_KIND && r.name == function.name && r.namespace == function.namespace
    }
}

pub mod prelude {
    pub use super::{contains, merge_map, object_name, FunctionRef, Trigger, TriggerReference, TriggerSpec};
}
