//! Capabilities a custom resource needs to be reconciled by the engine

use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crd::{Check, Status};

/// Access to the common status embedded in a resource
pub trait HasStatus {
    /// The common status, if the resource has one yet
    fn status(&self) -> Option<&Status>;

    /// The common status, created empty on first access
    fn status_mut(&mut self) -> &mut Status;

    /// The part of the status whose changes warrant another reconcile
    fn observable_summary(&self) -> ObservableSummary {
        ObservableSummary::from_status(self.status())
    }
}

/// The label/annotation baseline a resource must always carry
pub trait HasEnsuredMeta {
    fn ensured_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn ensured_annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Everything the engine needs from a reconciled object
pub trait Reconcilable:
    Resource<DynamicType = ()>
    + HasStatus
    + HasEnsuredMeta
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Reconcilable for K where
    K: Resource<DynamicType = ()>
        + HasStatus
        + HasEnsuredMeta
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Typed view of `isReady` and `checks`, compared by the event filter
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservableSummary {
    pub is_ready: bool,
    pub checks: BTreeMap<String, Check>,
}

impl ObservableSummary {
    pub fn from_status(status: Option<&Status>) -> Self {
        status
            .map(|s| Self {
                is_ready: s.is_ready,
                checks: s.checks.clone(),
            })
            .unwrap_or_default()
    }
}

/// Identity of a reconciled object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Some(namespace.into()), name)
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace(), obj.name_any())
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Current `.metadata.generation`, 0 when the server has not set one
pub fn generation_of<K: Resource>(obj: &K) -> i64 {
    obj.meta().generation.unwrap_or(0)
}
