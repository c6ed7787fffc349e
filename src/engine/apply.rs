//! Read-modify-write of owned objects
//!
//! Desired state is recomputed on every attempt and diffed against what the
//! API server holds, so two attempts racing each other converge on the next
//! pass instead of needing a lock.

use kube::api::DynamicObject;
use serde_json::Value;

use super::resource::Reconcilable;
use super::store::Store;
use crate::crd::ResourceRef;
use crate::error::Result;

/// What `create_or_update` had to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Overlay the desired object on the observed one
///
/// Labels and annotations are merged (desired keys win, foreign keys are
/// kept), owner references are taken from the desired object when it sets
/// them, and every top-level data field the desired object sets (`spec`,
/// `data`, ...) replaces the observed one. `status` is never touched.
pub fn merge_desired(observed: &DynamicObject, desired: &DynamicObject) -> DynamicObject {
    let mut merged = observed.clone();

    if let Some(labels) = &desired.metadata.labels {
        merged
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .extend(labels.clone());
    }
    if let Some(annotations) = &desired.metadata.annotations {
        merged
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.clone());
    }
    if desired.metadata.owner_references.is_some() {
        merged.metadata.owner_references = desired.metadata.owner_references.clone();
    }

    if let Value::Object(fields) = &desired.data {
        if !merged.data.is_object() {
            merged.data = Value::Object(Default::default());
        }
        if let Value::Object(target) = &mut merged.data {
            for (key, value) in fields {
                if key == "status" {
                    continue;
                }
                target.insert(key.clone(), value.clone());
            }
        }
    }

    merged
}

/// Whether the merged object differs from what is stored
pub fn has_drift(observed: &DynamicObject, merged: &DynamicObject) -> bool {
    observed.metadata.labels != merged.metadata.labels
        || observed.metadata.annotations != merged.metadata.annotations
        || observed.metadata.owner_references != merged.metadata.owner_references
        || observed.data != merged.data
}

/// Create the owned object, or update it if it drifted from `desired`
pub async fn create_or_update<K: Reconcilable>(
    store: &dyn Store<K>,
    owned: &ResourceRef,
    desired: &DynamicObject,
) -> Result<ApplyOutcome> {
    match store.get_owned(owned).await? {
        None => {
            store.create_owned(owned, desired).await?;
            Ok(ApplyOutcome::Created)
        }
        Some(observed) => {
            let merged = merge_desired(&observed, desired);
            if !has_drift(&observed, &merged) {
                return Ok(ApplyOutcome::Unchanged);
            }
            store.replace_owned(owned, &merged).await?;
            Ok(ApplyOutcome::Updated)
        }
    }
}
