//! Access to the API server
//!
//! [`Store`] is the only way the engine reads or writes objects. The
//! production implementation, [`KubeStore`], talks to the API server through
//! kube-rs; tests use an in-memory implementation.

use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

use super::finalizers::RESTARTED_AT_ANNOTATION;
use super::resource::{ObjectKey, Reconcilable};
use crate::crd::ResourceRef;
use crate::error::Result;

/// Reads and writes the reconciled object and the objects it owns
///
/// Writes carry the object's `resourceVersion`, so a concurrent modification
/// surfaces as a 409 error instead of being overwritten.
#[async_trait]
pub trait Store<K: Reconcilable>: Send + Sync {
    /// Fetch the object; `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Replace the object (metadata and spec)
    async fn replace(&self, obj: &K) -> Result<K>;

    /// Replace the status subresource
    async fn replace_status(&self, obj: &K) -> Result<K>;

    /// Metadata of a namespace; `None` if it does not exist
    async fn namespace_meta(&self, namespace: &str) -> Result<Option<ObjectMeta>>;

    async fn get_owned(&self, owned: &ResourceRef) -> Result<Option<DynamicObject>>;

    async fn create_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn replace_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an owned object; deleting an absent object is not an error
    async fn delete_owned(&self, owned: &ResourceRef) -> Result<()>;

    /// Rollout-restart an owned workload
    async fn restart(&self, owned: &ResourceRef) -> Result<()>;
}

/// [`Store`] backed by a kube-rs client
pub struct KubeStore<K> {
    client: Client,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            field_manager: self.field_manager.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Reconcilable> KubeStore<K> {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            _kind: PhantomData,
        }
    }

    fn parent_api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        dynamic_api(&self.client, &ApiResource::erase::<K>(&()), namespace)
    }

    fn owned_api(&self, owned: &ResourceRef) -> Api<DynamicObject> {
        let (group, version) = owned.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &owned.kind);
        dynamic_api(
            &self.client,
            &ApiResource::from_gvk(&gvk),
            owned.namespace.as_deref(),
        )
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn dynamic_api(client: &Client, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, resource),
        None => Api::all_with(client.clone(), resource),
    }
}

/// Convert a typed object into its dynamic form
pub fn to_dynamic<T: serde::Serialize>(obj: &T) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert a dynamic object into a typed one
pub fn from_dynamic<T: serde::de::DeserializeOwned>(obj: DynamicObject) -> Result<T> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

#[async_trait]
impl<K: Reconcilable> Store<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api = self.parent_api(key.namespace.as_deref());
        match api.get_opt(&key.name).await? {
            Some(obj) => Ok(Some(from_dynamic(obj)?)),
            None => Ok(None),
        }
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let api = self.parent_api(obj.namespace().as_deref());
        let updated = api
            .replace(&obj.name_any(), &self.post_params(), &to_dynamic(obj)?)
            .await?;
        debug!("Replaced {}", ObjectKey::of(obj));
        from_dynamic(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let api = self.parent_api(obj.namespace().as_deref());
        let updated = api
            .replace_status(&obj.name_any(), &self.post_params(), serde_json::to_vec(obj)?)
            .await?;
        debug!("Replaced status of {}", ObjectKey::of(obj));
        from_dynamic(updated)
    }

    async fn namespace_meta(&self, namespace: &str) -> Result<Option<ObjectMeta>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.map(|ns| ns.metadata))
    }

    async fn get_owned(&self, owned: &ResourceRef) -> Result<Option<DynamicObject>> {
        Ok(self.owned_api(owned).get_opt(&owned.name).await?)
    }

    async fn create_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject> {
        let created = self.owned_api(owned).create(&self.post_params(), obj).await?;
        info!("Created {}", owned);
        Ok(created)
    }

    async fn replace_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject> {
        let updated = self
            .owned_api(owned)
            .replace(&owned.name, &self.post_params(), obj)
            .await?;
        info!("Updated {}", owned);
        Ok(updated)
    }

    async fn delete_owned(&self, owned: &ResourceRef) -> Result<()> {
        match self
            .owned_api(owned)
            .delete(&owned.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted {}", owned);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} already gone", owned);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn restart(&self, owned: &ResourceRef) -> Result<()> {
        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            RESTARTED_AT_ANNOTATION: chrono::Utc::now().to_rfc3339()
                        }
                    }
                }
            }
        });
        self.owned_api(owned)
            .patch(
                &owned.name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await?;
        info!("Restarted {}", owned);
        Ok(())
    }
}
