//! In-memory [`Store`] used by unit tests
//!
//! Mimics the parts of API server behaviour the engine relies on:
//! resourceVersion conflicts, status being ignored by plain replaces, and
//! objects disappearing once they are deleted with no finalizers left.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::DynamicObject;
use kube::ResourceExt;

use super::resource::{ObjectKey, Reconcilable};
use super::store::Store;
use crate::crd::ResourceRef;
use crate::error::{Error, Result};

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

/// `target` carrying the full status of `source`
fn with_status_of<K: Reconcilable>(target: &K, source: &K) -> K {
    let mut value = serde_json::to_value(target).unwrap();
    let status = serde_json::to_value(source).unwrap().get("status").cloned();
    let fields = value.as_object_mut().unwrap();
    match status {
        Some(status) => {
            fields.insert("status".to_string(), status);
        }
        None => {
            fields.remove("status");
        }
    }
    serde_json::from_value(value).unwrap()
}

pub struct FakeStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    namespaces: Mutex<HashMap<String, ObjectMeta>>,
    owned: Mutex<BTreeMap<ResourceRef, DynamicObject>>,
    restarted: Mutex<Vec<ResourceRef>>,
    version: AtomicU64,
    /// Owned deletions only set a deletion timestamp, like objects with finalizers
    hold_owned_deletions: bool,
    pub object_writes: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub owned_writes: AtomicUsize,
}

impl<K: Reconcilable> Default for FakeStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            namespaces: Mutex::new(HashMap::new()),
            owned: Mutex::new(BTreeMap::new()),
            restarted: Mutex::new(Vec::new()),
            version: AtomicU64::new(1),
            hold_owned_deletions: false,
            object_writes: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            owned_writes: AtomicUsize::new(0),
        }
    }
}

impl<K: Reconcilable> FakeStore<K> {
    pub fn holding_owned_deletions() -> Self {
        Self {
            hold_owned_deletions: true,
            ..Self::default()
        }
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Seed an object; generation defaults to 1
    pub fn insert(&self, mut obj: K) -> ObjectKey {
        let meta = obj.meta_mut();
        meta.resource_version = Some(self.next_version());
        meta.generation.get_or_insert(1);
        let key = ObjectKey::of(&obj);
        self.objects.lock().unwrap().insert(key.clone(), obj);
        key
    }

    pub fn insert_namespace(&self, name: &str, meta: ObjectMeta) {
        self.namespaces.lock().unwrap().insert(name.to_string(), meta);
    }

    pub fn insert_owned(&self, owned: &ResourceRef, obj: DynamicObject) {
        self.owned.lock().unwrap().insert(owned.clone(), obj);
    }

    /// Finish a held deletion, as the garbage collector would
    pub fn remove_owned(&self, owned: &ResourceRef) {
        self.owned.lock().unwrap().remove(owned);
    }

    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn owned(&self, owned: &ResourceRef) -> Option<DynamicObject> {
        self.owned.lock().unwrap().get(owned).cloned()
    }

    pub fn restarted(&self) -> Vec<ResourceRef> {
        self.restarted.lock().unwrap().clone()
    }

    /// Apply a spec edit the way a user would; bumps the generation
    pub fn edit(&self, key: &ObjectKey, edit: impl FnOnce(&mut K)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).expect("object to edit");
        edit(obj);
        let version = self.next_version();
        let meta = obj.meta_mut();
        meta.generation = Some(meta.generation.unwrap_or(0) + 1);
        meta.resource_version = Some(version);
    }

    /// Change metadata without touching the generation
    pub fn edit_meta(&self, key: &ObjectKey, edit: impl FnOnce(&mut ObjectMeta)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects.get_mut(key).expect("object to edit");
        edit(obj.meta_mut());
        obj.meta_mut().resource_version = Some(self.next_version());
    }

    /// Start deletion of an object, as `kubectl delete` would
    pub fn mark_deleted(&self, key: &ObjectKey) {
        self.edit_meta(key, |meta| {
            meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
        });
    }

    pub fn total_writes(&self) -> usize {
        self.object_writes.load(Ordering::SeqCst)
            + self.status_writes.load(Ordering::SeqCst)
            + self.owned_writes.load(Ordering::SeqCst)
    }

    fn check_version(stored: &K, incoming: &K) -> Result<()> {
        if stored.resource_version() != incoming.resource_version() {
            return Err(api_error(
                409,
                "Conflict",
                format!("the object {} has been modified", incoming.name_any()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl<K: Reconcilable> Store<K> for FakeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.object(key))
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        };
        Self::check_version(stored, obj)?;

        let mut updated = with_status_of(obj, stored);
        updated.meta_mut().generation = stored.meta().generation;
        updated.meta_mut().resource_version = Some(self.next_version());
        self.object_writes.fetch_add(1, Ordering::SeqCst);

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get(&key) else {
            return Err(api_error(404, "NotFound", format!("{key} not found")));
        };
        Self::check_version(stored, obj)?;

        let mut updated = with_status_of(stored, obj);
        updated.meta_mut().resource_version = Some(self.next_version());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn namespace_meta(&self, namespace: &str) -> Result<Option<ObjectMeta>> {
        Ok(self.namespaces.lock().unwrap().get(namespace).cloned())
    }

    async fn get_owned(&self, owned: &ResourceRef) -> Result<Option<DynamicObject>> {
        Ok(self.owned(owned))
    }

    async fn create_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut store = self.owned.lock().unwrap();
        if store.contains_key(owned) {
            return Err(api_error(409, "AlreadyExists", format!("{owned} already exists")));
        }
        let mut created = obj.clone();
        created.metadata.resource_version = Some(self.next_version());
        store.insert(owned.clone(), created.clone());
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace_owned(&self, owned: &ResourceRef, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut store = self.owned.lock().unwrap();
        let Some(stored) = store.get(owned) else {
            return Err(api_error(404, "NotFound", format!("{owned} not found")));
        };
        if stored.metadata.resource_version != obj.metadata.resource_version {
            return Err(api_error(409, "Conflict", format!("{owned} has been modified")));
        }
        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(self.next_version());
        store.insert(owned.clone(), updated.clone());
        self.owned_writes.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete_owned(&self, owned: &ResourceRef) -> Result<()> {
        let mut store = self.owned.lock().unwrap();
        if self.hold_owned_deletions {
            if let Some(obj) = store.get_mut(owned) {
                obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        } else {
            store.remove(owned);
        }
        Ok(())
    }

    async fn restart(&self, owned: &ResourceRef) -> Result<()> {
        self.restarted.lock().unwrap().push(owned.clone());
        Ok(())
    }
}
