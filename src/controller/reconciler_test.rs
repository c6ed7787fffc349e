//! End-to-end attempts of the Router controller against the in-memory store

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde_json::json;

use super::reconciler::{RouterReconciler, CHECK_ADDRESS, CHECK_CLEANUP, CHECK_INGRESS};
use super::resources::ingress_ref;
use crate::crd::{Router, RouterHost, RouterPath, RouterSpec};
use crate::engine::finalizers::COMMON_FINALIZER;
use crate::engine::store::from_dynamic;
use crate::engine::testing::FakeStore;
use crate::engine::{reconcile_key, EngineConfig, HasStatus, ObjectKey, StepResult, Store};
use crate::error::Error;

fn router(hosts: Vec<RouterHost>) -> Router {
    let mut router = Router::new(
        "shop",
        RouterSpec {
            ingress_class: Some("nginx".to_string()),
            backend_service: "shop-web".to_string(),
            backend_port: 8080,
            hosts,
            ..Default::default()
        },
    );
    router.metadata.namespace = Some("apps".to_string());
    router
}

fn host(name: &str) -> RouterHost {
    RouterHost {
        host: name.to_string(),
        paths: vec![RouterPath {
            path: "/".to_string(),
            path_type: None,
        }],
    }
}

async fn attempt(store: &Arc<FakeStore<Router>>, key: &ObjectKey) -> StepResult {
    let store: Arc<dyn Store<Router>> = store.clone();
    reconcile_key(&RouterReconciler, store, key, Arc::new(EngineConfig::default())).await
}

/// Run attempts until one stops for a reason other than a metadata write
async fn settle(store: &Arc<FakeStore<Router>>, key: &ObjectKey) -> StepResult {
    for _ in 0..10 {
        let result = attempt(store, key).await;
        if result.requeue_delay() != Some(Duration::from_secs(1)) {
            return result;
        }
    }
    panic!("attempts never settled");
}

fn publish_address(store: &FakeStore<Router>, router: &Router, ip: &str) {
    let owned = ingress_ref(router);
    let mut ingress = store.owned(&owned).expect("ingress exists");
    ingress.data["status"] = json!({"loadBalancer": {"ingress": [{"ip": ip}]}});
    store.insert_owned(&owned, ingress);
}

async fn converged(store: &Arc<FakeStore<Router>>) -> ObjectKey {
    let router = router(vec![host("shop.example.com")]);
    let key = store.insert(router.clone());
    let _ = settle(store, &key).await;
    publish_address(store, &router, "10.0.0.7");
    let result = attempt(store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(300)));
    key
}

#[tokio::test]
async fn test_router_converges() {
    let store = Arc::new(FakeStore::default());
    let router = router(vec![host("shop.example.com")]);
    let key = store.insert(router.clone());

    // ingress is created, the address is not there yet
    let result = settle(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(5)));

    let stored = store.object(&key).unwrap();
    assert!(stored.finalizers().contains(&COMMON_FINALIZER.to_string()));
    let status = stored.status().unwrap();
    assert!(!status.is_ready);
    assert!(status.checks[CHECK_INGRESS].passed_at(1));
    assert!(!status.checks[CHECK_ADDRESS].status);
    assert_eq!(status.check_list.len(), 2);
    assert_eq!(status.resources, vec![ingress_ref(&router)]);

    let ingress: Ingress = from_dynamic(store.owned(&ingress_ref(&router)).unwrap()).unwrap();
    let spec = ingress.spec.unwrap();
    assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
    let rule = &spec.rules.unwrap()[0];
    assert_eq!(rule.host.as_deref(), Some("shop.example.com"));
    let backend = rule.http.as_ref().unwrap().paths[0].backend.service.clone().unwrap();
    assert_eq!(backend.name, "shop-web");

    publish_address(&store, &router, "10.0.0.7");
    let result = attempt(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(300)));

    let stored = store.object(&key).unwrap();
    assert!(stored.status().unwrap().is_ready);
    assert_eq!(
        stored.status.as_ref().and_then(|s| s.address.as_deref()),
        Some("10.0.0.7")
    );
}

#[tokio::test]
async fn test_steady_state_attempt_writes_nothing() {
    let store = Arc::new(FakeStore::default());
    let key = converged(&store).await;

    let writes = store.total_writes();
    let result = attempt(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(300)));
    assert_eq!(store.total_writes(), writes);
}

#[tokio::test]
async fn test_ingress_drift_is_repaired() {
    let store = Arc::new(FakeStore::default());
    let key = converged(&store).await;
    let owned = ingress_ref(&store.object(&key).unwrap());

    let mut ingress = store.owned(&owned).unwrap();
    ingress.data["spec"]["ingressClassName"] = json!("traefik");
    store.insert_owned(&owned, ingress);

    let before = store.owned_writes.load(Ordering::SeqCst);
    let _ = attempt(&store, &key).await;
    assert_eq!(store.owned_writes.load(Ordering::SeqCst), before + 1);

    let repaired = store.owned(&owned).unwrap();
    assert_eq!(repaired.data["spec"]["ingressClassName"], json!("nginx"));
    // the address published by the ingress controller survives the update
    assert_eq!(
        repaired.data["status"]["loadBalancer"]["ingress"][0]["ip"],
        json!("10.0.0.7")
    );
}

#[tokio::test]
async fn test_spec_change_reverifies_checks() {
    let store = Arc::new(FakeStore::default());
    let key = converged(&store).await;

    store.edit(&key, |r| r.spec.backend_port = 9090);
    let result = attempt(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(300)));

    let stored = store.object(&key).unwrap();
    let status = stored.status().unwrap();
    assert!(status.is_ready);
    assert!(status.all_checks_pass(2));

    let ingress: Ingress =
        from_dynamic(store.owned(&ingress_ref(&stored)).unwrap()).unwrap();
    let port = ingress.spec.unwrap().rules.unwrap()[0].http.as_ref().unwrap().paths[0]
        .backend
        .service
        .as_ref()
        .unwrap()
        .port
        .as_ref()
        .unwrap()
        .number;
    assert_eq!(port, Some(9090));
}

#[tokio::test]
async fn test_invalid_spec_reports_condition() {
    let store = Arc::new(FakeStore::default());
    let key = store.insert(router(Vec::new()));

    let result = settle(&store, &key).await;
    assert!(matches!(result, StepResult::Fail(Error::ValidationError(_))));

    let stored = store.object(&key).unwrap();
    let status = stored.status().unwrap();
    assert_eq!(status.conditions.len(), 1);
    assert_eq!(status.conditions[0].type_, "SpecValid");
    assert!(status.conditions[0].message.contains("spec.hosts"));
    assert!(store.owned(&ingress_ref(&stored)).is_none());

    store.edit(&key, |r| r.spec.hosts = vec![host("shop.example.com")]);
    let result = attempt(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(5)));
    let stored = store.object(&key).unwrap();
    assert!(stored.status().unwrap().conditions.is_empty());
}

#[tokio::test]
async fn test_deletion_waits_for_owned_ingress() {
    let store = Arc::new(FakeStore::holding_owned_deletions());
    let key = converged(&store).await;
    let owned = ingress_ref(&store.object(&key).unwrap());

    store.mark_deleted(&key);
    let result = attempt(&store, &key).await;
    let err = result.err().expect("waiting for the ingress");
    assert!(err.to_string().contains("waiting for deletion of resource"));
    assert!(store.owned(&owned).unwrap().metadata.deletion_timestamp.is_some());
    let stored = store.object(&key).unwrap();
    assert!(!stored.status().unwrap().checks[CHECK_CLEANUP].status);

    // still there: keep waiting
    assert!(attempt(&store, &key).await.err().is_some());

    store.remove_owned(&owned);
    assert!(matches!(attempt(&store, &key).await, StepResult::Halt));
    assert!(store.object(&key).is_none());

    // the object is gone: nothing left to do
    assert!(matches!(attempt(&store, &key).await, StepResult::Halt));
}

#[tokio::test]
async fn test_restart_annotation_is_consumed() {
    let store = Arc::new(FakeStore::default());
    let key = converged(&store).await;

    store.edit_meta(&key, |meta| {
        meta.annotations
            .get_or_insert_with(Default::default)
            .insert("converge.io/restart".to_string(), "true".to_string());
    });
    let result = attempt(&store, &key).await;
    assert_eq!(result.requeue_delay(), Some(Duration::from_secs(1)));
    // an Ingress is not a workload
    assert!(store.restarted().is_empty());
    assert!(!store
        .object(&key)
        .unwrap()
        .annotations()
        .contains_key("converge.io/restart"));
}
