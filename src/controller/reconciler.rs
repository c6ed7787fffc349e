//! Reconciler for Router resources
//!
//! Pipeline: operator annotations, check bookkeeping, metadata baseline,
//! finalizers, spec validation, the Ingress, then its published address.
//! Deletion removes the Ingress and waits for it to be gone before the
//! finalizers are dropped.

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::Api;
use kube::runtime::{watcher, Controller};
use kube::Client;
use tracing::{info, warn};

use super::resources::{build_ingress, ingress_address, ingress_ref};
use crate::crd::{CheckMeta, Router};
use crate::engine::conditions::CONDITION_TYPE_SPEC_VALID;
use crate::engine::finalizers::DEFAULT_FINALIZERS;
use crate::engine::store::to_dynamic;
use crate::engine::{CheckRunner, Reconciler, Request, StepResult};
use crate::error::Error;
use crate::step;

pub const CONTROLLER_NAME: &str = "router";

pub const CHECK_INGRESS: &str = "ingress";
pub const CHECK_ADDRESS: &str = "address";
pub const CHECK_CLEANUP: &str = "cleanup";

fn check_list() -> Vec<CheckMeta> {
    vec![
        CheckMeta {
            description: Some("Ingress routes the hosts to the backend Service".to_string()),
            ..CheckMeta::new(CHECK_INGRESS, "Ingress configured")
        },
        CheckMeta::new(CHECK_ADDRESS, "Address published"),
    ]
}

#[derive(Clone, Debug, Default)]
pub struct RouterReconciler;

#[async_trait]
impl Reconciler for RouterReconciler {
    type Resource = Router;

    fn name(&self) -> &'static str {
        CONTROLLER_NAME
    }

    async fn reconcile(&self, req: &mut Request<Router>) -> StepResult {
        if req.is_being_deleted() {
            return finalize(req).await;
        }

        step!(req.clear_status_if_annotated().await);
        step!(req.restart_if_annotated().await);
        step!(req.ensure_check_list(&check_list()).await);
        step!(req.ensure_checks(&[CHECK_INGRESS, CHECK_ADDRESS]).await);
        step!(req.ensure_labels_and_annotations().await);
        step!(req.ensure_finalizers(DEFAULT_FINALIZERS).await);

        step!(validate_spec(req).await);
        step!(ensure_ingress(req).await);
        step!(ensure_address(req).await);

        req.done().await
    }

    fn setup_with_manager(&self, controller: Controller<Router>, client: &Client) -> Controller<Router> {
        controller.owns::<Ingress>(Api::all(client.clone()), watcher::Config::default())
    }
}

async fn finalize(req: &mut Request<Router>) -> StepResult {
    info!("Cleaning up Router {}", req.key());
    let mut owned = req.status().resources.clone();
    let ingress = ingress_ref(req.object());
    if !owned.contains(&ingress) {
        owned.push(ingress);
    }
    step!(req.cleanup_owned_resources(CHECK_CLEANUP, &owned).await);
    req.finalize().await
}

async fn validate_spec(req: &mut Request<Router>) -> StepResult {
    if let Err(errors) = req.object().spec.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("Validation failed for {}: {}", req.key(), message);
        return req
            .fail_with_status_error(CONDITION_TYPE_SPEC_VALID, Error::ValidationError(message))
            .await;
    }
    req.clear_condition(CONDITION_TYPE_SPEC_VALID);
    StepResult::Proceed
}

async fn ensure_ingress(req: &mut Request<Router>) -> StepResult {
    let check = CheckRunner::start(req, CHECK_INGRESS);

    let desired = match to_dynamic(&build_ingress(req.object())) {
        Ok(desired) => desired,
        Err(e) => return check.failed(req, e).await,
    };
    let owned = ingress_ref(req.object());
    if let Err(e) = req.create_or_update(owned, &desired).await {
        return check.failed(req, e).await;
    }

    check.completed(req).await
}

async fn ensure_address(req: &mut Request<Router>) -> StepResult {
    let check = CheckRunner::start(req, CHECK_ADDRESS);

    let owned = ingress_ref(req.object());
    let observed = match req.store().get_owned(&owned).await {
        Ok(observed) => observed,
        Err(e) => return check.failed(req, e).await,
    };

    match observed.as_ref().and_then(ingress_address) {
        Some(address) => {
            req.object_mut()
                .status
                .get_or_insert_with(Default::default)
                .address = Some(address);
            check.completed(req).await
        }
        None => {
            check
                .still_running(req, "waiting for the ingress controller to publish an address")
                .await
        }
    }
}
