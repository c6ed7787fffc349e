//! The per-attempt reconcile context
//!
//! A [`Request`] is built from a freshly fetched object at the start of every
//! attempt and dropped at its end. It is never shared between tasks and never
//! outlives the attempt, so it can hold the object by value without locking.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::apply::{self, ApplyOutcome};
use super::conditions::{failure_condition, remove_condition, set_condition};
use super::config::EngineConfig;
use super::finalizers::{
    is_being_deleted, merge_missing, with_finalizers, without_finalizers,
    CLEAR_STATUS_ANNOTATION, DEFAULT_FINALIZERS, RESET_CHECK_ANNOTATION, RESTART_ANNOTATION,
};
use super::resource::{generation_of, ObjectKey, Reconcilable};
use super::step::StepResult;
use super::store::Store;
use super::check::CheckRunner;
use crate::crd::{Check, CheckMeta, CheckState, ResourceRef, Status};
use crate::error::{Error, Result};

static EMPTY_STATUS: Status = Status {
    is_ready: false,
    checks: BTreeMap::new(),
    message: BTreeMap::new(),
    conditions: Vec::new(),
    ops_conditions: Vec::new(),
    check_list: Vec::new(),
    resources: Vec::new(),
    last_reconcile_time: None,
};

/// The serialized `status` of an object, including resource-specific fields
fn status_snapshot<K: Reconcilable>(obj: &K) -> Option<Value> {
    serde_json::to_value(obj).ok()?.get_mut("status").map(Value::take)
}

/// Namespace metadata keys owned by Kubernetes itself are never propagated
fn is_propagated_key(key: &str) -> bool {
    !key.contains("kubernetes.io/")
}

/// Context for one reconcile attempt of one object
pub struct Request<K: Reconcilable> {
    object: K,
    key: ObjectKey,
    store: Arc<dyn Store<K>>,
    config: Arc<EngineConfig>,
    controller: &'static str,
    persisted_status: Option<Value>,
    locals: HashMap<String, Box<dyn Any + Send + Sync>>,
    check_timers: HashMap<String, Instant>,
}

impl<K: Reconcilable> Request<K> {
    /// Fetch the object behind `key` and open an attempt for it
    ///
    /// Returns `Ok(None)` if the object no longer exists; callers treat that
    /// as a finished reconcile, not as an error.
    pub async fn new(
        store: Arc<dyn Store<K>>,
        key: &ObjectKey,
        config: Arc<EngineConfig>,
        controller: &'static str,
    ) -> Result<Option<Self>> {
        let Some(mut object) = store.get(key).await? else {
            debug!("{} not found, nothing to reconcile", key);
            return Ok(None);
        };
        let persisted_status = status_snapshot(&object);
        object.status_mut();

        Ok(Some(Self {
            object,
            key: key.clone(),
            store,
            config,
            controller,
            persisted_status,
            locals: HashMap::new(),
            check_timers: HashMap::new(),
        }))
    }

    pub fn object(&self) -> &K {
        &self.object
    }

    pub fn object_mut(&mut self) -> &mut K {
        &mut self.object
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn controller(&self) -> &'static str {
        self.controller
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn Store<K> {
        self.store.as_ref()
    }

    pub fn generation(&self) -> i64 {
        generation_of(&self.object)
    }

    pub fn status(&self) -> &Status {
        self.object.status().unwrap_or(&EMPTY_STATUS)
    }

    pub fn status_mut(&mut self) -> &mut Status {
        self.object.status_mut()
    }

    pub fn check(&self, name: &str) -> Option<&Check> {
        self.status().checks.get(name)
    }

    pub fn is_being_deleted(&self) -> bool {
        is_being_deleted(&self.object)
    }

    // ----------------------------------------------------------------------
    // Locals: attempt-scoped values passed from one step to a later one
    // ----------------------------------------------------------------------

    pub fn set_local<V: Any + Send + Sync>(&mut self, key: impl Into<String>, value: V) {
        self.locals.insert(key.into(), Box::new(value));
    }

    pub fn local<V: Any>(&self, key: &str) -> Option<&V> {
        self.locals.get(key).and_then(|v| v.downcast_ref::<V>())
    }

    pub fn take_local<V: Any>(&mut self, key: &str) -> Option<V> {
        let value = self.locals.remove(key)?;
        match value.downcast::<V>() {
            Ok(v) => Some(*v),
            Err(original) => {
                self.locals.insert(key.to_string(), original);
                None
            }
        }
    }

    // ----------------------------------------------------------------------
    // Logging
    // ----------------------------------------------------------------------

    pub fn log_pre_check(&mut self, check: &str) {
        self.check_timers.insert(check.to_string(), Instant::now());
        debug!(
            controller = self.controller,
            object = %self.key,
            generation = self.generation(),
            check,
            "check started"
        );
    }

    pub fn log_post_check(&mut self, check: &str) {
        let elapsed_ms = self
            .check_timers
            .remove(check)
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let state = self
            .check(check)
            .map(|c| c.state)
            .unwrap_or_default();
        info!(
            controller = self.controller,
            object = %self.key,
            generation = self.generation(),
            check,
            %state,
            elapsed_ms,
            "check finished"
        );
    }

    // ----------------------------------------------------------------------
    // Persistence
    // ----------------------------------------------------------------------

    /// Replace in-memory state with what the server returned, keeping unsaved status edits
    fn absorb(&mut self, updated: K, keep_status: bool) -> Result<()> {
        self.persisted_status = status_snapshot(&updated);
        let pending = if keep_status {
            status_snapshot(&self.object)
        } else {
            None
        };
        self.object = match pending {
            Some(status) => {
                let mut value = serde_json::to_value(&updated)?;
                value["status"] = status;
                serde_json::from_value(value)?
            }
            None => updated,
        };
        self.object.status_mut();
        Ok(())
    }

    fn status_dirty(&self) -> bool {
        status_snapshot(&self.object) != self.persisted_status
    }

    /// Write the status subresource if it differs from the last persisted one
    pub(crate) async fn write_status(&mut self) -> Result<()> {
        self.object.status_mut().prune_messages();
        if !self.status_dirty() {
            return Ok(());
        }
        let updated = self.store.replace_status(&self.object).await?;
        self.absorb(updated, false)
    }

    /// Write metadata and spec; unsaved status edits survive the write
    async fn write_object(&mut self) -> Result<()> {
        let updated = self.store.replace(&self.object).await?;
        self.absorb(updated, true)
    }

    /// Persist the full status, pruning failure text of passing checks
    pub async fn update_status(&mut self) -> StepResult {
        self.write_status().await.into()
    }

    // ----------------------------------------------------------------------
    // Ensure steps
    // ----------------------------------------------------------------------

    /// Make sure a placeholder exists for every named check
    pub async fn ensure_checks(&mut self, names: &[&str]) -> StepResult {
        let status = self.object.status_mut();
        let mut changed = false;
        for name in names {
            if !status.checks.contains_key(*name) {
                status.checks.insert((*name).to_string(), Check::default());
                changed = true;
            }
        }
        if !changed {
            return StepResult::Proceed;
        }
        self.write_status().await.into()
    }

    /// Record the declared order and titles of the controller's checks
    pub async fn ensure_check_list(&mut self, list: &[CheckMeta]) -> StepResult {
        if self.status().check_list == list {
            return StepResult::Proceed;
        }
        self.object.status_mut().check_list = list.to_vec();
        self.write_status().await.into()
    }

    /// Enforce the label/annotation baseline
    ///
    /// The baseline is the parent namespace's labels and annotations overlaid
    /// with the resource's own ensured set. A write ends the attempt; the
    /// write itself triggers the next one.
    pub async fn ensure_labels_and_annotations(&mut self) -> StepResult {
        let mut wanted_labels = BTreeMap::new();
        let mut wanted_annotations = BTreeMap::new();

        if let Some(namespace) = self.object.namespace() {
            match self.store.namespace_meta(&namespace).await {
                Ok(Some(meta)) => {
                    wanted_labels.extend(
                        meta.labels
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|(k, _)| is_propagated_key(k)),
                    );
                    wanted_annotations.extend(
                        meta.annotations
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|(k, _)| is_propagated_key(k)),
                    );
                }
                Ok(None) => {}
                Err(err) => return StepResult::Fail(err),
            }
        }
        wanted_labels.extend(self.object.ensured_labels());
        wanted_annotations.extend(self.object.ensured_annotations());

        let labels = merge_missing(self.object.labels(), &wanted_labels);
        let annotations = merge_missing(self.object.annotations(), &wanted_annotations);
        if labels.is_none() && annotations.is_none() {
            return StepResult::Proceed;
        }

        if let Some(labels) = labels {
            *self.object.labels_mut() = labels;
        }
        if let Some(annotations) = annotations {
            *self.object.annotations_mut() = annotations;
        }
        if let Err(err) = self.write_object().await {
            return StepResult::Fail(err);
        }
        info!(object = %self.key, "ensured labels and annotations");
        StepResult::Requeue(self.config.ensure_interval)
    }

    /// Add any missing finalizer; a write ends the attempt
    pub async fn ensure_finalizers(&mut self, names: &[&str]) -> StepResult {
        if self.is_being_deleted() {
            return StepResult::Proceed;
        }
        let Some(finalizers) = with_finalizers(self.object.finalizers(), names) else {
            return StepResult::Proceed;
        };
        *self.object.finalizers_mut() = finalizers;
        if let Err(err) = self.write_object().await {
            return StepResult::Fail(err);
        }
        info!(object = %self.key, "ensured finalizers");
        StepResult::Requeue(self.config.ensure_interval)
    }

    /// Drop the engine's finalizers so the API server can finish deletion
    pub async fn finalize(&mut self) -> StepResult {
        let Some(finalizers) = without_finalizers(self.object.finalizers(), DEFAULT_FINALIZERS)
        else {
            return StepResult::Halt;
        };
        *self.object.finalizers_mut() = finalizers;
        match self.write_object().await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return StepResult::Fail(err),
        }
        #[cfg(feature = "metrics")]
        super::metrics::forget_object(self.controller, &self.key.to_string());
        info!(object = %self.key, "finalizers removed");
        StepResult::Halt
    }

    // ----------------------------------------------------------------------
    // Operator escape hatches
    // ----------------------------------------------------------------------

    /// Reset one check or the whole status when asked to through annotations
    pub async fn clear_status_if_annotated(&mut self) -> StepResult {
        let annotations = self.object.annotations();
        let reset_check = annotations.get(RESET_CHECK_ANNOTATION).cloned();
        let clear_flag = annotations.get(CLEAR_STATUS_ANNOTATION).cloned();
        if reset_check.is_none() && clear_flag.is_none() {
            return StepResult::Proceed;
        }

        if clear_flag.as_deref() == Some("true") {
            warn!(object = %self.key, "clearing status on request");
            *self.object.status_mut() = Status::default();
        } else if let Some(check) = &reset_check {
            warn!(object = %self.key, check = %check, "resetting check on request");
            let status = self.object.status_mut();
            status.checks.remove(check);
            status.message.remove(check);
        }
        if let Err(err) = self.write_status().await {
            return StepResult::Fail(err);
        }

        let annotations = self.object.annotations_mut();
        annotations.remove(RESET_CHECK_ANNOTATION);
        annotations.remove(CLEAR_STATUS_ANNOTATION);
        if let Err(err) = self.write_object().await {
            return StepResult::Fail(err);
        }
        StepResult::Requeue(self.config.ensure_interval)
    }

    /// Rollout-restart owned workloads when asked to through an annotation
    pub async fn restart_if_annotated(&mut self) -> StepResult {
        let Some(flag) = self.object.annotations().get(RESTART_ANNOTATION).cloned() else {
            return StepResult::Proceed;
        };

        if flag == "true" {
            let workloads: Vec<ResourceRef> = self
                .status()
                .resources
                .iter()
                .filter(|r| r.is_restartable())
                .cloned()
                .collect();
            for workload in &workloads {
                if let Err(err) = self.store.restart(workload).await {
                    return StepResult::Fail(err);
                }
            }
            info!(object = %self.key, count = workloads.len(), "restarted owned workloads");
        }

        self.object.annotations_mut().remove(RESTART_ANNOTATION);
        if let Err(err) = self.write_object().await {
            return StepResult::Fail(err);
        }
        StepResult::Requeue(self.config.ensure_interval)
    }

    // ----------------------------------------------------------------------
    // Failure reporting
    // ----------------------------------------------------------------------

    /// Store a check outcome in memory; persisted by the next status write
    pub(crate) fn record_check(&mut self, name: &str, check: Check) {
        #[cfg(feature = "metrics")]
        super::metrics::record_check_transition(
            self.controller,
            &self.key.to_string(),
            name,
            &check.state.to_string(),
        );
        let status = self.object.status_mut();
        if check.status {
            status.message.remove(name);
        } else {
            if let Some(msg) = &check.message {
                status.message.insert(name.to_string(), msg.clone());
            }
            status.is_ready = false;
        }
        status.checks.insert(name.to_string(), check);
    }

    /// Record a failed check without going through a [`CheckRunner`]
    pub async fn check_failed(
        &mut self,
        name: &str,
        mut check: Check,
        message: impl Into<String>,
    ) -> StepResult {
        let message = message.into();
        check.status = false;
        check.state = CheckState::Errored;
        check.generation = self.generation();
        check.message = Some(message.clone());
        check.error = Some(message.clone());
        self.record_check(name, check);
        if let Err(err) = self.write_status().await {
            return StepResult::Fail(err);
        }
        StepResult::Fail(Error::check_failed(name, message))
    }

    /// Surface a problem with the resource's own spec
    pub async fn fail_with_status_error(&mut self, condition_type: &str, err: Error) -> StepResult {
        let condition = failure_condition(condition_type, err.kind(), &err.to_string(), self.generation());
        let status = self.object.status_mut();
        set_condition(&mut status.conditions, condition);
        status.is_ready = false;
        if let Err(write_err) = self.write_status().await {
            return StepResult::Fail(write_err);
        }
        StepResult::Fail(err)
    }

    /// Surface a problem with infrastructure the controller depends on
    pub async fn fail_with_op_error(&mut self, condition_type: &str, err: Error) -> StepResult {
        let condition = failure_condition(condition_type, err.kind(), &err.to_string(), self.generation());
        let status = self.object.status_mut();
        set_condition(&mut status.ops_conditions, condition);
        status.is_ready = false;
        if let Err(write_err) = self.write_status().await {
            return StepResult::Fail(write_err);
        }
        StepResult::Fail(err)
    }

    /// Forget a previously reported condition of the given type (persisted with the next status write)
    pub fn clear_condition(&mut self, condition_type: &str) {
        let status = self.object.status_mut();
        remove_condition(&mut status.conditions, condition_type);
        remove_condition(&mut status.ops_conditions, condition_type);
    }

    // ----------------------------------------------------------------------
    // Owned resources
    // ----------------------------------------------------------------------

    /// Remember an owned object so deletion can clean it up
    pub fn track_owned(&mut self, owned: ResourceRef) {
        let resources = &mut self.object.status_mut().resources;
        if !resources.contains(&owned) {
            resources.push(owned);
        }
    }

    /// Create or update an owned object and track it
    pub async fn create_or_update(
        &mut self,
        owned: ResourceRef,
        desired: &DynamicObject,
    ) -> Result<ApplyOutcome> {
        let outcome = apply::create_or_update(self.store.as_ref(), &owned, desired).await?;
        if outcome != ApplyOutcome::Unchanged {
            info!(object = %self.key, owned = %owned, ?outcome, "applied owned resource");
        }
        self.track_owned(owned);
        Ok(outcome)
    }

    /// Delete owned objects and wait until every one of them is gone
    ///
    /// Absent objects count as cleaned. Every present object whose deletion
    /// has not started yet is deleted in the same pass; while any of them is
    /// still present the check fails with the list of remaining objects.
    pub async fn cleanup_owned_resources(
        &mut self,
        check_name: &str,
        owned: &[ResourceRef],
    ) -> StepResult {
        let check = CheckRunner::start(self, check_name);
        let mut remaining = Vec::new();
        for resource in owned {
            let observed = match self.store.get_owned(resource).await {
                Ok(observed) => observed,
                Err(err) => return check.failed(self, err).await,
            };
            let Some(observed) = observed else {
                continue;
            };
            if observed.metadata.deletion_timestamp.is_none() {
                if let Err(err) = self.store.delete_owned(resource).await {
                    return check.failed(self, err).await;
                }
            }
            remaining.push(resource.to_string());
        }
        if remaining.is_empty() {
            return check.completed(self).await;
        }
        let message = format!("waiting for deletion of resource {}", remaining.join(", "));
        check
            .failed(self, Error::check_failed(check_name, message))
            .await
    }

    // ----------------------------------------------------------------------
    // End of pipeline
    // ----------------------------------------------------------------------

    /// Mark the attempt as fully converged and schedule the steady-state requeue
    ///
    /// `isReady` only counts checks verified at the current generation.
    /// `lastReconcileTime` moves only when the status changed, so an attempt
    /// that finds nothing to do writes nothing.
    pub async fn done(&mut self) -> StepResult {
        let generation = self.generation();
        let status = self.object.status_mut();
        status.is_ready = status.all_checks_pass(generation);
        status.prune_messages();
        if self.status_dirty() {
            self.object.status_mut().last_reconcile_time = Some(Utc::now().to_rfc3339());
        }
        if let Err(err) = self.write_status().await {
            return StepResult::Fail(err);
        }
        debug!(
            object = %self.key,
            ready = self.status().is_ready,
            "reconcile attempt done"
        );
        StepResult::Requeue(self.config.steady_interval)
    }
}
