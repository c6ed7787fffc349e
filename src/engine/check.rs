//! Check lifecycle: start, then exactly one of failed / still running / completed

use chrono::Utc;

use super::request::Request;
use super::resource::Reconcilable;
use super::step::StepResult;
use crate::crd::{Check, CheckState};
use crate::error::Error;

/// An open check for the current attempt
///
/// Closing consumes the runner, so a check cannot be closed twice.
#[must_use = "a started check must be closed with failed, still_running or completed"]
pub struct CheckRunner {
    name: String,
    check: Check,
}

impl CheckRunner {
    /// Open a check at the object's current generation
    ///
    /// `startedAt` is carried over while the check keeps running at the same
    /// generation, so it tells how long convergence has been going on.
    pub fn start<K: Reconcilable>(req: &mut Request<K>, name: impl Into<String>) -> Self {
        let name = name.into();
        let generation = req.generation();
        let previous = req.check(&name).cloned();

        let started_at = match &previous {
            Some(p) if p.generation == generation && p.started_at.is_some() => {
                p.started_at.clone()
            }
            _ => Some(Utc::now().to_rfc3339()),
        };

        let check = Check {
            generation,
            state: CheckState::Running,
            started_at,
            ..Default::default()
        };

        req.log_pre_check(&name);
        req.status_mut().checks.insert(name.clone(), check.clone());

        Self { name, check }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form detail shown next to the check
    pub fn set_info(&mut self, info: impl Into<String>) {
        self.check.info = Some(info.into());
    }

    pub fn set_debug(&mut self, debug: impl Into<String>) {
        self.check.debug = Some(debug.into());
    }

    /// Close the check as errored and fail the attempt
    pub async fn failed<K: Reconcilable>(
        mut self,
        req: &mut Request<K>,
        err: impl Into<Error>,
    ) -> StepResult {
        let err = err.into();
        let message = err.to_string();
        self.check.state = CheckState::Errored;
        self.check.status = false;
        self.check.message = Some(message.clone());
        self.check.error = Some(message);

        if let Err(write_err) = self.close(req).await {
            return StepResult::Fail(write_err);
        }
        StepResult::Fail(err)
    }

    /// Close the check as not yet converged and come back later
    pub async fn still_running<K: Reconcilable>(
        mut self,
        req: &mut Request<K>,
        reason: impl Into<String>,
    ) -> StepResult {
        self.check.state = CheckState::Running;
        self.check.status = false;
        self.check.message = Some(reason.into());
        self.check.error = None;

        if let Err(err) = self.close(req).await {
            return StepResult::Fail(err);
        }
        StepResult::Requeue(req.config().still_running_interval)
    }

    /// Close the check as passed at this generation
    pub async fn completed<K: Reconcilable>(mut self, req: &mut Request<K>) -> StepResult {
        self.check.state = CheckState::Completed;
        self.check.status = true;
        self.check.message = None;
        self.check.error = None;

        if let Err(err) = self.close(req).await {
            return StepResult::Fail(err);
        }
        StepResult::Proceed
    }

    async fn close<K: Reconcilable>(self, req: &mut Request<K>) -> crate::error::Result<()> {
        req.record_check(&self.name, self.check);
        req.log_post_check(&self.name);
        req.write_status().await
    }
}
