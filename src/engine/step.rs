//! Step results
//!
//! Every reconciliation step returns a [`StepResult`]. A pipeline keeps going
//! while steps return [`StepResult::Proceed`] and stops at the first one that
//! does not; that result becomes the answer handed back to the workqueue.

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::error::{Error, Result};

/// Outcome of one reconciliation step
#[derive(Debug)]
#[must_use = "a step result decides whether the pipeline continues"]
pub enum StepResult {
    /// Move on to the next step
    Proceed,
    /// Stop this attempt and try again after the given delay
    Requeue(Duration),
    /// Stop this attempt; the failure, if any, is already recorded on the object
    Halt,
    /// Stop this attempt and hand the error to the outer retry policy
    Fail(Error),
}

impl StepResult {
    pub fn requeue_after(delay: Duration) -> Self {
        StepResult::Requeue(delay)
    }

    pub fn fail(err: impl Into<Error>) -> Self {
        StepResult::Fail(err.into())
    }

    /// True only when the pipeline should run its next step
    pub fn should_proceed(&self) -> bool {
        matches!(self, StepResult::Proceed)
    }

    /// The error carried by a failed step
    pub fn err(&self) -> Option<&Error> {
        match self {
            StepResult::Fail(err) => Some(err),
            _ => None,
        }
    }

    /// The requeue delay, if the step asked for one
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self {
            StepResult::Requeue(delay) => Some(*delay),
            _ => None,
        }
    }

    /// Short label used in logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            StepResult::Proceed => "proceed",
            StepResult::Requeue(_) => "requeue",
            StepResult::Halt => "halt",
            StepResult::Fail(_) => "fail",
        }
    }

    /// Translate into the directive understood by the kube-rs controller
    pub fn reconciler_response(self) -> Result<Action> {
        match self {
            StepResult::Proceed | StepResult::Halt => Ok(Action::await_change()),
            StepResult::Requeue(delay) => Ok(Action::requeue(delay)),
            StepResult::Fail(err) => Err(err),
        }
    }
}

impl From<Result<()>> for StepResult {
    fn from(res: Result<()>) -> Self {
        match res {
            Ok(()) => StepResult::Proceed,
            Err(err) => StepResult::Fail(err),
        }
    }
}

/// Run a step and return from the enclosing function unless it proceeds
///
/// ```ignore
/// step!(req.ensure_finalizers(DEFAULT_FINALIZERS).await);
/// step!(ensure_ingress(&mut req).await);
/// req.done().await
/// ```
#[macro_export]
macro_rules! step {
    ($step:expr) => {{
        let result: $crate::engine::StepResult = $step;
        if !result.should_proceed() {
            return result;
        }
    }};
}
