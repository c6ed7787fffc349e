//! Prometheus metrics for hosted controllers
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `converge_reconcile_duration_seconds` (histogram): attempt duration labeled by controller.
//! - `converge_reconcile_errors_total` (counter): failed attempts labeled by controller and kind.
//! - `converge_step_results_total` (counter): final attempt outcome labeled by controller and outcome.
//! - `converge_check_transitions_total` (counter): check closes labeled by controller, check and state.
//! - `converge_checks_errored` (gauge): checks currently errored, labeled by controller and check.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "router"
    pub controller: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "check", "validation"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub controller: String,
    /// "proceed", "requeue", "halt" or "fail"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CheckLabels {
    pub controller: String,
    pub check: String,
    pub state: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErroredCheckLabels {
    pub controller: String,
    pub check: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static STEP_RESULTS_TOTAL: Lazy<Family<OutcomeLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CHECK_TRANSITIONS_TOTAL: Lazy<Family<CheckLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CHECKS_ERRORED: Lazy<Family<ErroredCheckLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// (controller, object, check) triples this process counted in `CHECKS_ERRORED`
static COUNTED_ERRORED: Lazy<Mutex<HashSet<(String, String, String)>>> =
    Lazy::new(|| Mutex::new(HashSet::new()));

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "converge_reconcile_duration_seconds",
        "Duration of reconcile attempts in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "converge_reconcile_errors",
        "Total number of failed reconcile attempts",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "converge_step_results",
        "Final step result of each reconcile attempt",
        STEP_RESULTS_TOTAL.clone(),
    );
    registry.register(
        "converge_check_transitions",
        "Checks closed, by resulting state",
        CHECK_TRANSITIONS_TOTAL.clone(),
    );
    registry.register(
        "converge_checks_errored",
        "Checks currently in the errored state",
        CHECKS_ERRORED.clone(),
    );

    registry
});

pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_step_result(controller: &str, outcome: &str) {
    let labels = OutcomeLabels {
        controller: controller.to_string(),
        outcome: outcome.to_string(),
    };
    STEP_RESULTS_TOTAL.get_or_create(&labels).inc();
}

/// Count a check close and keep the errored gauge in step with it
///
/// The gauge only moves for checks this process saw errored, so a check
/// persisted as errored before a restart never drives it below zero.
pub fn record_check_transition(controller: &str, object: &str, check: &str, state: &str) {
    let labels = CheckLabels {
        controller: controller.to_string(),
        check: check.to_string(),
        state: state.to_string(),
    };
    CHECK_TRANSITIONS_TOTAL.get_or_create(&labels).inc();

    let entry = (controller.to_string(), object.to_string(), check.to_string());
    let mut counted = COUNTED_ERRORED.lock().unwrap_or_else(|e| e.into_inner());
    let moved = if state == "errored" {
        counted.insert(entry).then_some(1)
    } else {
        counted.remove(&entry).then_some(-1)
    };
    if let Some(delta) = moved {
        let errored = ErroredCheckLabels {
            controller: controller.to_string(),
            check: check.to_string(),
        };
        CHECKS_ERRORED.get_or_create(&errored).inc_by(delta);
    }
}

/// Drop every errored check counted for an object that is going away
pub fn forget_object(controller: &str, object: &str) {
    let mut counted = COUNTED_ERRORED.lock().unwrap_or_else(|e| e.into_inner());
    counted.retain(|(c, o, check)| {
        if c == controller && o == object {
            let errored = ErroredCheckLabels {
                controller: c.clone(),
                check: check.clone(),
            };
            CHECKS_ERRORED.get_or_create(&errored).dec();
            false
        } else {
            true
        }
    });
}
