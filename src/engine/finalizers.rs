//! Well-known finalizers, labels and annotations
//!
//! Finalizers keep a resource around until its controller has verified that
//! every owned object is gone. The annotations are escape hatches a human or a
//! tool can set on any reconciled object.

use std::collections::BTreeMap;

use kube::Resource;

/// Kubernetes foreground cascading deletion
pub const FOREGROUND_FINALIZER: &str = "foregroundDeletion";

/// Common cleanup finalizer added to every reconciled resource
pub const COMMON_FINALIZER: &str = "converge.io/finalizer";

/// Finalizers added by `ensure_finalizers` and removed by `finalize`
pub const DEFAULT_FINALIZERS: &[&str] = &[FOREGROUND_FINALIZER, COMMON_FINALIZER];

/// Value is the name of one check to delete from the status
pub const RESET_CHECK_ANNOTATION: &str = "converge.io/reset-check";

/// "true" clears the whole status
pub const CLEAR_STATUS_ANNOTATION: &str = "converge.io/clear-status";

/// "true" rollout-restarts every owned workload
pub const RESTART_ANNOTATION: &str = "converge.io/restart";

/// Pod template annotation `kubectl rollout restart` sets
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

/// Label put on every reconciled resource
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Check if the object is being deleted
///
/// A deletion timestamp indicates the user has requested deletion,
/// but finalizers are preventing the actual removal.
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// `current` with every name in `wanted` appended if missing; None if nothing is missing
pub fn with_finalizers(current: &[String], wanted: &[&str]) -> Option<Vec<String>> {
    let mut out = current.to_vec();
    for name in wanted {
        if !out.iter().any(|f| f == name) {
            out.push((*name).to_string());
        }
    }
    (out.len() != current.len()).then_some(out)
}

/// `current` minus every name in `unwanted`; None if none were present
pub fn without_finalizers(current: &[String], unwanted: &[&str]) -> Option<Vec<String>> {
    let out: Vec<String> = current
        .iter()
        .filter(|f| !unwanted.contains(&f.as_str()))
        .cloned()
        .collect();
    (out.len() != current.len()).then_some(out)
}

/// Overlay `wanted` on `current`; None if every wanted key already has the wanted value
pub fn merge_missing(
    current: &BTreeMap<String, String>,
    wanted: &BTreeMap<String, String>,
) -> Option<BTreeMap<String, String>> {
    let drift = wanted.iter().any(|(k, v)| current.get(k) != Some(v));
    if !drift {
        return None;
    }
    let mut merged = current.clone();
    merged.extend(wanted.iter().map(|(k, v)| (k.clone(), v.clone())));
    Some(merged)
}
