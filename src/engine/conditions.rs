//! Condition management helpers following Kubernetes API conventions
//!
//! `status.conditions` carries failures caused by the resource's own spec and
//! `status.opsConditions` carries failures of the infrastructure the operator
//! depends on. Both lists are keyed by condition type.

use chrono::Utc;

use crate::crd::Condition;

/// Spec-level condition types
pub const CONDITION_TYPE_SPEC_VALID: &str = "SpecValid";

/// Operations-level condition types
pub const CONDITION_TYPE_API_AVAILABLE: &str = "ApiAvailable";

/// Standard condition statuses
pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Upsert a condition into the list, keyed by type
///
/// The transition time only moves when the status changes. Returns true if
/// the list was modified.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status
            && existing.reason == condition.reason
            && existing.message == condition.message
            && existing.observed_generation == condition.observed_generation
        {
            return false;
        }

        if existing.status != condition.status {
            existing.last_transition_time = condition.last_transition_time;
        }
        existing.status = condition.status;
        existing.reason = condition.reason;
        existing.message = condition.message;
        existing.observed_generation = condition.observed_generation;
    } else {
        conditions.push(condition);
    }
    true
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Remove a condition by type, returning true if one was removed
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

/// Create a False condition describing a failure
pub fn failure_condition(type_: &str, reason: &str, message: &str, generation: i64) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: CONDITION_STATUS_FALSE.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: Some(generation),
    }
}

/// Create a True condition
pub fn success_condition(type_: &str, reason: &str, message: &str, generation: i64) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: CONDITION_STATUS_TRUE.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: Some(generation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        let changed = set_condition(
            &mut conditions,
            failure_condition(CONDITION_TYPE_SPEC_VALID, "Invalid", "no hosts", 1),
        );

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_TYPE_SPEC_VALID);
        assert_eq!(conditions[0].status, CONDITION_STATUS_FALSE);
    }

    #[test]
    fn test_set_condition_deduplicates() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            failure_condition(CONDITION_TYPE_SPEC_VALID, "Invalid", "no hosts", 1),
        );
        let changed = set_condition(
            &mut conditions,
            failure_condition(CONDITION_TYPE_SPEC_VALID, "Invalid", "no hosts", 1),
        );

        assert!(!changed);
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_transition_time_moves_only_on_status_change() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_API_AVAILABLE.to_string(),
            status: CONDITION_STATUS_FALSE.to_string(),
            last_transition_time: "2024-01-01T00:00:00Z".to_string(),
            reason: "Timeout".to_string(),
            message: "api timed out".to_string(),
            observed_generation: Some(1),
        }];

        set_condition(
            &mut conditions,
            failure_condition(CONDITION_TYPE_API_AVAILABLE, "Timeout", "api timed out again", 1),
        );
        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert_eq!(conditions[0].message, "api timed out again");

        set_condition(
            &mut conditions,
            success_condition(CONDITION_TYPE_API_AVAILABLE, "Reachable", "ok", 1),
        );
        assert_ne!(conditions[0].last_transition_time, "2024-01-01T00:00:00Z");
        assert!(is_condition_true(&conditions, CONDITION_TYPE_API_AVAILABLE));
    }

    #[test]
    fn test_remove_condition() {
        let mut conditions = vec![failure_condition(CONDITION_TYPE_SPEC_VALID, "Invalid", "x", 1)];
        assert!(remove_condition(&mut conditions, CONDITION_TYPE_SPEC_VALID));
        assert!(!remove_condition(&mut conditions, CONDITION_TYPE_SPEC_VALID));
        assert!(find_condition(&conditions, CONDITION_TYPE_SPEC_VALID).is_none());
    }
}
