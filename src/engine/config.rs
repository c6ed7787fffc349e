//! Engine configuration
//!
//! Built once at startup (see `main.rs`) and handed to the [`Manager`] and to
//! every [`Request`]; there is no package-level mutable state.
//!
//! [`Manager`]: super::Manager
//! [`Request`]: super::Request

use std::time::Duration;

/// Timing and concurrency settings shared by every hosted controller
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Requeue interval once a resource is fully reconciled
    pub steady_interval: Duration,
    /// Requeue interval while a check reports expected multi-pass convergence
    pub still_running_interval: Duration,
    /// Requeue delay after a metadata write (labels, finalizers, annotations)
    pub ensure_interval: Duration,
    /// First backoff delay for failed attempts
    pub backoff_base: Duration,
    /// Backoff cap for failed attempts
    pub backoff_max: Duration,
    /// Upper bound on keys reconciled in parallel; 0 means unbounded
    pub max_concurrent_reconciles: u16,
    /// Field manager recorded on every write
    pub field_manager: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            steady_interval: Duration::from_secs(300),
            still_running_interval: Duration::from_secs(5),
            ensure_interval: Duration::from_secs(1),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            max_concurrent_reconciles: 4,
            field_manager: "converge-operator".to_string(),
        }
    }
}
