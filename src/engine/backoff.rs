//! Requeue backoff for failed reconcile attempts
//!
//! Checks that report `still_running` requeue at a constant interval. Attempts
//! that fail back off exponentially per object key until one succeeds.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;

use super::resource::ObjectKey;

/// Exponential backoff: `base * 2^attempt`, capped at `max`
///
/// `attempt` is 0-indexed. Growth stops after 2^10 so large attempt counts
/// cannot overflow.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.min(10));
    base.saturating_mul(factor).min(max)
}

/// Spread a delay by up to +/-10% so failing keys do not retry in lockstep
pub fn with_jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    let spread = millis / 10;
    if spread == 0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(0..=spread * 2);
    Duration::from_millis(millis - spread + offset)
}

/// Consecutive failures per object key
#[derive(Debug, Default)]
pub struct FailureTracker {
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl FailureTracker {
    /// Record a failure and return the number of failures before this one
    pub fn record_failure(&self, key: &ObjectKey) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        let previous = *count;
        *count = count.saturating_add(1);
        previous
    }

    pub fn reset(&self, key: &ObjectKey) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(key).copied().unwrap_or(0)
    }
}
