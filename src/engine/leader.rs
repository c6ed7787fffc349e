//! Lease-based leader election
//!
//! Every replica runs the watch streams so its cache stays warm, but only the
//! replica holding the lease acts on the workqueue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{info, warn};

pub const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Shared view of whether this replica currently leads
#[derive(Clone, Debug)]
pub struct LeaderState(Arc<AtomicBool>);

impl LeaderState {
    /// A replica that always leads; used when election is disabled
    pub fn always() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn follower() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, leading: bool) {
        self.0.store(leading, Ordering::Relaxed);
    }
}

pub struct LeaderElection {
    leases: Api<Lease>,
    namespace: String,
    lease_name: String,
    identity: String,
    state: LeaderState,
}

impl LeaderElection {
    pub fn new(client: Client, namespace: &str, lease_name: &str, identity: &str) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            lease_name: lease_name.to_string(),
            identity: identity.to_string(),
            state: LeaderState::follower(),
        }
    }

    pub fn state(&self) -> LeaderState {
        self.state.clone()
    }

    /// Acquire and renew the lease until the task is dropped
    pub fn spawn(self) -> LeaderState {
        let state = self.state();
        tokio::spawn(async move { self.run().await });
        state
    }

    async fn run(self) {
        info!("Leader election using holder ID: {}", self.identity);
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    if !self.state.is_leader() {
                        info!("Acquired leadership for lease {}", self.lease_name);
                    }
                    self.state.set(true);
                    tokio::time::sleep(RENEW_INTERVAL).await;
                }
                Ok(false) => {
                    if self.state.is_leader() {
                        warn!("Lost leadership for lease {}", self.lease_name);
                    }
                    self.state.set(false);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!("Leader election error: {:?}", e);
                    self.state.set(false);
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();

        let Some(existing) = self.leases.get_opt(&self.lease_name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.lease_name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.identity.clone()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_duration_seconds: Some(LEASE_DURATION_SECS),
                    ..Default::default()
                }),
            };
            self.leases.create(&PostParams::default(), &lease).await?;
            info!("Created lease {} with holder {}", self.lease_name, self.identity);
            return Ok(true);
        };

        let Some(patch) = lease_patch(&existing, &self.identity, now) else {
            return Ok(false);
        };
        match self
            .leases
            .patch(&self.lease_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                info!("Lease {} was updated concurrently, not leading", self.lease_name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// The merge patch that renews or takes over `existing`; None while another holder is live
///
/// The patch carries the observed `resourceVersion`, so of two replicas
/// racing for an expired lease only the first write succeeds.
fn lease_patch(existing: &Lease, identity: &str, now: DateTime<Utc>) -> Option<serde_json::Value> {
    let spec = existing.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());
    let resource_version = existing.metadata.resource_version.clone();

    if holder == Some(identity) {
        Some(serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        }))
    } else if lease_expired(spec, now) {
        info!("Lease held by {:?} has expired, taking over", holder);
        Some(serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": {
                "holderIdentity": identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        }))
    } else {
        None
    }
}

/// A lease without a renew time counts as expired
fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renew) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renew.0 + chrono::Duration::seconds(duration as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        assert!(lease_expired(None, now));

        let fresh = LeaseSpec {
            renew_time: Some(MicroTime(now - chrono::Duration::seconds(5))),
            lease_duration_seconds: Some(15),
            ..Default::default()
        };
        assert!(!lease_expired(Some(&fresh), now));

        let stale = LeaseSpec {
            renew_time: Some(MicroTime(now - chrono::Duration::seconds(30))),
            lease_duration_seconds: Some(15),
            ..Default::default()
        };
        assert!(lease_expired(Some(&stale), now));
    }

    fn lease(holder: &str, renewed_secs_ago: i64, now: DateTime<Utc>) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some("leader".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(holder.to_string()),
                renew_time: Some(MicroTime(now - chrono::Duration::seconds(renewed_secs_ago))),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_takeover_is_conditional_on_observed_version() {
        let now = Utc::now();
        let patch = lease_patch(&lease("other", 60, now), "me", now).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["spec"]["holderIdentity"], "me");
    }

    #[test]
    fn test_renew_keeps_holder() {
        let now = Utc::now();
        let patch = lease_patch(&lease("me", 5, now), "me", now).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert!(patch["spec"].get("holderIdentity").is_none());
    }

    #[test]
    fn test_live_lease_of_another_holder_is_left_alone() {
        let now = Utc::now();
        assert!(lease_patch(&lease("other", 5, now), "me", now).is_none());
    }

    #[test]
    fn test_leader_state() {
        assert!(LeaderState::always().is_leader());
        let follower = LeaderState::follower();
        assert!(!follower.is_leader());
        follower.set(true);
        assert!(follower.clone().is_leader());
    }
}
