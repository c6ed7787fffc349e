//! Convergence engine
//!
//! Hosts controllers that drive a custom resource towards its desired state
//! through a pipeline of steps. Each step returns a [`StepResult`]; the first
//! one that does not proceed ends the attempt and decides when the next one
//! runs. Progress is recorded as named checks in the resource's status.

pub mod apply;
pub mod backoff;
pub mod check;
pub mod conditions;
pub mod config;
pub mod filter;
pub mod finalizers;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod reconciler;
pub mod request;
pub mod resource;
pub mod step;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;


pub use apply::ApplyOutcome;
pub use check::CheckRunner;
pub use config::EngineConfig;
pub use filter::{dedup_events, reconcile_filter};
pub use leader::{LeaderElection, LeaderState};
pub use reconciler::{reconcile_key, Manager, Reconciler};
pub use request::Request;
pub use resource::{HasEnsuredMeta, HasStatus, ObjectKey, Reconcilable};
pub use step::StepResult;
pub use store::{KubeStore, Store};
