//! Shared types for reconciled custom resources
//!
//! Every CRD hosted by the engine flattens [`Status`] into its own status
//! struct, so the check map, readiness flag and condition lists look the same
//! on every resource.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single check
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum CheckState {
    #[default]
    Waiting,
    Running,
    Errored,
    Completed,
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckState::Waiting => write!(f, "waiting"),
            CheckState::Running => write!(f, "running"),
            CheckState::Errored => write!(f, "errored"),
            CheckState::Completed => write!(f, "completed"),
        }
    }
}

/// Persisted outcome of one named sub-goal
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Check {
    /// Whether the check passed
    #[serde(default)]
    pub status: bool,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The `.metadata.generation` this check was verified against
    #[serde(default)]
    pub generation: i64,

    #[serde(default)]
    pub state: CheckState,

    /// RFC3339 time the check started running for this generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Check {
    /// A check is only valid for the generation it was verified against
    pub fn is_current(&self, generation: i64) -> bool {
        self.generation == generation
    }

    /// Passed, and verified against the given generation
    pub fn passed_at(&self, generation: i64) -> bool {
        self.status && self.is_current(generation)
    }
}

/// Declared ordering and display metadata for a check
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckMeta {
    pub name: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug: bool,
}

impl CheckMeta {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Reference to an object a controller created on behalf of its parent
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// e.g. "networking.k8s.io/v1"
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace,
            name: name.into(),
        }
    }

    /// Build a reference to a typed Kubernetes object
    pub fn for_object<K>(namespace: Option<String>, name: impl Into<String>) -> Self
    where
        K: kube::Resource<DynamicType = ()>,
    {
        Self::new(
            K::api_version(&()).to_string(),
            K::kind(&()).to_string(),
            namespace,
            name,
        )
    }

    /// Split the apiVersion into (group, version); the core group is ""
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    /// Workloads that can be rollout-restarted
    pub fn is_restartable(&self) -> bool {
        self.group_version().0 == "apps"
            && matches!(
                self.kind.as_str(),
                "Deployment" | "StatefulSet" | "DaemonSet"
            )
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {}/{}", self.api_version, self.kind, ns, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// Condition following Kubernetes API conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "SpecValid", "ApiAvailable")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation the condition was set based upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Status shared by every reconciled resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default)]
    pub is_ready: bool,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, Check>,

    /// Failure text per check, pruned once the check passes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message: BTreeMap<String, String>,

    /// Failures caused by the resource's own spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Failures caused by infrastructure the operator depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops_conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_list: Vec<CheckMeta>,

    /// Objects owned by this resource, cleaned up before finalizers are removed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,
}

impl Status {
    /// True when there is at least one check and every check passed at `generation`
    pub fn all_checks_pass(&self, generation: i64) -> bool {
        !self.checks.is_empty() && self.checks.values().all(|c| c.passed_at(generation))
    }

    /// Names of checks verified against an older generation
    pub fn stale_checks(&self, generation: i64) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|(_, c)| !c.is_current(generation))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Drop failure text for checks that pass
    pub fn prune_messages(&mut self) {
        let checks = &self.checks;
        self.message
            .retain(|name, _| !checks.get(name).map(|c| c.status).unwrap_or(false));
    }
}
