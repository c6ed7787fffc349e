//! Router Custom Resource Definition
//!
//! A Router exposes an in-cluster Service through an Ingress. It is the
//! reference controller hosted by the convergence engine.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Status;
use crate::engine::finalizers::MANAGED_BY_LABEL;
use crate::engine::{HasEnsuredMeta, HasStatus};

/// Structured validation error for `RouterSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.how_to_fix)
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "converge.io",
    version = "v1alpha1",
    kind = "Router",
    namespaced,
    status = "RouterStatus",
    shortname = "rt",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.isReady"}"#,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".status.address"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RouterSpec {
    /// Optional ingressClassName (e.g., "nginx", "traefik")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,

    /// Service receiving the routed traffic
    pub backend_service: String,

    #[serde(default = "default_backend_port")]
    pub backend_port: i32,

    /// Host rules with paths to route to the backend Service
    pub hosts: Vec<RouterHost>,

    /// TLS secret used for HTTPS termination; all hosts are added to it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// cert-manager cluster issuer name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_manager_issuer: Option<String>,

    /// Additional annotations to attach to the Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

fn default_backend_port() -> i32 {
    80
}

/// Host entry of a Router
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouterHost {
    /// DNS host name (e.g., "api.example.com")
    pub host: String,

    #[serde(default = "default_paths", skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<RouterPath>,
}

/// HTTP path routed to the backend
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouterPath {
    pub path: String,

    /// Prefix, Exact or ImplementationSpecific; defaults to Prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_type: Option<String>,
}

fn default_paths() -> Vec<RouterPath> {
    vec![RouterPath {
        path: "/".to_string(),
        path_type: None,
    }]
}

impl RouterSpec {
    /// Validate the spec, collecting every problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.backend_service.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.backendService",
                "backendService must not be empty",
                "Set spec.backendService to the name of a Service in the Router's namespace.",
            ));
        }

        if !(1..=65535).contains(&self.backend_port) {
            errors.push(SpecValidationError::new(
                "spec.backendPort",
                format!("backendPort {} is out of range", self.backend_port),
                "Use a port between 1 and 65535.",
            ));
        }

        if self.hosts.is_empty() {
            errors.push(SpecValidationError::new(
                "spec.hosts",
                "at least one host is required",
                "Add a spec.hosts entry with a DNS name.",
            ));
        }

        for (i, host) in self.hosts.iter().enumerate() {
            if host.host.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    format!("spec.hosts[{i}].host"),
                    "host must not be empty",
                    "Set a DNS host name such as api.example.com.",
                ));
            }
            for (j, path) in host.paths.iter().enumerate() {
                if !path.path.starts_with('/') {
                    errors.push(SpecValidationError::new(
                        format!("spec.hosts[{i}].paths[{j}].path"),
                        format!("path {:?} must start with '/'", path.path),
                        "Prefix the path with '/'.",
                    ));
                }
                if let Some(path_type) = &path.path_type {
                    if !matches!(
                        path_type.as_str(),
                        "Prefix" | "Exact" | "ImplementationSpecific"
                    ) {
                        errors.push(SpecValidationError::new(
                            format!("spec.hosts[{i}].paths[{j}].pathType"),
                            format!("unknown pathType {path_type:?}"),
                            "Use Prefix, Exact or ImplementationSpecific.",
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Status of a Router
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    #[serde(flatten)]
    pub common: Status,

    /// Address published by the ingress controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl HasStatus for Router {
    fn status(&self) -> Option<&Status> {
        self.status.as_ref().map(|s| &s.common)
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status.get_or_insert_with(Default::default).common
    }
}

impl HasEnsuredMeta for Router {
    fn ensured_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(MANAGED_BY_LABEL.to_string(), "converge-operator".to_string())])
    }
}
