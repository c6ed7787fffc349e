//! Kubernetes objects owned by a Router

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};

use crate::crd::{ResourceRef, Router};
use crate::engine::finalizers::MANAGED_BY_LABEL;

/// Standard labels for objects created for a Router
pub fn standard_labels(router: &Router) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "router".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), router.name_any());
    labels.insert(
        MANAGED_BY_LABEL.to_string(),
        "converge-operator".to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(router: &Router) -> OwnerReference {
    OwnerReference {
        api_version: Router::api_version(&()).to_string(),
        kind: Router::kind(&()).to_string(),
        name: router.name_any(),
        uid: router.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn ingress_ref(router: &Router) -> ResourceRef {
    ResourceRef::for_object::<Ingress>(router.namespace(), router.name_any())
}

pub fn build_ingress(router: &Router) -> Ingress {
    let spec = &router.spec;

    // Merge user-provided annotations with cert-manager issuer hints
    let mut annotations = spec.annotations.clone().unwrap_or_default();
    if let Some(issuer) = &spec.cert_manager_issuer {
        annotations.insert(
            "cert-manager.io/cluster-issuer".to_string(),
            issuer.clone(),
        );
    }

    let rules: Vec<IngressRule> = spec
        .hosts
        .iter()
        .map(|host| IngressRule {
            host: Some(host.host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: host
                    .paths
                    .iter()
                    .map(|p| HTTPIngressPath {
                        path: Some(p.path.clone()),
                        path_type: p.path_type.clone().unwrap_or_else(|| "Prefix".to_string()),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: spec.backend_service.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(spec.backend_port),
                                    name: None,
                                }),
                            }),
                            ..Default::default()
                        },
                    })
                    .collect(),
            }),
        })
        .collect();

    let tls = spec.tls_secret_name.as_ref().map(|secret| {
        vec![IngressTLS {
            hosts: Some(spec.hosts.iter().map(|h| h.host.clone()).collect()),
            secret_name: Some(secret.clone()),
        }]
    });

    Ingress {
        metadata: ObjectMeta {
            name: Some(router.name_any()),
            namespace: router.namespace(),
            labels: Some(standard_labels(router)),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(router)]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: spec.ingress_class.clone(),
            rules: Some(rules),
            tls,
            ..Default::default()
        }),
        status: None,
    }
}

/// First address the ingress controller published, IP preferred over hostname
pub fn ingress_address(ingress: &DynamicObject) -> Option<String> {
    let first = ingress
        .data
        .pointer("/status/loadBalancer/ingress/0")?;
    first
        .get("ip")
        .or_else(|| first.get("hostname"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
