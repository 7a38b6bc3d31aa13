/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Stack Resolver Module
//!
//! Resolves a pod to the release (Helm, ArgoCD, Flux) it belongs to.
//! Resolution walks a deterministic decision table over annotations,
//! labels, and finally the pod naming convention; first match wins.
//! Same inputs always produce the same `ReleaseInfo`.
//!
//! When a backend inference endpoint is configured and the local
//! confidence is below the configured threshold, a single remote call
//! may be made under a hard deadline; its answer is adopted only when
//! it is more confident than the local one, and any failure falls back
//! to the local result silently.

use crate::backend::{BackendClient, ReleaseInferenceRequest};
use heimdall_models::models::pod::PodRecord;
use heimdall_models::models::release::ReleaseInfo;
use heimdall_utils::config::Inference;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const HELM_RELEASE_ANNOTATION: &str = "meta.helm.sh/release-name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
const NAME_LABEL: &str = "app.kubernetes.io/name";
const HERITAGE_LABEL: &str = "heritage";
const RELEASE_LABEL: &str = "release";
const CHART_LABEL: &str = "helm.sh/chart";
const APP_LABEL: &str = "app";
const ARGOCD_INSTANCE_LABEL: &str = "argocd.argoproj.io/instance";
const FLUX_NAME_LABEL: &str = "helm.toolkit.fluxcd.io/name";

/// Resolves a pod's release from labels, annotations, and naming.
/// Deterministic; first match in the decision table wins.
pub fn resolve_local(pod: &PodRecord) -> ReleaseInfo {
    // Helm's own release annotation is the strongest signal.
    if let Some(name) = non_empty(pod.annotations.get(HELM_RELEASE_ANNOTATION)) {
        return ReleaseInfo::from_annotation(name, 0.98, HELM_RELEASE_ANNOTATION);
    }

    // Helm-managed pods labeled with an instance.
    if pod.labels.get(MANAGED_BY_LABEL).map(String::as_str) == Some("Helm") {
        if let Some(name) = non_empty(pod.labels.get(INSTANCE_LABEL)) {
            return ReleaseInfo::from_label(name, 0.95, INSTANCE_LABEL);
        }
    }

    // Legacy Helm v2 (Tiller) labeling.
    if pod.labels.get(HERITAGE_LABEL).map(String::as_str) == Some("Tiller") {
        if let Some(name) = non_empty(pod.labels.get(RELEASE_LABEL)) {
            return ReleaseInfo::from_label(name, 0.85, RELEASE_LABEL);
        }
    }

    // A chart label with an instance or app name.
    if pod.labels.contains_key(CHART_LABEL) {
        if let Some(name) = non_empty(pod.labels.get(INSTANCE_LABEL)) {
            return ReleaseInfo::from_label(name, 0.75, INSTANCE_LABEL);
        }
        if let Some(name) = non_empty(pod.labels.get(APP_LABEL)) {
            return ReleaseInfo::from_label(name, 0.75, APP_LABEL);
        }
    }

    // ArgoCD and Flux instance labels.
    if let Some(name) = non_empty(pod.labels.get(ARGOCD_INSTANCE_LABEL)) {
        return ReleaseInfo::from_label(name, 0.80, ARGOCD_INSTANCE_LABEL);
    }
    if let Some(name) = non_empty(pod.labels.get(FLUX_NAME_LABEL)) {
        return ReleaseInfo::from_label(name, 0.80, FLUX_NAME_LABEL);
    }

    // Generic app labels.
    if let Some(name) = non_empty(pod.labels.get(APP_LABEL)) {
        return ReleaseInfo::from_label(name, 0.60, APP_LABEL);
    }
    if let Some(name) = non_empty(pod.labels.get(NAME_LABEL)) {
        return ReleaseInfo::from_label(name, 0.60, NAME_LABEL);
    }

    // Deployment-style pod names carry two generated suffixes
    // (<release>-<rs-hash>-<pod-hash>); StatefulSet-style names carry
    // one ordinal.
    let parts: Vec<&str> = pod.name.split('-').collect();
    if parts.len() >= 4 {
        let name = parts[..parts.len() - 2].join("-");
        return ReleaseInfo::from_naming(&name, 0.40, "name-minus-two-suffixes");
    }
    if parts.len() >= 2 {
        let name = parts[..parts.len() - 1].join("-");
        return ReleaseInfo::from_naming(&name, 0.30, "name-minus-one-suffix");
    }

    ReleaseInfo::fallback(&pod.name)
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Resolver handle carrying the optional remote inference hook.
#[derive(Clone)]
pub struct StackResolver {
    backend: Option<Arc<BackendClient>>,
    inference: Inference,
}

impl StackResolver {
    pub fn new(backend: Option<Arc<BackendClient>>, inference: Inference) -> Self {
        Self { backend, inference }
    }

    /// Local-only resolver, used when no backend is configured.
    pub fn local_only() -> Self {
        Self {
            backend: None,
            inference: Inference {
                enabled: false,
                confidence_threshold: 0.7,
                timeout_ms: 5000,
            },
        }
    }

    /// Resolves a pod's release, consulting the remote inference
    /// endpoint when the local confidence is low.
    pub async fn resolve(&self, pod: &PodRecord) -> ReleaseInfo {
        let local = resolve_local(pod);

        if !self.inference.enabled || local.confidence >= self.inference.confidence_threshold {
            return local;
        }
        let Some(backend) = &self.backend else {
            return local;
        };

        let request = ReleaseInferenceRequest::from_pod(pod);
        let deadline = Duration::from_millis(self.inference.timeout_ms);
        match backend.infer_release(&request, deadline).await {
            Some(remote) if remote.confidence > local.confidence => {
                debug!(
                    "Adopting remote release inference for {}/{}: {} ({:.2})",
                    pod.namespace, pod.name, remote.release_name, remote.confidence
                );
                remote
            }
            _ => local,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heimdall_models::models::pod::{PodPhase, PodRecord};
    use heimdall_models::models::release::ResolutionMethod;
    use std::collections::BTreeMap;

    fn pod_named(name: &str) -> PodRecord {
        PodRecord {
            name: name.to_string(),
            namespace: "prod".to_string(),
            phase: PodPhase::Running,
            phase_reason: None,
            phase_message: None,
            creation_timestamp: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: vec![],
            containers: vec![],
            init_containers: vec![],
        }
    }

    fn with_labels(name: &str, labels: &[(&str, &str)]) -> PodRecord {
        let mut pod = pod_named(name);
        pod.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        pod
    }

    #[test]
    fn test_helm_annotation_wins() {
        let mut pod = with_labels(
            "api-7d9f-x2k4",
            &[("app.kubernetes.io/managed-by", "Helm")],
        );
        pod.annotations.insert(
            "meta.helm.sh/release-name".to_string(),
            "api-release".to_string(),
        );
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "api-release");
        assert_eq!(info.confidence, 0.98);
        assert_eq!(info.method, ResolutionMethod::Annotation);
    }

    #[test]
    fn test_helm_managed_by_with_instance() {
        let pod = with_labels(
            "api-7d9f-x2k4",
            &[
                ("app.kubernetes.io/managed-by", "Helm"),
                ("app.kubernetes.io/instance", "api"),
            ],
        );
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "api");
        assert_eq!(info.confidence, 0.95);
        assert_eq!(
            info.evidence.label.as_deref(),
            Some("app.kubernetes.io/instance")
        );
    }

    #[test]
    fn test_tiller_heritage() {
        let pod = with_labels(
            "db-0",
            &[("heritage", "Tiller"), ("release", "db")],
        );
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "db");
        assert_eq!(info.confidence, 0.85);
    }

    #[test]
    fn test_chart_label_prefers_instance_over_app() {
        let pod = with_labels(
            "x-1",
            &[
                ("helm.sh/chart", "thing-1.2.3"),
                ("app.kubernetes.io/instance", "thing-prod"),
                ("app", "thing"),
            ],
        );
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "thing-prod");
        assert_eq!(info.confidence, 0.75);

        let pod = with_labels(
            "x-1",
            &[("helm.sh/chart", "thing-1.2.3"), ("app", "thing")],
        );
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "thing");
        assert_eq!(info.confidence, 0.75);
    }

    #[test]
    fn test_argocd_and_flux_labels() {
        let pod = with_labels("y-1", &[("argocd.argoproj.io/instance", "shop")]);
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "shop");
        assert_eq!(info.confidence, 0.80);

        let pod = with_labels("y-1", &[("helm.toolkit.fluxcd.io/name", "shop")]);
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "shop");
        assert_eq!(info.confidence, 0.80);
    }

    #[test]
    fn test_generic_app_labels() {
        let pod = with_labels("z-1", &[("app", "billing")]);
        assert_eq!(resolve_local(&pod).confidence, 0.60);

        let pod = with_labels("z-1", &[("app.kubernetes.io/name", "billing")]);
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "billing");
        assert_eq!(info.confidence, 0.60);
    }

    #[test]
    fn test_naming_convention_four_parts_strips_two() {
        let pod = pod_named("my-app-5c9b8d7f6-x2k4");
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "my-app");
        assert_eq!(info.confidence, 0.40);
        assert_eq!(info.method, ResolutionMethod::Naming);
    }

    #[test]
    fn test_naming_convention_two_parts_strips_one() {
        let pod = pod_named("cache-0");
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "cache");
        assert_eq!(info.confidence, 0.30);
    }

    #[test]
    fn test_fallback_to_pod_name() {
        let pod = pod_named("standalone");
        let info = resolve_local(&pod);
        assert_eq!(info.release_name, "standalone");
        assert_eq!(info.confidence, 0.10);
        assert_eq!(info.method, ResolutionMethod::None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let pod = with_labels(
            "api-7d9f-x2k4",
            &[
                ("app.kubernetes.io/managed-by", "Helm"),
                ("app.kubernetes.io/instance", "api"),
            ],
        );
        let a = resolve_local(&pod);
        let b = resolve_local(&pod);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_label_values_are_ignored() {
        let pod = with_labels(
            "a-b-c-d",
            &[
                ("app.kubernetes.io/managed-by", "Helm"),
                ("app.kubernetes.io/instance", ""),
            ],
        );
        // Falls through to the naming convention.
        let info = resolve_local(&pod);
        assert_eq!(info.method, ResolutionMethod::Naming);
    }

    #[tokio::test]
    async fn test_local_only_resolver_skips_remote() {
        let resolver = StackResolver::local_only();
        let pod = pod_named("solo");
        let info = resolver.resolve(&pod).await;
        assert_eq!(info.method, ResolutionMethod::None);
    }
}
