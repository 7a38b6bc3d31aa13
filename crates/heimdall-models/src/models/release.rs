/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Release Info Module
//!
//! The result of resolving a pod to the release (Helm, ArgoCD, Flux) it
//! belongs to. A `ReleaseInfo` is computed per call and never memoized.

use serde::{Deserialize, Serialize};

/// How the release name was determined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMethod {
    /// A release annotation named the release directly.
    Annotation,
    /// A managed-by / instance / chart label named the release.
    Label,
    /// Derived from the pod naming convention.
    Naming,
    /// Derived from an owner reference.
    Owner,
    /// No signal; the pod name itself was used.
    None,
}

/// The specific label/annotation/pattern that produced the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionEvidence {
    /// Label key that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Annotation key that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    /// Naming pattern that matched, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub naming_pattern: Option<String>,
}

/// A pod's resolved release membership.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseInfo {
    /// Name of the release this pod belongs to.
    pub release_name: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// How the release name was determined.
    pub method: ResolutionMethod,
    /// The matching label/annotation/pattern.
    pub evidence: ResolutionEvidence,
}

impl ReleaseInfo {
    pub fn from_annotation(release_name: &str, confidence: f64, annotation: &str) -> Self {
        ReleaseInfo {
            release_name: release_name.to_string(),
            confidence,
            method: ResolutionMethod::Annotation,
            evidence: ResolutionEvidence {
                annotation: Some(annotation.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn from_label(release_name: &str, confidence: f64, label: &str) -> Self {
        ReleaseInfo {
            release_name: release_name.to_string(),
            confidence,
            method: ResolutionMethod::Label,
            evidence: ResolutionEvidence {
                label: Some(label.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn from_naming(release_name: &str, confidence: f64, pattern: &str) -> Self {
        ReleaseInfo {
            release_name: release_name.to_string(),
            confidence,
            method: ResolutionMethod::Naming,
            evidence: ResolutionEvidence {
                naming_pattern: Some(pattern.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn fallback(pod_name: &str) -> Self {
        ReleaseInfo {
            release_name: pod_name.to_string(),
            confidence: 0.10,
            method: ResolutionMethod::None,
            evidence: ResolutionEvidence::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_record_evidence() {
        let info = ReleaseInfo::from_label("api", 0.95, "app.kubernetes.io/instance");
        assert_eq!(info.method, ResolutionMethod::Label);
        assert_eq!(
            info.evidence.label.as_deref(),
            Some("app.kubernetes.io/instance")
        );
        assert!(info.evidence.annotation.is_none());

        let info = ReleaseInfo::from_annotation("api", 0.98, "meta.helm.sh/release-name");
        assert_eq!(info.method, ResolutionMethod::Annotation);

        let info = ReleaseInfo::fallback("lonely-pod");
        assert_eq!(info.release_name, "lonely-pod");
        assert_eq!(info.method, ResolutionMethod::None);
        assert!(info.confidence < 0.2);
    }

    #[test]
    fn test_serialization_omits_empty_evidence() {
        let info = ReleaseInfo::from_naming("api", 0.40, "name-minus-two-suffixes");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"naming\""));
        assert!(json.contains("naming_pattern"));
        assert!(!json.contains("\"label\""));
    }
}
