/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Diagnostic Bundle Module
//!
//! Output of the diagnostic collector: the failing pod's status, recent
//! events, and sanitized log tails, plus the same material for every
//! sibling pod in the resolved release when resolution confidence was
//! high enough. Log lines in a bundle have always passed the sanitizer.

use crate::models::failure::ContainerStateSnapshot;
use crate::models::pod::PodPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Kubernetes event copied out of the cluster SDK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    /// Event type (Normal, Warning).
    pub event_type: Option<String>,
    /// Event reason.
    pub reason: Option<String>,
    /// Event message.
    pub message: Option<String>,
    /// Kind of the involved object.
    pub involved_object_kind: Option<String>,
    /// Name of the involved object.
    pub involved_object_name: Option<String>,
    /// `lastTimestamp`, falling back to `eventTime`.
    pub timestamp: Option<DateTime<Utc>>,
    /// Event UID, when present.
    pub uid: Option<String>,
    /// Event count.
    pub count: Option<i32>,
}

/// Collected material for a single pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodBundle {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod phase at collection time, when the status fetch succeeded.
    pub phase: Option<PodPhase>,
    /// Recent events for the pod and its owners, newest first.
    pub events: Vec<EventRecord>,
    /// Sanitized log tail lines, init and main containers.
    pub logs: Vec<String>,
    /// Container states at collection time.
    pub container_states: Vec<ContainerStateSnapshot>,
}

impl PodBundle {
    /// A degraded bundle for a pod whose collection failed: empty
    /// slices and a placeholder log line describing the failure.
    pub fn degraded(name: &str, namespace: &str, failure: &str) -> Self {
        PodBundle {
            name: name.to_string(),
            namespace: namespace.to_string(),
            phase: None,
            events: vec![],
            logs: vec![format!("collection failed for pod {}: {}", name, failure)],
            container_states: vec![],
        }
    }
}

/// Release-level portion of a stack bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackInfo {
    /// Resolved release name.
    pub release_name: String,
    /// Resolution confidence.
    pub confidence: f64,
    /// Sibling pod bundles, excluding the primary pod.
    pub components: Vec<PodBundle>,
}

/// The full output of one collection run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackBundle {
    /// The failing pod's bundle.
    pub primary_pod: PodBundle,
    /// Release siblings; `None` when resolution confidence was below
    /// the stack threshold.
    pub stack: Option<StackInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_bundle_has_placeholder_log() {
        let bundle = PodBundle::degraded("api-0", "prod", "deadline exceeded");
        assert!(bundle.events.is_empty());
        assert!(bundle.container_states.is_empty());
        assert_eq!(bundle.logs.len(), 1);
        assert!(bundle.logs[0].contains("api-0"));
        assert!(bundle.logs[0].contains("deadline exceeded"));
    }

    #[test]
    fn test_stack_bundle_serialization() {
        let bundle = StackBundle {
            primary_pod: PodBundle {
                name: "api-1".to_string(),
                namespace: "prod".to_string(),
                phase: Some(PodPhase::Running),
                events: vec![],
                logs: vec!["ready".to_string()],
                container_states: vec![],
            },
            stack: Some(StackInfo {
                release_name: "api".to_string(),
                confidence: 0.95,
                components: vec![],
            }),
        };
        let json = serde_json::to_string(&bundle).unwrap();
        assert!(json.contains("\"release_name\":\"api\""));
        let back: StackBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(bundle, back);
    }
}
