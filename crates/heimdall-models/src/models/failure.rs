/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Failure Event Module
//!
//! This module defines the structured failure event produced by the
//! classifier and carried through the pipeline.
//!
//! ## Data Model
//!
//! A failure event captures, at detection time:
//!
//! - which pod failed and where (`pod_name`, `namespace`, `detected_at`)
//! - what kind of failure it is (`pattern`) and how bad (`severity`)
//! - a one-line `reason` and a multi-line `message`
//! - an immutable `snapshot` of the pod's phase, labels, owners, and
//!   per-container states as observed when the failure was detected
//! - a mutable `diagnosis` slot filled in by the diagnosis stage before
//!   the event leaves the pipeline
//!
//! ## Constraints
//!
//! - `snapshot.container_states` has one entry per init+main container
//!   observed at detection time.
//! - Severities are totally ordered:
//!   informational < low < medium < high < critical.

use crate::models::pod::{ContainerState, PodPhase, PodRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Failure severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parses a severity name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "informational" => Some(Severity::Informational),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Icon used in operator-facing log lines.
    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Informational => "ℹ️",
            Severity::Low => "🔵",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Informational => "informational",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// The failure pattern the classifier matched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePattern {
    PodPhaseFailed,
    LongPending,
    HighRestartCount,
    ContainerWaitingError,
    ContainerTerminatedError,
    ResourceConstraint,
}

/// Whether a container is an init or a main container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Init,
    Main,
}

/// Coarse container state recorded in the snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStateKind {
    Running,
    Waiting,
    Terminated,
    Unknown,
}

impl From<&ContainerState> for ContainerStateKind {
    fn from(state: &ContainerState) -> Self {
        match state {
            ContainerState::Running => ContainerStateKind::Running,
            ContainerState::Waiting { .. } => ContainerStateKind::Waiting,
            ContainerState::Terminated { .. } => ContainerStateKind::Terminated,
            ContainerState::Unknown => ContainerStateKind::Unknown,
        }
    }
}

/// One container's state as captured in the failure snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerStateSnapshot {
    /// Container name.
    pub name: String,
    /// Init or main container.
    pub kind: ContainerKind,
    /// Coarse state at detection time.
    pub state: ContainerStateKind,
    /// Waiting or terminated reason, when present.
    pub reason: Option<String>,
}

/// Immutable pod snapshot captured at detection time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodSnapshot {
    /// Pod phase.
    pub phase: PodPhase,
    /// Creation timestamp.
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Owner reference names, `kind/name` form.
    pub owner_references: Vec<String>,
    /// One entry per init+main container observed at detection time.
    pub container_states: Vec<ContainerStateSnapshot>,
}

impl PodSnapshot {
    /// Captures a snapshot from a pod record. Main containers come
    /// first, then init containers, matching classifier iteration order.
    pub fn capture(pod: &PodRecord) -> Self {
        let mut container_states =
            Vec::with_capacity(pod.containers.len() + pod.init_containers.len());
        for c in &pod.containers {
            container_states.push(ContainerStateSnapshot {
                name: c.name.clone(),
                kind: ContainerKind::Main,
                state: ContainerStateKind::from(&c.state),
                reason: state_reason(&c.state),
            });
        }
        for c in &pod.init_containers {
            container_states.push(ContainerStateSnapshot {
                name: c.name.clone(),
                kind: ContainerKind::Init,
                state: ContainerStateKind::from(&c.state),
                reason: state_reason(&c.state),
            });
        }
        PodSnapshot {
            phase: pod.phase,
            creation_timestamp: pod.creation_timestamp,
            labels: pod.labels.clone(),
            owner_references: pod
                .owner_references
                .iter()
                .map(|o| format!("{}/{}", o.kind, o.name))
                .collect(),
            container_states,
        }
    }
}

fn state_reason(state: &ContainerState) -> Option<String> {
    match state {
        ContainerState::Waiting { reason, .. } => reason.clone(),
        ContainerState::Terminated { reason, .. } => reason.clone(),
        _ => None,
    }
}

/// Result slot filled by the diagnosis stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisOutcome {
    /// Whether a diagnosis was actually executed for this event.
    pub executed: bool,
    /// Whether the attached result came from the cache.
    pub cached: bool,
    /// Wall-clock duration of a fresh diagnosis, in milliseconds.
    pub duration_ms: Option<u64>,
    /// The diagnosis summary, or an explanatory failure string.
    pub result: Option<String>,
}

/// The structured failure event carried through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEvent {
    /// Name of the failing pod.
    pub pod_name: String,
    /// Namespace of the failing pod.
    pub namespace: String,
    /// When the failure was detected.
    pub detected_at: DateTime<Utc>,
    /// Matched failure pattern.
    pub pattern: FailurePattern,
    /// Severity of the failure.
    pub severity: Severity,
    /// One-line human-readable reason.
    pub reason: String,
    /// Multi-line detail.
    pub message: String,
    /// Pod snapshot at detection time.
    pub snapshot: PodSnapshot,
    /// Diagnosis result slot, set before the event leaves the pipeline.
    pub diagnosis: DiagnosisOutcome,
}

impl FailureEvent {
    /// Creates a new failure event with an empty diagnosis slot.
    pub fn new(
        pod: &PodRecord,
        detected_at: DateTime<Utc>,
        pattern: FailurePattern,
        severity: Severity,
        reason: String,
        message: String,
    ) -> Self {
        FailureEvent {
            pod_name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            detected_at,
            pattern,
            severity,
            reason,
            message,
            snapshot: PodSnapshot::capture(pod),
            diagnosis: DiagnosisOutcome::default(),
        }
    }

    /// Cache key for the diagnosis stage: `<namespace>/<pod>`.
    pub fn cache_key(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pod::{ContainerRecord, OwnerRef};

    fn pod_with_containers() -> PodRecord {
        PodRecord {
            name: "api-7d9f-x2k4".to_string(),
            namespace: "prod".to_string(),
            phase: PodPhase::Running,
            phase_reason: None,
            phase_message: None,
            creation_timestamp: Some(Utc::now()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: vec![OwnerRef {
                kind: "ReplicaSet".to_string(),
                name: "api-7d9f".to_string(),
                uid: "u-1".to_string(),
            }],
            containers: vec![ContainerRecord {
                name: "api".to_string(),
                image: None,
                restart_count: 5,
                state: ContainerState::Running,
            }],
            init_containers: vec![ContainerRecord {
                name: "init-migrate".to_string(),
                image: None,
                restart_count: 0,
                state: ContainerState::Terminated {
                    reason: Some("Completed".to_string()),
                    message: None,
                    exit_code: 0,
                },
            }],
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Informational < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert!(Severity::Critical >= Severity::Medium);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("bogus"), None);
    }

    #[test]
    fn test_pattern_serializes_kebab_case() {
        let json = serde_json::to_string(&FailurePattern::PodPhaseFailed).unwrap();
        assert_eq!(json, "\"pod-phase-failed\"");
        let json = serde_json::to_string(&FailurePattern::HighRestartCount).unwrap();
        assert_eq!(json, "\"high-restart-count\"");
    }

    #[test]
    fn test_snapshot_covers_all_containers() {
        let pod = pod_with_containers();
        let snapshot = PodSnapshot::capture(&pod);
        assert_eq!(
            snapshot.container_states.len(),
            pod.containers.len() + pod.init_containers.len()
        );
        assert_eq!(snapshot.container_states[0].kind, ContainerKind::Main);
        assert_eq!(snapshot.container_states[1].kind, ContainerKind::Init);
        assert_eq!(
            snapshot.container_states[1].reason.as_deref(),
            Some("Completed")
        );
        assert_eq!(snapshot.owner_references, vec!["ReplicaSet/api-7d9f"]);
    }

    #[test]
    fn test_failure_event_cache_key() {
        let pod = pod_with_containers();
        let event = FailureEvent::new(
            &pod,
            Utc::now(),
            FailurePattern::HighRestartCount,
            Severity::High,
            "Container api has restarted 5 times".to_string(),
            String::new(),
        );
        assert_eq!(event.cache_key(), "prod/api-7d9f-x2k4");
        assert!(!event.diagnosis.executed);
        assert!(!event.diagnosis.cached);
    }

    #[test]
    fn test_failure_event_serialization_round_trip() {
        let pod = pod_with_containers();
        let event = FailureEvent::new(
            &pod,
            Utc::now(),
            FailurePattern::ContainerWaitingError,
            Severity::Critical,
            "Container api is in CrashLoopBackOff".to_string(),
            "back-off 5m restarting failed container".to_string(),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("container-waiting-error"));
        assert!(json.contains("\"critical\""));
        let back: FailureEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
