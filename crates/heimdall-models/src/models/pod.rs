/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Pod Record Module
//!
//! This module defines the SDK-free copy of a pod that the pipeline
//! operates on. The agent's Kubernetes adapter copies out only the
//! fields the classifier, resolver, and collector need; the rest of the
//! system never touches cluster SDK types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pod lifecycle phase as reported by the API server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parses the API server's phase string; anything unrecognized maps
    /// to `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// Owner reference copied from pod metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerRef {
    /// Kind of the owning resource (ReplicaSet, StatefulSet, Job...).
    pub kind: String,
    /// Name of the owning resource.
    pub name: String,
    /// UID of the owning resource.
    pub uid: String,
}

/// Current state of a single container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Waiting {
        reason: Option<String>,
        message: Option<String>,
    },
    Terminated {
        reason: Option<String>,
        message: Option<String>,
        exit_code: i32,
    },
    Unknown,
}

impl ContainerState {
    /// The waiting reason, if this container is waiting.
    pub fn waiting_reason(&self) -> Option<&str> {
        match self {
            ContainerState::Waiting { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }
}

/// One container's status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Container name.
    pub name: String,
    /// Container image, when reported.
    pub image: Option<String>,
    /// Number of restarts.
    pub restart_count: i32,
    /// Current state of the container.
    pub state: ContainerState,
}

/// The pod fields the pipeline consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodRecord {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod phase.
    pub phase: PodPhase,
    /// Reason attached to the phase (e.g. "Evicted"), when present.
    pub phase_reason: Option<String>,
    /// Message attached to the phase, when present.
    pub phase_message: Option<String>,
    /// Creation timestamp from metadata.
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Pod annotations.
    pub annotations: BTreeMap<String, String>,
    /// Owner references from metadata.
    pub owner_references: Vec<OwnerRef>,
    /// Main container statuses, in API order.
    pub containers: Vec<ContainerRecord>,
    /// Init container statuses, in API order.
    pub init_containers: Vec<ContainerRecord>,
}

impl PodRecord {
    /// Age of the pod at `now`, in milliseconds. Zero when the creation
    /// timestamp is missing or in the future.
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        self.creation_timestamp
            .map(|created| (now - created).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Iterates main containers first, then init containers.
    pub fn all_containers(&self) -> impl Iterator<Item = &ContainerRecord> {
        self.containers.iter().chain(self.init_containers.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn minimal_pod() -> PodRecord {
        PodRecord {
            name: "web-abc".to_string(),
            namespace: "default".to_string(),
            phase: PodPhase::Running,
            phase_reason: None,
            phase_message: None,
            creation_timestamp: Some(Utc::now()),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            owner_references: vec![],
            containers: vec![ContainerRecord {
                name: "main".to_string(),
                image: Some("nginx:1.27".to_string()),
                restart_count: 0,
                state: ContainerState::Running,
            }],
            init_containers: vec![],
        }
    }

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Running"), PodPhase::Running);
        assert_eq!(PodPhase::parse("Failed"), PodPhase::Failed);
        assert_eq!(PodPhase::parse("NotAPhase"), PodPhase::Unknown);
    }

    #[test]
    fn test_age_ms() {
        let mut pod = minimal_pod();
        let now = Utc::now();
        pod.creation_timestamp = Some(now - Duration::minutes(12));
        assert_eq!(pod.age_ms(now), 12 * 60 * 1000);

        pod.creation_timestamp = None;
        assert_eq!(pod.age_ms(now), 0);

        // A clock-skewed future timestamp clamps to zero.
        pod.creation_timestamp = Some(now + Duration::minutes(1));
        assert_eq!(pod.age_ms(now), 0);
    }

    #[test]
    fn test_all_containers_order() {
        let mut pod = minimal_pod();
        pod.init_containers.push(ContainerRecord {
            name: "init-db".to_string(),
            image: None,
            restart_count: 1,
            state: ContainerState::Unknown,
        });
        let names: Vec<&str> = pod.all_containers().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "init-db"]);
    }

    #[test]
    fn test_pod_record_serialization_round_trip() {
        let pod = minimal_pod();
        let json = serde_json::to_string(&pod).unwrap();
        let back: PodRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(pod, back);
    }
}
