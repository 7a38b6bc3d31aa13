/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Conversion layer from Kubernetes SDK objects to the pipeline's own
//! records. This is the only place outside the API facade where
//! `k8s_openapi` types appear; everything downstream consumes
//! [`PodRecord`] and [`EventRecord`].

use heimdall_models::models::bundle::EventRecord;
use heimdall_models::models::pod::{
    ContainerRecord, ContainerState, OwnerRef, PodPhase, PodRecord,
};
use k8s_openapi::api::core::v1::{ContainerStatus, Event, Pod};

/// Copies the fields the pipeline needs out of an SDK pod.
pub fn pod_record(pod: &Pod) -> PodRecord {
    let name = pod.metadata.name.clone().unwrap_or_default();
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    let annotations = pod.metadata.annotations.clone().unwrap_or_default();
    let creation_timestamp = pod.metadata.creation_timestamp.as_ref().map(|t| t.0);

    let owner_references = pod
        .metadata
        .owner_references
        .as_ref()
        .map(|owners| {
            owners
                .iter()
                .map(|o| OwnerRef {
                    kind: o.kind.clone(),
                    name: o.name.clone(),
                    uid: o.uid.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let (phase, phase_reason, phase_message, containers, init_containers) =
        match &pod.status {
            Some(status) => (
                status
                    .phase
                    .as_deref()
                    .map(PodPhase::parse)
                    .unwrap_or(PodPhase::Unknown),
                status.reason.clone(),
                status.message.clone(),
                status
                    .container_statuses
                    .as_ref()
                    .map(|cs| cs.iter().map(container_record).collect())
                    .unwrap_or_default(),
                status
                    .init_container_statuses
                    .as_ref()
                    .map(|cs| cs.iter().map(container_record).collect())
                    .unwrap_or_default(),
            ),
            None => (PodPhase::Unknown, None, None, vec![], vec![]),
        };

    PodRecord {
        name,
        namespace,
        phase,
        phase_reason,
        phase_message,
        creation_timestamp,
        labels,
        annotations,
        owner_references,
        containers,
        init_containers,
    }
}

fn container_record(cs: &ContainerStatus) -> ContainerRecord {
    let state = match &cs.state {
        Some(state) => {
            if state.running.is_some() {
                ContainerState::Running
            } else if let Some(waiting) = &state.waiting {
                ContainerState::Waiting {
                    reason: waiting.reason.clone(),
                    message: waiting.message.clone(),
                }
            } else if let Some(terminated) = &state.terminated {
                ContainerState::Terminated {
                    reason: terminated.reason.clone(),
                    message: terminated.message.clone(),
                    exit_code: terminated.exit_code,
                }
            } else {
                ContainerState::Unknown
            }
        }
        None => ContainerState::Unknown,
    };

    ContainerRecord {
        name: cs.name.clone(),
        image: if cs.image.is_empty() {
            None
        } else {
            Some(cs.image.clone())
        },
        restart_count: cs.restart_count,
        state,
    }
}

/// Copies the fields the collector needs out of an SDK event.
pub fn event_record(event: &Event) -> EventRecord {
    EventRecord {
        event_type: event.type_.clone(),
        reason: event.reason.clone(),
        message: event.message.clone(),
        involved_object_kind: event.involved_object.kind.clone(),
        involved_object_name: event.involved_object.name.clone(),
        // lastTimestamp when set, eventTime otherwise; events API
        // populates one or the other depending on the reporting client.
        timestamp: event
            .last_timestamp
            .as_ref()
            .map(|t| t.0)
            .or_else(|| event.event_time.as_ref().map(|t| t.0)),
        uid: event.metadata.uid.clone(),
        count: event.count,
    }
}
