/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Failure Classifier Module
//!
//! Pure function from a pod record to an optional structured failure
//! event. Checks run in order and the first match wins:
//!
//! 1. pod phase Failed
//! 2. pending longer than the configured threshold
//! 3–5. per container (main statuses first, then init statuses):
//!    waiting with an error reason, restart count at or above the
//!    threshold, terminated with a nonzero exit code
//! 6. resource-constraint — reserved; currently never fires
//!
//! The restart-count rule applies even to a currently running
//! container; the count itself is the signal.

use chrono::{DateTime, Utc};
use heimdall_models::models::failure::{FailureEvent, FailurePattern, Severity};
use heimdall_models::models::pod::{ContainerRecord, ContainerState, PodPhase, PodRecord};
use heimdall_utils::config::Classifier as ClassifierSettings;

/// Waiting reasons that indicate a container-level error.
const WAITING_ERROR_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ImagePullBackOff",
    "ErrImagePull",
    "CreateContainerConfigError",
    "InvalidImageName",
];

fn waiting_severity(reason: &str) -> Severity {
    match reason {
        "CrashLoopBackOff" => Severity::Critical,
        "ImagePullBackOff" | "ErrImagePull" => Severity::High,
        _ => Severity::Medium,
    }
}

fn restart_severity(restart_count: i32) -> Severity {
    if restart_count >= 10 {
        Severity::Critical
    } else if restart_count >= 5 {
        Severity::High
    } else if restart_count >= 3 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Classifies a pod, returning a failure event when a failure pattern
/// matches. `now` is the detection timestamp recorded on the event.
pub fn classify(
    pod: &PodRecord,
    settings: &ClassifierSettings,
    now: DateTime<Utc>,
) -> Option<FailureEvent> {
    // 1. Pod phase Failed.
    if pod.phase == PodPhase::Failed {
        let reason = format!(
            "Pod phase is Failed: {}",
            pod.phase_reason.as_deref().unwrap_or("Unknown")
        );
        let message = pod
            .phase_message
            .clone()
            .unwrap_or_else(|| "Pod entered the Failed phase with no status message".to_string());
        return Some(FailureEvent::new(
            pod,
            now,
            FailurePattern::PodPhaseFailed,
            Severity::Critical,
            reason,
            message,
        ));
    }

    // 2. Pending longer than the threshold. Fires strictly beyond it.
    if pod.phase == PodPhase::Pending {
        let age_ms = pod.age_ms(now);
        if age_ms > settings.max_pending_duration_ms {
            let minutes = age_ms / 60_000;
            let reason = format!("Pod has been Pending for {} minutes", minutes);
            let message = format!(
                "Pod has not left the Pending phase since {}; scheduling, image pulls, or volume attachment may be stuck (threshold {}ms)",
                pod.creation_timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "an unknown time".to_string()),
                settings.max_pending_duration_ms
            );
            return Some(FailureEvent::new(
                pod,
                now,
                FailurePattern::LongPending,
                Severity::High,
                reason,
                message,
            ));
        }
    }

    // 3–5. Per-container checks; the first container (main statuses
    // first, then init statuses) that triggers any rule determines the
    // event.
    for container in pod.all_containers() {
        if let Some(event) = classify_container(pod, container, settings, now) {
            return Some(event);
        }
    }

    // 6. resource-constraint: reserved for future expansion.
    None
}

fn classify_container(
    pod: &PodRecord,
    container: &ContainerRecord,
    settings: &ClassifierSettings,
    now: DateTime<Utc>,
) -> Option<FailureEvent> {
    // Waiting with an error reason.
    if let ContainerState::Waiting { reason, message } = &container.state {
        if let Some(reason_str) = reason.as_deref() {
            if WAITING_ERROR_REASONS.contains(&reason_str) {
                return Some(FailureEvent::new(
                    pod,
                    now,
                    FailurePattern::ContainerWaitingError,
                    waiting_severity(reason_str),
                    format!("Container {} is in {}", container.name, reason_str),
                    message.clone().unwrap_or_else(|| {
                        format!("Container {} is waiting with reason {}", container.name, reason_str)
                    }),
                ));
            }
        }
    }

    // Restart count at or above the threshold, regardless of current
    // state.
    if container.restart_count >= settings.min_restart_threshold {
        return Some(FailureEvent::new(
            pod,
            now,
            FailurePattern::HighRestartCount,
            restart_severity(container.restart_count),
            format!(
                "Container {} has restarted {} times",
                container.name, container.restart_count
            ),
            format!(
                "Restart count {} is at or above the threshold of {}",
                container.restart_count, settings.min_restart_threshold
            ),
        ));
    }

    // Terminated with a nonzero exit code.
    if let ContainerState::Terminated {
        reason,
        message,
        exit_code,
    } = &container.state
    {
        if *exit_code != 0 {
            return Some(FailureEvent::new(
                pod,
                now,
                FailurePattern::ContainerTerminatedError,
                Severity::High,
                format!(
                    "Container {} terminated with exit code {} ({})",
                    container.name,
                    exit_code,
                    reason.as_deref().unwrap_or("no reason")
                ),
                message.clone().unwrap_or_else(|| {
                    format!(
                        "Container {} terminated with exit code {}",
                        container.name, exit_code
                    )
                }),
            ));
        }
    }

    None
}
