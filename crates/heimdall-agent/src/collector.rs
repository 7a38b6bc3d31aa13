/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Diagnostic Collector Module
//!
//! Assembles the bounded diagnostic bundle for a failing pod: its own
//! status, events, and log tails, plus the same material for every
//! sibling pod of the resolved release when resolution confidence is
//! high enough.
//!
//! Collection fans out across pods with bounded parallelism and a
//! per-pod deadline; a pod whose collection fails appears in the
//! bundle with empty slices and a placeholder log line rather than
//! aborting the bundle. Every log line passes the sanitizer before it
//! is placed in the bundle.

use crate::k8s::api::KubeApi;
use crate::rules::RuleTable;
use crate::sanitizer;
use crate::stack::StackResolver;
use futures::{stream, StreamExt};
use heimdall_models::models::bundle::{EventRecord, PodBundle, StackBundle, StackInfo};
use heimdall_models::models::failure::PodSnapshot;
use heimdall_models::models::pod::PodRecord;
use heimdall_models::models::rules::RuleDiagnosis;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Release resolution confidence below which only the primary pod is
/// collected.
pub const STACK_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Cap on concurrent per-pod collections, protecting the API server.
const MAX_CONCURRENT_PODS: usize = 16;

/// Log tail length per container.
const LOG_TAIL_LINES: i64 = 200;

/// Events kept per pod after ranking.
const MAX_EVENTS: usize = 20;

/// Extra attempts when the first event listing comes back empty;
/// events propagate asynchronously.
const EVENT_RETRY_ATTEMPTS: u32 = 2;
const EVENT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Picks the pods belonging to a release: exact name match or the
/// `release-` prefix. The primary pod always comes first, deduplicated.
pub fn select_stack_members(
    release: &str,
    primary: &PodRecord,
    pods: Vec<PodRecord>,
) -> Vec<PodRecord> {
    let prefix = format!("{}-", release);
    let mut members = vec![primary.clone()];
    for pod in pods {
        if pod.name == primary.name {
            continue;
        }
        if pod.name == release || pod.name.starts_with(&prefix) {
            members.push(pod);
        }
    }
    members
}

/// Deduplicates events by UID (or by involved object + reason +
/// message when the UID is absent), ranks newest first, and keeps the
/// top [`MAX_EVENTS`].
pub fn dedupe_and_rank_events(events: Vec<EventRecord>) -> Vec<EventRecord> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(events.len());
    for event in events {
        let key = match &event.uid {
            Some(uid) => format!("uid:{}", uid),
            None => format!(
                "{}|{}|{}",
                event.involved_object_name.as_deref().unwrap_or(""),
                event.reason.as_deref().unwrap_or(""),
                event.message.as_deref().unwrap_or("")
            ),
        };
        if seen.insert(key) {
            unique.push(event);
        }
    }
    // Newest first; events without any timestamp sink to the end.
    unique.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    unique.truncate(MAX_EVENTS);
    unique
}

/// Renders a collected bundle into the single summary string stored in
/// the cache and attached to the failure event.
pub fn summarize(bundle: &StackBundle, hint: Option<(&str, &RuleDiagnosis)>) -> String {
    let mut out = String::new();

    match &bundle.stack {
        Some(stack) => out.push_str(&format!(
            "Release {} ({} pods, resolution confidence {:.2})\n",
            stack.release_name,
            stack.components.len() + 1,
            stack.confidence
        )),
        None => out.push_str("No release context (low resolution confidence); primary pod only\n"),
    }

    if let Some((id, diagnosis)) = hint {
        out.push_str(&format!(
            "Hint [{}]: {} (confidence {:.2})\n",
            id, diagnosis.summary, diagnosis.confidence
        ));
        if let Some(fix) = &diagnosis.suggested_fix {
            out.push_str(&format!("Suggested fix: {}\n", fix));
        }
    }

    summarize_pod(&mut out, &bundle.primary_pod);
    if let Some(stack) = &bundle.stack {
        for component in &stack.components {
            summarize_pod(&mut out, component);
        }
    }

    out.trim_end().to_string()
}

fn summarize_pod(out: &mut String, bundle: &PodBundle) {
    let phase = bundle
        .phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    out.push_str(&format!(
        "pod {} phase={} events={} log_lines={}\n",
        bundle.name,
        phase,
        bundle.events.len(),
        bundle.logs.len()
    ));
    for event in bundle
        .events
        .iter()
        .filter(|e| e.event_type.as_deref() == Some("Warning"))
        .take(3)
    {
        out.push_str(&format!(
            "  warning {}: {}\n",
            event.reason.as_deref().unwrap_or("?"),
            event.message.as_deref().unwrap_or("")
        ));
    }
}

/// Collects diagnostic bundles for failing pods and their stacks.
pub struct DiagnosticCollector {
    kube: KubeApi,
    resolver: StackResolver,
    rules: Arc<RuleTable>,
    per_pod_timeout: Duration,
}

impl DiagnosticCollector {
    pub fn new(
        kube: KubeApi,
        resolver: StackResolver,
        rules: Arc<RuleTable>,
        per_pod_timeout_ms: u64,
    ) -> Self {
        DiagnosticCollector {
            kube,
            resolver,
            rules,
            per_pod_timeout: Duration::from_millis(per_pod_timeout_ms),
        }
    }

    /// Collects the bundle for a primary pod. Per-pod failures degrade
    /// that pod's slot; this call itself never fails.
    pub async fn collect(&self, primary: &PodRecord) -> StackBundle {
        let release = self.resolver.resolve(primary).await;

        if release.confidence < STACK_CONFIDENCE_THRESHOLD {
            debug!(
                "Release confidence {:.2} below stack threshold for {}/{}; collecting primary only",
                release.confidence, primary.namespace, primary.name
            );
            return StackBundle {
                primary_pod: self.collect_pod(primary).await,
                stack: None,
            };
        }

        let members = match self.kube.list_pods(&primary.namespace).await {
            Ok(pods) => select_stack_members(&release.release_name, primary, pods),
            Err(e) => {
                warn!(
                    "Failed to list pods in {} for stack {}: {}; collecting primary only",
                    primary.namespace, release.release_name, e
                );
                vec![primary.clone()]
            }
        };

        let bundles: Vec<PodBundle> = stream::iter(members.iter())
            .map(|pod| async move { self.collect_pod(pod).await })
            .buffer_unordered(MAX_CONCURRENT_PODS)
            .collect()
            .await;

        let mut primary_pod = None;
        let mut components = Vec::with_capacity(bundles.len().saturating_sub(1));
        for bundle in bundles {
            if bundle.name == primary.name && primary_pod.is_none() {
                primary_pod = Some(bundle);
            } else {
                components.push(bundle);
            }
        }

        StackBundle {
            // The primary was in the member set, but degrade defensively
            // if it somehow went missing.
            primary_pod: primary_pod.unwrap_or_else(|| {
                PodBundle::degraded(&primary.name, &primary.namespace, "collection produced no bundle")
            }),
            stack: Some(StackInfo {
                release_name: release.release_name,
                confidence: release.confidence,
                components,
            }),
        }
    }

    /// Runs the local rule table over a collected pod bundle.
    pub fn rule_hint<'a>(&'a self, bundle: &PodBundle) -> Option<(&'a str, &'a RuleDiagnosis)> {
        self.rules
            .match_rules(&bundle.container_states, &bundle.events, &bundle.logs)
    }

    /// Collects one pod under the per-pod deadline.
    async fn collect_pod(&self, pod: &PodRecord) -> PodBundle {
        match tokio::time::timeout(self.per_pod_timeout, self.fetch_pod_material(pod)).await {
            Ok(bundle) => bundle,
            Err(_) => {
                warn!(
                    "Collection deadline exceeded for {}/{}",
                    pod.namespace, pod.name
                );
                PodBundle::degraded(&pod.name, &pod.namespace, "collection deadline exceeded")
            }
        }
    }

    async fn fetch_pod_material(&self, pod: &PodRecord) -> PodBundle {
        // Refresh the status first; the record in hand may be seconds
        // old by the time the diagnosis runs.
        let pod = match self.kube.read_pod(&pod.namespace, &pod.name).await {
            Ok(fresh) => fresh,
            Err(e) => {
                debug!(
                    "Could not refresh {}/{}: {}; using last observed state",
                    pod.namespace, pod.name, e
                );
                pod.clone()
            }
        };
        let pod = &pod;

        let events = self.collect_events(pod).await;
        let logs = self.collect_logs(pod).await;

        PodBundle {
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            phase: Some(pod.phase),
            events,
            logs,
            container_states: PodSnapshot::capture(pod).container_states,
        }
    }

    /// Fetches events for the pod and each of its owner references,
    /// retrying when the first pass comes back empty.
    async fn collect_events(&self, pod: &PodRecord) -> Vec<EventRecord> {
        let mut selectors = vec![pod.name.clone()];
        selectors.extend(pod.owner_references.iter().map(|o| o.name.clone()));

        for attempt in 0..=EVENT_RETRY_ATTEMPTS {
            let mut events = Vec::new();
            for name in &selectors {
                let selector = format!("involvedObject.name={}", name);
                match self.kube.list_events(&pod.namespace, &selector).await {
                    Ok(mut batch) => events.append(&mut batch),
                    Err(e) => {
                        warn!(
                            "Failed to list events for {} in {}: {}",
                            name, pod.namespace, e
                        );
                    }
                }
            }

            if !events.is_empty() || attempt == EVENT_RETRY_ATTEMPTS {
                return dedupe_and_rank_events(events);
            }
            tokio::time::sleep(EVENT_RETRY_DELAY).await;
        }
        unreachable!("event retry loop always returns");
    }

    /// Tails every container's logs (init and main) and sanitizes
    /// them. A container whose log fetch fails contributes a
    /// placeholder line instead.
    async fn collect_logs(&self, pod: &PodRecord) -> Vec<String> {
        let mut logs = Vec::new();
        for container in pod.all_containers() {
            match self
                .kube
                .tail_logs(&pod.namespace, &pod.name, &container.name, LOG_TAIL_LINES)
                .await
            {
                Ok(lines) => {
                    logs.push(format!("--- container {} ---", container.name));
                    logs.extend(lines);
                }
                Err(e) => {
                    logs.push(format!(
                        "log collection failed for container {}: {}",
                        container.name, e
                    ));
                }
            }
        }
        sanitizer::sanitize_lines(&logs)
    }
}
