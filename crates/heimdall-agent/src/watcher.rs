/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Namespace Watcher Module
//!
//! One long-lived task per watched namespace. The watcher keeps a pod
//! watch stream open, feeds ADDED/MODIFIED events through the
//! classifier, and hands resulting failure events to the diagnosis
//! dispatch queue. DELETED events are ignored.
//!
//! A clean watch-window close reopens the stream immediately. Stream
//! failure without a cancel enters the backoff path instead:
//! `consecutive_failures` is incremented and the watcher reconnects
//! after `min(initial * multiplier^(n-1), max)` — the first reconnect
//! waits the initial interval — giving up for good once the
//! consecutive-failure ceiling is reached. The first event received
//! after a reconnect resets the counter. Supervisor-originated
//! shutdown wins every `select!`, which drops the stream; no event is
//! observed after that point.

use crate::classifier;
use crate::k8s::api::{KubeApi, PodWatchEvent};
use crate::metrics::Metrics;
use crate::supervisor::SinkSet;
use chrono::Utc;
use futures::{pin_mut, StreamExt};
use heimdall_models::models::failure::{DiagnosisOutcome, FailureEvent, Severity};
use heimdall_models::models::health::WatcherState;
use heimdall_models::models::pod::PodRecord;
use heimdall_utils::config::{Reconnect, Settings};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// A classified failure handed to the diagnosis worker pool. Carries
/// the full pod record so the collector can resolve the stack.
pub struct DispatchJob {
    pub event: FailureEvent,
    pub pod: PodRecord,
    pub diagnose: bool,
}

/// Backoff before reconnect attempt `consecutive_failures`:
/// `min(initial * multiplier^(n-1), max)`, exponent capped at 5.
pub fn compute_backoff(consecutive_failures: u32, cfg: &Reconnect) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(5);
    let ms = (cfg.initial_backoff_ms as f64) * cfg.multiplier.powi(exponent as i32);
    Duration::from_millis(ms.min(cfg.max_backoff_ms as f64).max(0.0) as u64)
}

/// The per-namespace watch worker.
pub struct NamespaceWatcher {
    namespace: String,
    kube: KubeApi,
    settings: Arc<Settings>,
    metrics: Arc<Metrics>,
    state: Arc<RwLock<WatcherState>>,
    jobs: mpsc::Sender<DispatchJob>,
    sinks: Arc<SinkSet>,
    // Used to bound overflow deliveries so nothing fires after stop().
    shutdown_tx: broadcast::Sender<()>,
}

impl NamespaceWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: String,
        kube: KubeApi,
        settings: Arc<Settings>,
        metrics: Arc<Metrics>,
        state: Arc<RwLock<WatcherState>>,
        jobs: mpsc::Sender<DispatchJob>,
        sinks: Arc<SinkSet>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        NamespaceWatcher {
            namespace,
            kube,
            settings,
            metrics,
            state,
            jobs,
            sinks,
            shutdown_tx,
        }
    }

    /// Runs until the supervisor cancels it or the consecutive-failure
    /// ceiling is reached.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("🔭 Starting pod watcher for namespace {}", self.namespace);
        let reconnect = self.settings.resilience.reconnect.clone();

        loop {
            let opened = tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Watcher for {} cancelled before connect", self.namespace);
                    return;
                }
                result = self.kube.watch_pods(&self.namespace) => result,
            };

            match opened {
                Ok(stream) => {
                    pin_mut!(stream);
                    {
                        let mut state = self.state.write().expect("watcher state lock poisoned");
                        state.healthy = true;
                    }

                    let failed = loop {
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!("Watcher for {} cancelled", self.namespace);
                                return;
                            }
                            item = stream.next() => match item {
                                Some(Ok(event)) => self.handle_event(event).await,
                                Some(Err(e)) => {
                                    warn!("Watch stream for {} failed: {}", self.namespace, e);
                                    break true;
                                }
                                None => break false,
                            }
                        }
                    };

                    if !failed {
                        // The server closes the watch window periodically;
                        // a clean close just reopens.
                        debug!("Watch window for {} closed; reopening", self.namespace);
                        continue;
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to open watch stream for {}: {}",
                        self.namespace, e
                    );
                }
            }

            // Stream failed without a cancel: backoff path.
            let failures = {
                let mut state = self.state.write().expect("watcher state lock poisoned");
                state.healthy = false;
                state.consecutive_failures += 1;
                state.consecutive_failures
            };

            if !reconnect.enabled {
                error!(
                    "❌ Watch stream for {} ended and reconnect is disabled; giving up",
                    self.namespace
                );
                self.mark_given_up();
                return;
            }
            if failures >= reconnect.max_consecutive_failures {
                error!(
                    "❌ Watcher for {} exceeded {} consecutive failures; giving up",
                    self.namespace, reconnect.max_consecutive_failures
                );
                self.mark_given_up();
                return;
            }

            let delay = compute_backoff(failures, &reconnect);
            {
                let mut state = self.state.write().expect("watcher state lock poisoned");
                state.current_backoff_ms = delay.as_millis() as u64;
            }
            self.metrics.inc_reconnection_attempts();
            info!(
                "🔁 Reconnecting watcher for {} in {}ms (failure {}/{})",
                self.namespace,
                delay.as_millis(),
                failures,
                reconnect.max_consecutive_failures
            );

            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Watcher for {} cancelled during backoff", self.namespace);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn mark_given_up(&self) {
        let mut state = self.state.write().expect("watcher state lock poisoned");
        state.healthy = false;
        state.given_up = true;
    }

    async fn handle_event(&self, event: PodWatchEvent) {
        let pod = match event {
            PodWatchEvent::Added(pod) | PodWatchEvent::Modified(pod) => pod,
            // Deleted pods carry nothing to diagnose.
            PodWatchEvent::Deleted(_) => {
                self.note_event_received();
                return;
            }
        };
        self.note_event_received();

        let Some(failure) = classifier::classify(&pod, &self.settings.classifier, Utc::now())
        else {
            return;
        };

        self.metrics.inc_failures_detected();
        info!(
            "{} {} failure in {}/{}: {}",
            failure.severity.icon(),
            failure.severity,
            failure.namespace,
            failure.pod_name,
            failure.reason
        );

        let diagnose =
            self.settings.diagnosis.enabled && failure.severity >= Severity::Medium;
        let job = DispatchJob {
            event: failure,
            pod,
            diagnose,
        };

        match self.jobs.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(mut job)) => {
                // Classification is cheap and still flows downstream;
                // only the diagnosis is skipped under saturation.
                warn!(
                    "Diagnosis queue saturated; skipping diagnosis for {}/{}",
                    job.event.namespace, job.event.pod_name
                );
                job.event.diagnosis = DiagnosisOutcome {
                    executed: false,
                    cached: false,
                    duration_ms: None,
                    result: Some("overloaded".to_string()),
                };
                let sinks = self.sinks.clone();
                let mut shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = shutdown.recv() => {}
                        _ = sinks.deliver(&job.event) => {}
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(
                    "Dispatch queue closed; dropping failure event for {}",
                    self.namespace
                );
            }
        }
    }

    /// Any received event proves the stream is live again.
    fn note_event_received(&self) {
        let mut state = self.state.write().expect("watcher state lock poisoned");
        state.last_event_at = Some(Utc::now());
        state.healthy = true;
        if state.consecutive_failures > 0 {
            state.consecutive_failures = 0;
            state.current_backoff_ms = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconnect() -> Reconnect {
        Reconnect {
            enabled: true,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            max_consecutive_failures: 5,
        }
    }

    #[test]
    fn test_first_backoff_is_the_initial_interval() {
        assert_eq!(compute_backoff(1, &reconnect()), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let cfg = reconnect();
        assert_eq!(compute_backoff(2, &cfg), Duration::from_millis(2000));
        assert_eq!(compute_backoff(3, &cfg), Duration::from_millis(4000));
        assert_eq!(compute_backoff(4, &cfg), Duration::from_millis(8000));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let cfg = reconnect();
        // 1s * 2^5 = 32s, capped to 30s; the exponent itself also caps
        // at 5 for larger counts.
        assert_eq!(compute_backoff(6, &cfg), Duration::from_millis(30_000));
        assert_eq!(compute_backoff(60, &cfg), Duration::from_millis(30_000));
    }

    #[test]
    fn test_backoff_zero_failures_uses_initial() {
        assert_eq!(compute_backoff(0, &reconnect()), Duration::from_millis(1000));
    }
}
