/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Supervisor Module
//!
//! Owns the watcher set and everything they share: the Kubernetes
//! facade, the diagnosis cache, the metrics counters, the sink set,
//! the bounded diagnosis worker pool, and the periodic tasks (cache
//! sweeper, PAK refresh probe).
//!
//! ## Lifecycle
//!
//! - `initialize()` validates API connectivity (fatal on failure) and
//!   preflights the optional external endpoints (warn only)
//! - `start()` computes the target namespace set and spawns one
//!   watcher per target plus the worker pool and periodic tasks
//! - `stop()` broadcasts shutdown, joins every task under a deadline,
//!   aborts stragglers, and clears the cache
//! - `health_snapshot()` is a read-only copy of counters and state
//!
//! ## Diagnosis dispatch
//!
//! Failure events arrive on a bounded FIFO queue, preserving
//! per-namespace order. A worker checks the cache first; on a miss it
//! runs the collector under a hard deadline, stores the summary, and
//! attaches the outcome. The enriched event then goes to the sinks;
//! sink failures are logged and never crash a watcher.

use crate::alerts::AlertSink;
use crate::backend::BackendClient;
use crate::cache::DiagnosisCache;
use crate::collector::{self, DiagnosticCollector};
use crate::k8s::api::KubeApi;
use crate::metrics::Metrics;
use crate::rules::RuleTable;
use crate::stack::StackResolver;
use crate::watcher::{DispatchJob, NamespaceWatcher};
use chrono::Utc;
use heimdall_models::models::failure::{DiagnosisOutcome, FailureEvent};
use heimdall_models::models::health::{ConnectionState, HealthSnapshot, WatcherState};
use heimdall_utils::config::Settings;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Diagnosis worker pool size.
const DIAGNOSIS_WORKERS: usize = 8;

/// Bound on queued failure events awaiting diagnosis.
const DISPATCH_QUEUE_CAPACITY: usize = 64;

/// Cache sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// PAK refresh probe cadence.
const PAK_PROBE_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Overall deadline for joining tasks during stop().
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Computes the namespaces to watch: the configured list when present,
/// otherwise everything discovered, minus exclusions, deduplicated.
pub fn resolve_targets(
    configured: &[String],
    excluded: &[String],
    discovered: &[String],
) -> Vec<String> {
    let base: &[String] = if configured.is_empty() {
        discovered
    } else {
        configured
    };
    let mut seen = HashSet::new();
    base.iter()
        .filter(|ns| !excluded.contains(ns))
        .filter(|ns| seen.insert((*ns).clone()))
        .cloned()
        .collect()
}

/// The downstream consumers of enriched failure events.
pub struct SinkSet {
    backend: Arc<BackendClient>,
    alerts: Option<Arc<AlertSink>>,
}

impl SinkSet {
    pub fn new(backend: Arc<BackendClient>, alerts: Option<Arc<AlertSink>>) -> Self {
        SinkSet { backend, alerts }
    }

    /// Hands an event to every sink. Failures are logged; nothing
    /// propagates to the caller.
    pub async fn deliver(&self, event: &FailureEvent) {
        if let Err(e) = self.backend.report_failure_event(event).await {
            error!(
                "Failed to report failure event for {}/{}: {}",
                event.namespace, event.pod_name, e
            );
        }
        if let Some(alerts) = &self.alerts {
            alerts.emit(event).await;
        }
    }
}

/// Owns and runs the whole watch/diagnosis pipeline.
pub struct Supervisor {
    settings: Arc<Settings>,
    kube: KubeApi,
    cache: Arc<DiagnosisCache>,
    metrics: Arc<Metrics>,
    collector: Arc<DiagnosticCollector>,
    backend: Arc<BackendClient>,
    sinks: Arc<SinkSet>,
    shutdown: broadcast::Sender<()>,
    watcher_states: StdMutex<Vec<Arc<RwLock<WatcherState>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    jobs_tx: mpsc::Sender<DispatchJob>,
    jobs_rx: StdMutex<Option<mpsc::Receiver<DispatchJob>>>,
}

impl Supervisor {
    pub fn new(settings: Arc<Settings>, kube: KubeApi) -> Self {
        let cache = Arc::new(DiagnosisCache::new(
            settings.cache.ttl_ms,
            settings.cache.max_entries,
        ));
        let metrics = Arc::new(Metrics::new());

        let backend = Arc::new(BackendClient::new(
            &settings.backend.url,
            &settings.backend.pak,
            &settings.agent.cluster_name,
        ));

        let inference_backend = if settings.backend.inference.enabled {
            Some(backend.clone())
        } else {
            None
        };
        let resolver = StackResolver::new(inference_backend, settings.backend.inference.clone());

        let rules = Arc::new(RuleTable::load(settings.diagnosis.rules_path.as_deref()));
        info!("Loaded {} diagnosis rules", rules.len());

        let collector = Arc::new(DiagnosticCollector::new(
            kube.clone(),
            resolver,
            rules,
            settings.diagnosis.timeout_ms,
        ));

        let alerts = AlertSink::from_settings(&settings.alerting).map(Arc::new);
        let sinks = Arc::new(SinkSet::new(backend.clone(), alerts));

        let (shutdown, _) = broadcast::channel(1);
        let (jobs_tx, jobs_rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);

        Supervisor {
            settings,
            kube,
            cache,
            metrics,
            collector,
            backend,
            sinks,
            shutdown,
            watcher_states: StdMutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            jobs_tx,
            jobs_rx: StdMutex::new(Some(jobs_rx)),
        }
    }

    pub fn kube(&self) -> &KubeApi {
        &self.kube
    }

    /// Validates cluster connectivity (fatal on failure) and runs
    /// preflight checks against the optional external endpoints
    /// (informational only).
    pub async fn initialize(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let namespaces = self.kube.list_namespaces().await.map_err(|e| {
            error!("Cannot list namespaces; check RBAC and connectivity: {}", e);
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })?;
        info!(
            "Kubernetes connectivity verified; {} namespaces visible",
            namespaces.len()
        );

        if !self.backend.wait_ready(self.settings.backend.max_retries).await {
            warn!("Analysis backend is not ready; reports will fail until it comes up");
        } else if let Err(e) = self.backend.verify_pak().await {
            warn!("Backend PAK verification failed: {}", e);
        }

        if let Some(alerts) = AlertSink::from_settings(&self.settings.alerting) {
            if let Err(e) = alerts.preflight().await {
                warn!("Alert webhook preflight failed: {}", e);
            }
        }

        Ok(())
    }

    /// Computes the target namespace set and spawns the watchers, the
    /// diagnosis worker pool, and the periodic tasks.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let discovered = if self.settings.watch.namespaces.is_empty() {
            self.kube.list_namespaces().await?
        } else {
            Vec::new()
        };
        let targets = resolve_targets(
            &self.settings.watch.namespaces,
            &self.settings.watch.exclude_namespaces,
            &discovered,
        );
        if targets.is_empty() {
            warn!("No target namespaces to watch after exclusions");
        } else {
            info!("Watching {} namespaces: {}", targets.len(), targets.join(", "));
        }

        let mut tasks = self.tasks.lock().await;

        for namespace in &targets {
            let state = Arc::new(RwLock::new(WatcherState::new(namespace, Utc::now())));
            self.watcher_states
                .lock()
                .expect("watcher state list lock poisoned")
                .push(state.clone());

            let watcher = NamespaceWatcher::new(
                namespace.clone(),
                self.kube.clone(),
                self.settings.clone(),
                self.metrics.clone(),
                state,
                self.jobs_tx.clone(),
                self.sinks.clone(),
                self.shutdown.clone(),
            );
            tasks.push(tokio::spawn(watcher.run(self.shutdown.subscribe())));
        }

        let jobs_rx = self
            .jobs_rx
            .lock()
            .expect("dispatch queue lock poisoned")
            .take()
            .ok_or("supervisor already started")?;
        let jobs_rx = Arc::new(Mutex::new(jobs_rx));
        for worker_id in 0..DIAGNOSIS_WORKERS {
            tasks.push(tokio::spawn(diagnosis_worker(
                worker_id,
                jobs_rx.clone(),
                self.shutdown.subscribe(),
                self.cache.clone(),
                self.collector.clone(),
                self.sinks.clone(),
                self.metrics.clone(),
                self.settings.diagnosis.timeout_ms,
            )));
        }

        tasks.push(tokio::spawn(cache_sweeper(
            self.cache.clone(),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(pak_refresh_probe(
            self.backend.clone(),
            self.shutdown.subscribe(),
        )));

        Ok(())
    }

    /// Cancels everything, waits for quiescence under a deadline, and
    /// clears the cache. After this returns no watcher or worker task
    /// remains and no further events are emitted.
    pub async fn stop(&self) {
        info!("Stopping supervisor");
        let _ = self.shutdown.send(());

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DEADLINE;
        let mut tasks = self.tasks.lock().await;
        for mut handle in tasks.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!("Task did not stop within the shutdown deadline; aborting it");
                handle.abort();
            }
        }

        self.cache.clear();
        info!("✅ Supervisor stopped");
    }

    /// Read-only copy of counters and per-watcher state.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let now = Utc::now();
        self.metrics.mark_health_check(now);

        let states: Vec<WatcherState> = self
            .watcher_states
            .lock()
            .expect("watcher state list lock poisoned")
            .iter()
            .map(|s| s.read().expect("watcher state lock poisoned").clone())
            .collect();

        let live: Vec<&WatcherState> = states.iter().filter(|s| !s.given_up).collect();
        let active_namespaces: Vec<String> =
            live.iter().map(|s| s.namespace.clone()).collect();

        let connection = ConnectionState {
            healthy: !live.is_empty() && live.iter().all(|s| s.healthy),
            last_successful_connection: states.iter().filter_map(|s| s.last_event_at).max(),
            consecutive_failures: live.iter().map(|s| s.consecutive_failures).max().unwrap_or(0),
            current_backoff_ms: live.iter().map(|s| s.current_backoff_ms).max().unwrap_or(0),
        };

        let cache_stats = self.cache.stats();
        let metrics = self
            .metrics
            .snapshot(cache_stats.entries, cache_stats.hit_rate);

        HealthSnapshot {
            active_namespaces,
            connection,
            cache: cache_stats,
            metrics,
        }
    }
}

/// One diagnosis worker: pulls jobs off the shared queue and processes
/// them until shutdown. An in-flight diagnosis is cancelled promptly
/// when shutdown wins the select.
#[allow(clippy::too_many_arguments)]
async fn diagnosis_worker(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    mut shutdown: broadcast::Receiver<()>,
    cache: Arc<DiagnosisCache>,
    collector: Arc<DiagnosticCollector>,
    sinks: Arc<SinkSet>,
    metrics: Arc<Metrics>,
    timeout_ms: u64,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.recv() => break,
            job = async { jobs.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        let _ = (job, &cache, &collector, &sinks, &metrics, timeout_ms);
    }
    debug!("Diagnosis worker {} stopped", worker_id);
}

/// The shared dispatch logic: cache lookup, collection under the hard
/// deadline on a miss, then sink handoff.
async fn process_job(
    job: DispatchJob,
    cache: Arc<DiagnosisCache>,
    collector: Arc<DiagnosticCollector>,
    sinks: Arc<SinkSet>,
    metrics: Arc<Metrics>,
    timeout_ms: u64,
) {
    let DispatchJob {
        mut event,
        pod,
        diagnose,
    } = job;

    if diagnose {
        let key = event.cache_key();
        if let Some(cached) = cache.get(&key) {
            debug!("Diagnosis cache hit for {}", key);
            // Nothing ran for this event; the result is borrowed from
            // an earlier run.
            event.diagnosis = DiagnosisOutcome {
                executed: false,
                cached: true,
                duration_ms: None,
                result: Some(cached),
            };
        } else {
            metrics.inc_diagnosis_calls();
            let started = std::time::Instant::now();
            match tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                collector.collect(&pod),
            )
            .await
            {
                Ok(bundle) => {
                    let hint = collector.rule_hint(&bundle.primary_pod);
                    let summary = collector::summarize(&bundle, hint);
                    cache.put(&key, summary.clone());
                    event.diagnosis = DiagnosisOutcome {
                        executed: true,
                        cached: false,
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        result: Some(summary),
                    };
                }
                Err(_) => {
                    warn!("Diagnosis for {} timed out after {}ms", key, timeout_ms);
                    event.diagnosis = DiagnosisOutcome {
                        executed: false,
                        cached: false,
                        duration_ms: Some(started.elapsed().as_millis() as u64),
                        result: Some(format!("diagnosis timed out after {}ms", timeout_ms)),
                    };
                }
            }
        }
    }

    sinks.deliver(&event).await;
}

/// Periodic TTL sweep of the diagnosis cache.
async fn cache_sweeper(cache: Arc<DiagnosisCache>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                let removed = cache.sweep();
                let stats = cache.stats();
                crate::metrics::cache_entries().set(stats.entries as i64);
                crate::metrics::cache_hit_rate().set(stats.hit_rate);
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        }
    }
    debug!("Cache sweeper stopped");
}

/// Periodic PAK verification against the backend; the token lifecycle
/// itself lives entirely behind the backend client.
async fn pak_refresh_probe(backend: Arc<BackendClient>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(PAK_PROBE_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately and duplicates the startup
    // verification; skip it.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                match backend.verify_pak().await {
                    Ok(()) => debug!("PAK refresh probe ok"),
                    Err(e) => warn!("PAK refresh probe failed: {}", e),
                }
            }
        }
    }
    debug!("PAK refresh probe stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_targets_explicit_list_minus_excluded() {
        let targets = resolve_targets(
            &strings(&["prod", "staging", "kube-system"]),
            &strings(&["kube-system", "kube-public", "kube-node-lease"]),
            &strings(&["ignored-discovery"]),
        );
        assert_eq!(targets, strings(&["prod", "staging"]));
    }

    #[test]
    fn test_resolve_targets_discovery_when_unconfigured() {
        let targets = resolve_targets(
            &[],
            &strings(&["kube-system", "kube-public", "kube-node-lease"]),
            &strings(&["default", "prod", "kube-system", "kube-node-lease"]),
        );
        assert_eq!(targets, strings(&["default", "prod"]));
    }

    #[test]
    fn test_resolve_targets_deduplicates() {
        let targets = resolve_targets(&strings(&["prod", "prod", "dev"]), &[], &[]);
        assert_eq!(targets, strings(&["prod", "dev"]));
    }

    #[test]
    fn test_resolve_targets_can_be_empty() {
        let targets = resolve_targets(&strings(&["kube-system"]), &strings(&["kube-system"]), &[]);
        assert!(targets.is_empty());
    }
}
