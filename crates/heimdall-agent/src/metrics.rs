/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! This module provides Prometheus metrics for the Heimdall agent and
//! the atomic counters backing the health snapshot. The same
//! increment paths feed both: the snapshot reads the atomics, the
//! `/metrics` endpoint encodes the Prometheus registry.

use chrono::{DateTime, TimeZone, Utc};
use heimdall_models::models::health::MetricsSnapshot;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

/// Global Prometheus registry for all agent metrics
static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Failure events produced by the classifier
pub fn failures_detected_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "heimdall_agent_failures_detected_total",
            "Total number of pod failure events detected",
        );
        let counter = IntCounter::with_opts(opts).expect("Failed to create failures counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register failures counter");
        counter
    })
}

/// Non-cached diagnosis collection runs
pub fn diagnosis_calls_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "heimdall_agent_diagnosis_calls_total",
            "Total number of non-cached diagnosis runs",
        );
        let counter = IntCounter::with_opts(opts).expect("Failed to create diagnosis counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register diagnosis counter");
        counter
    })
}

/// Watch stream reconnect attempts
pub fn reconnection_attempts_total() -> &'static IntCounter {
    static COUNTER: OnceLock<IntCounter> = OnceLock::new();
    COUNTER.get_or_init(|| {
        let opts = Opts::new(
            "heimdall_agent_reconnection_attempts_total",
            "Total number of watch stream reconnect attempts",
        );
        let counter = IntCounter::with_opts(opts).expect("Failed to create reconnect counter");
        registry()
            .register(Box::new(counter.clone()))
            .expect("Failed to register reconnect counter");
        counter
    })
}

/// Live diagnosis cache entries
pub fn cache_entries() -> &'static IntGauge {
    static GAUGE: OnceLock<IntGauge> = OnceLock::new();
    GAUGE.get_or_init(|| {
        let opts = Opts::new(
            "heimdall_agent_cache_entries",
            "Number of live diagnosis cache entries",
        );
        let gauge = IntGauge::with_opts(opts).expect("Failed to create cache entries gauge");
        registry()
            .register(Box::new(gauge.clone()))
            .expect("Failed to register cache entries gauge");
        gauge
    })
}

/// Diagnosis cache hit rate
pub fn cache_hit_rate() -> &'static Gauge {
    static GAUGE: OnceLock<Gauge> = OnceLock::new();
    GAUGE.get_or_init(|| {
        let opts = Opts::new(
            "heimdall_agent_cache_hit_rate",
            "Diagnosis cache hits divided by lookups",
        );
        let gauge = Gauge::with_opts(opts).expect("Failed to create cache hit rate gauge");
        registry()
            .register(Box::new(gauge.clone()))
            .expect("Failed to register cache hit rate gauge");
        gauge
    })
}

/// Encodes all registered metrics in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to UTF-8")
}

/// Atomic counters backing the health snapshot. Increment paths also
/// bump the matching Prometheus series.
pub struct Metrics {
    total_failures_detected: AtomicU64,
    diagnosis_calls_executed: AtomicU64,
    reconnection_attempts: AtomicU64,
    last_health_check_ms: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            total_failures_detected: AtomicU64::new(0),
            diagnosis_calls_executed: AtomicU64::new(0),
            reconnection_attempts: AtomicU64::new(0),
            last_health_check_ms: AtomicI64::new(0),
        }
    }

    pub fn inc_failures_detected(&self) {
        self.total_failures_detected.fetch_add(1, Ordering::Relaxed);
        failures_detected_total().inc();
    }

    pub fn inc_diagnosis_calls(&self) {
        self.diagnosis_calls_executed.fetch_add(1, Ordering::Relaxed);
        diagnosis_calls_total().inc();
    }

    pub fn inc_reconnection_attempts(&self) {
        self.reconnection_attempts.fetch_add(1, Ordering::Relaxed);
        reconnection_attempts_total().inc();
    }

    pub fn mark_health_check(&self, at: DateTime<Utc>) {
        self.last_health_check_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn total_failures_detected(&self) -> u64 {
        self.total_failures_detected.load(Ordering::Relaxed)
    }

    pub fn diagnosis_calls_executed(&self) -> u64 {
        self.diagnosis_calls_executed.load(Ordering::Relaxed)
    }

    pub fn reconnection_attempts(&self) -> u64 {
        self.reconnection_attempts.load(Ordering::Relaxed)
    }

    /// Assembles the snapshot, folding in cache figures and updating
    /// the cache gauges.
    pub fn snapshot(&self, cache_entry_count: usize, hit_rate: f64) -> MetricsSnapshot {
        cache_entries().set(cache_entry_count as i64);
        cache_hit_rate().set(hit_rate);

        let last_ms = self.last_health_check_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_failures_detected: self.total_failures_detected(),
            diagnosis_calls_executed: self.diagnosis_calls_executed(),
            reconnection_attempts: self.reconnection_attempts(),
            cache_entries: cache_entry_count,
            cache_hit_rate: hit_rate,
            last_health_check: if last_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_ms).single()
            },
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new();
        metrics.inc_failures_detected();
        metrics.inc_failures_detected();
        metrics.inc_diagnosis_calls();
        metrics.inc_reconnection_attempts();

        assert_eq!(metrics.total_failures_detected(), 2);
        assert_eq!(metrics.diagnosis_calls_executed(), 1);
        assert_eq!(metrics.reconnection_attempts(), 1);
    }

    #[test]
    fn test_snapshot_reflects_counters_and_cache() {
        let metrics = Metrics::new();
        metrics.inc_failures_detected();
        metrics.mark_health_check(Utc::now());

        let snapshot = metrics.snapshot(7, 0.25);
        assert_eq!(snapshot.total_failures_detected, 1);
        assert_eq!(snapshot.cache_entries, 7);
        assert_eq!(snapshot.cache_hit_rate, 0.25);
        assert!(snapshot.last_health_check.is_some());
    }

    #[test]
    fn test_snapshot_without_health_check() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot(0, 0.0);
        assert!(snapshot.last_health_check.is_none());
    }

    #[test]
    fn test_encode_metrics_exposition_format() {
        // Touch a counter so the registry has at least one family.
        failures_detected_total();
        let text = encode_metrics();
        assert!(text.contains("heimdall_agent_failures_detected_total"));
    }
}
