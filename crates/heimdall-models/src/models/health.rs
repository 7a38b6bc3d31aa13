/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Health Snapshot Module
//!
//! Read-only structures exposed by the supervisor's `health_snapshot`
//! and served by the HTTP health endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-namespace watcher state, as reported in the health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatcherState {
    /// The watched namespace.
    pub namespace: String,
    /// When the watcher was started.
    pub started_at: DateTime<Utc>,
    /// When the last pod event arrived, if any.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Consecutive stream failures since the last successful event.
    pub consecutive_failures: u32,
    /// Current reconnect backoff, in milliseconds.
    pub current_backoff_ms: u64,
    /// Whether the watcher currently has a healthy stream.
    pub healthy: bool,
    /// Whether the watcher has given up after too many failures.
    pub given_up: bool,
}

impl WatcherState {
    pub fn new(namespace: &str, started_at: DateTime<Utc>) -> Self {
        WatcherState {
            namespace: namespace.to_string(),
            started_at,
            last_event_at: None,
            consecutive_failures: 0,
            current_backoff_ms: 0,
            healthy: false,
            given_up: false,
        }
    }
}

/// Supervisor-wide connection state, aggregated over all watchers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionState {
    /// Whether every live watcher has a healthy stream.
    pub healthy: bool,
    /// Most recent successful event receipt across watchers.
    pub last_successful_connection: Option<DateTime<Utc>>,
    /// Worst consecutive-failure count across watchers.
    pub consecutive_failures: u32,
    /// Worst current backoff across watchers, in milliseconds.
    pub current_backoff_ms: u64,
}

/// Diagnosis cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Configured capacity.
    pub max_entries: usize,
    /// Hits divided by lookups since start; 0 when no lookups yet.
    pub hit_rate: f64,
}

/// Pipeline counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Failure events produced by the classifier.
    pub total_failures_detected: u64,
    /// Non-cached diagnosis runs.
    pub diagnosis_calls_executed: u64,
    /// Watch stream reconnect attempts.
    pub reconnection_attempts: u64,
    /// Live cache entries.
    pub cache_entries: usize,
    /// Cache hit rate.
    pub cache_hit_rate: f64,
    /// When the snapshot was last taken.
    pub last_health_check: Option<DateTime<Utc>>,
}

/// The full read-only health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    /// Namespaces with a live (not given-up) watcher.
    pub active_namespaces: Vec<String>,
    /// Aggregated connection state.
    pub connection: ConnectionState,
    /// Cache statistics.
    pub cache: CacheStats,
    /// Pipeline counters.
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_state_new() {
        let state = WatcherState::new("prod", Utc::now());
        assert_eq!(state.namespace, "prod");
        assert_eq!(state.consecutive_failures, 0);
        assert!(!state.healthy);
        assert!(!state.given_up);
        assert!(state.last_event_at.is_none());
    }

    #[test]
    fn test_health_snapshot_serialization() {
        let snapshot = HealthSnapshot {
            active_namespaces: vec!["prod".to_string(), "staging".to_string()],
            connection: ConnectionState {
                healthy: true,
                last_successful_connection: Some(Utc::now()),
                consecutive_failures: 0,
                current_backoff_ms: 0,
            },
            cache: CacheStats {
                entries: 3,
                max_entries: 500,
                hit_rate: 0.5,
            },
            metrics: MetricsSnapshot {
                total_failures_detected: 7,
                diagnosis_calls_executed: 4,
                reconnection_attempts: 1,
                cache_entries: 3,
                cache_hit_rate: 0.5,
                last_health_check: Some(Utc::now()),
            },
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("active_namespaces"));
        assert!(json.contains("total_failures_detected"));
        let back: HealthSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }
}
