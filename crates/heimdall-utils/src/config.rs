/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Heimdall Config Module
//!
//! Common configuration framework for the Heimdall crates.
//!
//! # Variable Naming Convention
//!
//! - Struct fields use snake_case (e.g., `cluster_name`, `ttl_ms`)
//! - Environment variables use SCREAMING_SNAKE_CASE prefixed with
//!   "HEIMDALL__" (e.g., `HEIMDALL__BACKEND__URL`)
//! - Configuration file keys use snake_case (e.g., `backend.url`)
//!
//! # Configuration Overriding
//!
//! Values are loaded and overridden in the following order (later
//! sources take precedence):
//!
//! 1. Default values from the embedded `default.toml` file
//! 2. Values from an optional external configuration file
//! 3. Environment variables
//!
//! To override a value:
//! - In a configuration file: use the appropriate key
//!   (e.g., `cache.ttl_ms = 60000`)
//! - Using environment variables: set the variable with the "HEIMDALL__"
//!   prefix and "__" as separator (e.g., `HEIMDALL__CACHE__TTL_MS=60000`)
//!
//! The configuration is frozen after startup; there is no hot reload.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

// Include the default settings file as a string constant
const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

/// Represents the main settings structure for the application
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Logging configuration
    pub log: Log,
    /// Telemetry (tracing export) configuration
    pub telemetry: Telemetry,
    /// Agent identity and local endpoints
    pub agent: Agent,
    /// Analysis backend configuration
    pub backend: Backend,
    /// Namespace watch targets
    pub watch: Watch,
    /// Failure classifier thresholds
    pub classifier: Classifier,
    /// Diagnosis pipeline configuration
    pub diagnosis: Diagnosis,
    /// Diagnosis cache policy
    pub cache: Cache,
    /// Alert webhook configuration
    pub alerting: Alerting,
    /// Resilience policies
    pub resilience: Resilience,
}

/// Represents the logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,
    /// Log output format ("text" or "json")
    pub format: String,
}

/// Represents the telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Telemetry {
    /// Whether OTLP trace export is enabled
    pub enabled: bool,
    /// OTLP collector endpoint
    pub otlp_endpoint: String,
    /// Service name reported with traces
    pub service_name: String,
    /// Trace sampling rate in [0, 1]
    pub sampling_rate: f64,
}

/// Represents the agent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Agent {
    /// Cluster identity reported to the backend
    pub cluster_name: String,
    /// Health check HTTP server port
    pub health_port: Option<u16>,
    /// Kubeconfig path; in-cluster config when absent
    pub kubeconfig_path: Option<String>,
}

/// Represents the analysis backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Backend {
    /// Backend base URL
    pub url: String,
    /// PAK used as the bearer credential
    pub pak: String,
    /// Max number of readiness probe attempts at startup
    pub max_retries: u32,
    /// Remote release inference configuration
    pub inference: Inference,
}

/// Represents the remote release inference configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Inference {
    /// Whether remote inference may be consulted
    pub enabled: bool,
    /// Local confidence below which the remote endpoint is asked
    pub confidence_threshold: f64,
    /// Hard deadline for the remote call, in milliseconds
    pub timeout_ms: u64,
}

/// Represents the namespace watch configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Watch {
    /// Explicit watch targets; empty means discover all namespaces
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Namespaces subtracted from the watch targets
    pub exclude_namespaces: Vec<String>,
}

/// Represents the failure classifier thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct Classifier {
    /// Restart count at which the high-restart-count rule fires
    pub min_restart_threshold: i32,
    /// Pending age beyond which the long-pending rule fires
    pub max_pending_duration_ms: u64,
}

/// Represents the diagnosis pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Diagnosis {
    /// Master switch for diagnosis dispatch
    pub enabled: bool,
    /// Hard deadline per diagnosis, in milliseconds
    pub timeout_ms: u64,
    /// Optional path to a rule table overriding the embedded defaults
    pub rules_path: Option<String>,
}

/// Represents the diagnosis cache policy
#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    /// Entry time-to-live, in milliseconds
    pub ttl_ms: u64,
    /// Maximum number of entries
    pub max_entries: usize,
}

/// Represents the alert webhook configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Alerting {
    /// Whether alerts are emitted at all
    pub enabled: bool,
    /// Webhook URL alerts are posted to
    pub webhook_url: Option<String>,
    /// Severities that emit alerts
    pub severity_filters: Vec<String>,
    /// Alert delivery retry policy
    pub retry: AlertRetry,
}

/// Represents the alert delivery retry policy
#[derive(Debug, Deserialize, Clone)]
pub struct AlertRetry {
    /// Maximum delivery attempts per alert
    pub max_attempts: u32,
    /// Initial retry delay, in milliseconds
    pub backoff_ms: u64,
    /// Retry delay ceiling, in milliseconds
    pub max_backoff_ms: u64,
}

/// Represents the resilience policies
#[derive(Debug, Deserialize, Clone)]
pub struct Resilience {
    /// Watch stream reconnect policy
    pub reconnect: Reconnect,
}

/// Represents the watch stream reconnect policy
#[derive(Debug, Deserialize, Clone)]
pub struct Reconnect {
    /// Whether terminated streams are reconnected
    pub enabled: bool,
    /// First backoff delay, in milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff ceiling, in milliseconds
    pub max_backoff_ms: u64,
    /// Backoff growth factor
    pub multiplier: f64,
    /// Failures after which a watcher gives up
    pub max_consecutive_failures: u32,
}

impl Settings {
    /// Creates a new `Settings` instance
    ///
    /// # Arguments
    ///
    /// * `file` - An optional path to a configuration file
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the `Settings` instance or a `ConfigError`
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        // Start with default settings from the embedded TOML file
        let mut s = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, config::FileFormat::Toml));

        // If a configuration file is provided, add it as a source
        s = match file {
            Some(x) => s.add_source(File::with_name(x.as_str())),
            None => s,
        };

        // Add environment variables as a source, prefixed with "HEIMDALL"
        // and using "__" as a separator
        s = s.add_source(Environment::with_prefix("HEIMDALL").separator("__"));

        // Build the configuration
        let settings = s.build()?;

        // Deserialize the configuration into a Settings instance
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::Settings;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_settings_default_values() {
        let settings = Settings::new(None).unwrap();

        assert_eq!(settings.agent.cluster_name, "default");
        assert_eq!(settings.classifier.min_restart_threshold, 3);
        assert_eq!(settings.classifier.max_pending_duration_ms, 600_000);
        assert_eq!(settings.cache.max_entries, 500);
        assert_eq!(settings.resilience.reconnect.max_consecutive_failures, 5);
        assert!(settings.watch.namespaces.is_empty());
        assert_eq!(
            settings.watch.exclude_namespaces,
            vec!["kube-system", "kube-public", "kube-node-lease"]
        );
        assert!(settings.diagnosis.enabled);
        assert!(settings.diagnosis.rules_path.is_none());
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        std::env::set_var("HEIMDALL__CACHE__MAX_ENTRIES", "42");
        std::env::set_var("HEIMDALL__AGENT__CLUSTER_NAME", "staging-eu");

        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.cache.max_entries, 42);
        assert_eq!(settings.agent.cluster_name, "staging-eu");

        std::env::remove_var("HEIMDALL__CACHE__MAX_ENTRIES");
        std::env::remove_var("HEIMDALL__AGENT__CLUSTER_NAME");
    }
}
