/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Heimdall Telemetry Module
//!
//! Tracing setup for the agent: an env-filtered `tracing-subscriber`
//! stack with text or JSON output, plus an optional OTLP span export
//! layer for clusters that run a collector. Exported spans carry the
//! agent's service identity and the name of the cluster it watches.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heimdall_utils::telemetry;
//!
//! telemetry::init(&settings.telemetry, &settings.agent.cluster_name,
//!     &settings.log.level, &settings.log.format)?;
//! tracing::info!("Agent started");
//! ```

use crate::config::Telemetry;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use opentelemetry_semantic_conventions as semconv;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Error type for telemetry initialization
#[derive(Debug)]
pub enum TelemetryError {
    /// Failed to create OTLP exporter
    ExporterError(String),
    /// Failed to set global subscriber
    SubscriberError(String),
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::ExporterError(e) => write!(f, "OTLP exporter error: {}", e),
            TelemetryError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Maps the configured sampling rate onto an SDK sampler. Rates at or
/// beyond the [0, 1] bounds degrade to always-off / always-on.
fn sampler_for(rate: f64) -> Sampler {
    if rate >= 1.0 {
        Sampler::AlwaysOn
    } else if rate <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(rate)
    }
}

/// Builds the OTLP-exporting tracer and installs its provider
/// globally so [`shutdown`] can flush it later.
fn build_tracer(config: &Telemetry, cluster_name: &str) -> Result<Tracer, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterError(e.to_string()))?;

    let resource = Resource::new(vec![
        KeyValue::new(
            semconv::resource::SERVICE_NAME,
            config.service_name.clone(),
        ),
        KeyValue::new(
            semconv::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
        KeyValue::new(
            semconv::resource::K8S_CLUSTER_NAME,
            cluster_name.to_string(),
        ),
    ]);

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler_for(config.sampling_rate))
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Initialize tracing for the agent.
///
/// With telemetry disabled this is just the env-filtered fmt
/// subscriber; enabling it stacks the OTLP export layer on top.
///
/// # Arguments
/// * `config` - Telemetry configuration
/// * `cluster_name` - Cluster identity attached to exported spans
/// * `log_level` - Log level filter string (e.g., "info", "debug")
/// * `log_format` - Log format ("text" or "json")
pub fn init(
    config: &Telemetry,
    cluster_name: &str,
    log_level: &str,
    log_format: &str,
) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let otel_layer = if config.enabled {
        Some(tracing_opentelemetry::layer().with_tracer(build_tracer(config, cluster_name)?))
    } else {
        None
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    let installed = if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.map_err(|e| TelemetryError::SubscriberError(e.to_string()))
}

/// Shutdown OpenTelemetry, flushing any pending spans.
///
/// Should be called during graceful shutdown so nothing buffered is
/// lost.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Re-export of the log macros the agent uses
pub mod prelude {
    pub use tracing::{debug, error, info, warn};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_for_bounds() {
        assert!(matches!(sampler_for(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(1.5), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-0.5), Sampler::AlwaysOff));
        match sampler_for(0.25) {
            Sampler::TraceIdRatioBased(rate) => assert_eq!(rate, 0.25),
            other => panic!("unexpected sampler: {:?}", other),
        }
    }

    #[test]
    fn test_disabled_telemetry_config() {
        let config = Telemetry {
            enabled: false,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "test-service".to_string(),
            sampling_rate: 0.1,
        };

        assert!(!config.enabled);
        assert_eq!(config.service_name, "test-service");
    }
}
