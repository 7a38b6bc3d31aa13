/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Alert webhook sink. Fire-and-forget delivery of failure events that
//! pass the configured severity filter, with a bounded exponential
//! retry policy of its own. Delivery failures are logged and never
//! propagate into the pipeline.

use heimdall_models::models::failure::{FailureEvent, Severity};
use heimdall_utils::config::{AlertRetry, Alerting};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Webhook payload for one failure event.
#[derive(Debug, Clone, Serialize)]
struct AlertPayload<'a> {
    severity: Severity,
    icon: &'static str,
    pattern: &'a heimdall_models::models::failure::FailurePattern,
    pod_name: &'a str,
    namespace: &'a str,
    reason: &'a str,
    detected_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnosis: Option<&'a str>,
}

/// The configured alert sink.
pub struct AlertSink {
    client: Client,
    url: String,
    filters: Vec<Severity>,
    retry: AlertRetry,
}

impl AlertSink {
    /// Builds the sink from config; `None` when alerting is disabled
    /// or no webhook URL is set.
    pub fn from_settings(alerting: &Alerting) -> Option<Self> {
        if !alerting.enabled {
            return None;
        }
        let url = alerting.webhook_url.clone()?;
        let filters = alerting
            .severity_filters
            .iter()
            .filter_map(|s| {
                let parsed = Severity::parse(s);
                if parsed.is_none() {
                    warn!("Ignoring unknown alert severity filter {:?}", s);
                }
                parsed
            })
            .collect();
        Some(AlertSink {
            client: Client::new(),
            url,
            filters,
            retry: alerting.retry.clone(),
        })
    }

    /// Whether this severity is configured to alert.
    pub fn accepts(&self, severity: Severity) -> bool {
        self.filters.contains(&severity)
    }

    /// Probes the webhook endpoint once. Used only as a startup
    /// preflight; failure is informational.
    pub async fn preflight(&self) -> Result<(), String> {
        self.client
            .get(&self.url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify_error(&e))
    }

    /// Delivers one failure event, retrying with exponential backoff
    /// up to the configured attempt limit. Never returns an error.
    pub async fn emit(&self, event: &FailureEvent) {
        if !self.accepts(event.severity) {
            return;
        }

        let payload = AlertPayload {
            severity: event.severity,
            icon: event.severity.icon(),
            pattern: &event.pattern,
            pod_name: &event.pod_name,
            namespace: &event.namespace,
            reason: &event.reason,
            detected_at: event.detected_at.to_rfc3339(),
            diagnosis: event.diagnosis.result.as_deref(),
        };

        let start = Instant::now();
        let mut delay = Duration::from_millis(self.retry.backoff_ms);
        let max_delay = Duration::from_millis(self.retry.max_backoff_ms);

        for attempt in 1..=self.retry.max_attempts.max(1) {
            match self.client.post(&self.url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "Alert for {}/{} delivered in {}ms (attempt {})",
                        event.namespace,
                        event.pod_name,
                        start.elapsed().as_millis(),
                        attempt
                    );
                    return;
                }
                Ok(response) => {
                    warn!(
                        "Alert webhook returned status {} (attempt {}/{})",
                        response.status(),
                        attempt,
                        self.retry.max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Alert delivery failed (attempt {}/{}): {}",
                        attempt,
                        self.retry.max_attempts,
                        classify_error(&e)
                    );
                }
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }

        warn!(
            "Giving up on alert for {}/{} after {} attempts",
            event.namespace, event.pod_name, self.retry.max_attempts
        );
    }
}

/// Classifies request errors for logging and retry decisions.
fn classify_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timed out".to_string()
    } else if error.is_connect() {
        "Connection failed".to_string()
    } else if error.is_request() {
        format!("Request error: {}", error)
    } else {
        format!("Error: {}", error)
    }
}
