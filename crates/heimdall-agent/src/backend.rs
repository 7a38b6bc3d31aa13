/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Backend Communication Module
//!
//! Handles all communication between the agent and the analysis
//! backend: the readiness preflight, PAK verification (doubling as the
//! periodic token refresh probe), failure event reporting, and the
//! optional remote release inference call.
//!
//! The PAK is the only credential; it travels as a bearer header and
//! never reaches the rest of the pipeline.

use heimdall_models::models::failure::FailureEvent;
use heimdall_models::models::pod::PodRecord;
use heimdall_models::models::release::{ReleaseInfo, ResolutionEvidence, ResolutionMethod};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Container identity sent to the inference endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceContainer {
    pub name: String,
    pub image: Option<String>,
}

/// Request body for remote release inference.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseInferenceRequest {
    pub labels: std::collections::BTreeMap<String, String>,
    pub annotations: std::collections::BTreeMap<String, String>,
    pub containers: Vec<InferenceContainer>,
    pub owner_refs: Vec<String>,
}

impl ReleaseInferenceRequest {
    pub fn from_pod(pod: &PodRecord) -> Self {
        ReleaseInferenceRequest {
            labels: pod.labels.clone(),
            annotations: pod.annotations.clone(),
            containers: pod
                .all_containers()
                .map(|c| InferenceContainer {
                    name: c.name.clone(),
                    image: c.image.clone(),
                })
                .collect(),
            owner_refs: pod.owner_references.iter().map(|o| o.name.clone()).collect(),
        }
    }
}

/// Response body from remote release inference.
#[derive(Debug, Clone, Deserialize)]
struct ReleaseInferenceResponse {
    release_name: String,
    confidence: f64,
    method: Option<String>,
}

/// Report wrapper sent to the backend for every failure event.
#[derive(Debug, Clone, Serialize)]
struct FailureReport<'a> {
    cluster_name: &'a str,
    event: &'a FailureEvent,
}

/// Client for the analysis backend.
pub struct BackendClient {
    client: Client,
    base_url: String,
    pak: String,
    cluster_name: String,
}

impl BackendClient {
    pub fn new(base_url: &str, pak: &str, cluster_name: &str) -> Self {
        BackendClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            pak: pak.to_string(),
            cluster_name: cluster_name.to_string(),
        }
    }

    /// Waits for the backend to become ready, up to `max_retries`
    /// attempts spaced one second apart. Returns whether it ever
    /// answered; the caller decides how hard to fail.
    pub async fn wait_ready(&self, max_retries: u32) -> bool {
        let readyz_url = format!("{}/readyz", self.base_url);

        for attempt in 1..=max_retries {
            match self.client.get(&readyz_url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        info!("Successfully connected to backend at {}", readyz_url);
                        return true;
                    }
                    warn!(
                        "Backend at {} returned non-success status: {}",
                        readyz_url,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to backend at {} (attempt {}/{}): {:?}",
                        readyz_url, attempt, max_retries, e
                    );
                }
            }
            if attempt < max_retries {
                sleep(Duration::from_secs(1)).await;
            }
        }
        false
    }

    /// Verifies the agent's PAK with the backend. Called once at
    /// startup and then periodically as the token refresh probe.
    pub async fn verify_pak(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let url = format!("{}/api/v1/auth/pak", self.base_url);
        debug!("Verifying agent PAK at {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.pak))
            .body("{}") // Empty JSON body
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send PAK verification request: {}", e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync>
            })?;

        match response.status() {
            StatusCode::OK => {
                debug!("Successfully verified agent PAK");
                Ok(())
            }
            StatusCode::UNAUTHORIZED => {
                error!("Agent PAK verification failed: unauthorized");
                Err("Invalid agent PAK".into())
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                error!(
                    "PAK verification failed with status {}: {}",
                    status, error_body
                );
                Err(format!(
                    "PAK verification failed. Status: {}, Body: {}",
                    status, error_body
                )
                .into())
            }
        }
    }

    /// Forwards an enriched failure event to the backend.
    pub async fn report_failure_event(
        &self,
        event: &FailureEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let url = format!(
            "{}/api/v1/clusters/{}/failure-events",
            self.base_url, self.cluster_name
        );
        debug!(
            "Reporting failure event for {}/{} to {}",
            event.namespace, event.pod_name, url
        );

        let report = FailureReport {
            cluster_name: &self.cluster_name,
            event,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.pak))
            .json(&report)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send failure report: {}", e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync>
            })?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                debug!(
                    "Successfully reported failure for {}/{}",
                    event.namespace, event.pod_name
                );
                Ok(())
            }
            status => {
                let error_body = response.text().await.unwrap_or_default();
                error!(
                    "Failed to report failure event. Status {}: {}",
                    status, error_body
                );
                Err(format!(
                    "Failure report rejected. Status: {}, Body: {}",
                    status, error_body
                )
                .into())
            }
        }
    }

    /// Asks the backend to infer a pod's release. Failures of any kind
    /// (transport, status, deadline) are silent: the resolver falls
    /// back to its local answer.
    pub async fn infer_release(
        &self,
        request: &ReleaseInferenceRequest,
        deadline: Duration,
    ) -> Option<ReleaseInfo> {
        let url = format!("{}/api/v1/infer/release", self.base_url);

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.pak))
            .timeout(deadline)
            .json(request)
            .send();

        let response = match send.await {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                debug!("Release inference returned status {}", response.status());
                return None;
            }
            Err(e) => {
                debug!("Release inference call failed: {}", e);
                return None;
            }
        };

        let body: ReleaseInferenceResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Failed to deserialize release inference response: {}", e);
                return None;
            }
        };

        let method = match body.method.as_deref() {
            Some("annotation") => ResolutionMethod::Annotation,
            Some("label") => ResolutionMethod::Label,
            Some("naming") => ResolutionMethod::Naming,
            Some("none") => ResolutionMethod::None,
            _ => ResolutionMethod::Owner,
        };

        Some(ReleaseInfo {
            release_name: body.release_name,
            confidence: body.confidence.clamp(0.0, 1.0),
            method,
            evidence: ResolutionEvidence::default(),
        })
    }
}
