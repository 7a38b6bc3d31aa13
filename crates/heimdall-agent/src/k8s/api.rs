/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Kubernetes API Module
//!
//! Thin facade over the Kubernetes API server. The pipeline consumes
//! pods, events, logs, and namespace lists exclusively through
//! [`KubeApi`]; errors surface as a kind ([`ApiError`]), never as raw
//! transport errors, and watch streams are delivered as typed
//! [`PodWatchEvent`]s.
//!
//! ## Error Handling
//!
//! - `NotFound` / `Forbidden`: the affected call returns the kind and
//!   the caller degrades (empty result + warning)
//! - `Transient`: everything else — retried here with exponential
//!   backoff for reads, or by the watcher's reconnect loop for streams
//!
//! Every outbound call carries an overall deadline.

use crate::k8s::pod;
use backoff::ExponentialBackoffBuilder;
use futures::{Stream, StreamExt};
use heimdall_models::models::bundle::EventRecord;
use heimdall_models::models::pod::PodRecord;
use k8s_openapi::api::core::v1::{Event, Namespace, Pod};
use kube::api::{Api, ListParams, LogParams, WatchEvent, WatchParams};
use kube::Client;
use kube::Error as KubeError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Overall deadline for a single read call, retries included.
const API_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Server-side watch window; the stream closes normally after this and
/// the watcher reopens it.
const WATCH_WINDOW_SECONDS: u32 = 290;

/// Error kind surfaced by the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    /// The requested object does not exist.
    NotFound,
    /// The agent's service account may not read the object.
    Forbidden,
    /// Anything else: connectivity, server-side trouble, timeouts.
    Transient,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound => write!(f, "resource not found"),
            ApiError::Forbidden => write!(f, "access forbidden"),
            ApiError::Transient => write!(f, "transient API error"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<KubeError> for ApiError {
    fn from(error: KubeError) -> Self {
        match &error {
            KubeError::Api(api_err) => match api_err.code {
                404 => ApiError::NotFound,
                403 => ApiError::Forbidden,
                _ => ApiError::Transient,
            },
            _ => ApiError::Transient,
        }
    }
}

impl ApiError {
    fn from_status(status: &kube::core::ErrorResponse) -> Self {
        match status.code {
            404 => ApiError::NotFound,
            403 => ApiError::Forbidden,
            _ => ApiError::Transient,
        }
    }
}

/// A pod event from a namespace watch stream.
#[derive(Debug, Clone)]
pub enum PodWatchEvent {
    Added(PodRecord),
    Modified(PodRecord),
    Deleted(PodRecord),
}

/// Determines if a Kubernetes error is retryable
fn is_retryable_error(error: &KubeError) -> bool {
    match error {
        KubeError::Api(api_err) => {
            matches!(api_err.code, 429 | 500 | 503 | 504)
                || matches!(
                    api_err.reason.as_str(),
                    "ServiceUnavailable" | "InternalError" | "Timeout"
                )
        }
        _ => false,
    }
}

/// Executes a Kubernetes read with retries on retryable errors.
async fn with_retries<F, Fut, T>(operation: F) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, KubeError>>,
{
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_interval(Duration::from_secs(2))
        .with_multiplier(2.0)
        .with_max_elapsed_time(Some(Duration::from_secs(8)))
        .build();

    let operation_with_backoff = || async {
        match operation().await {
            Ok(value) => Ok(value),
            Err(error) => {
                if is_retryable_error(&error) {
                    warn!("Retryable Kubernetes API error: {}", error);
                    Err(backoff::Error::Transient {
                        err: error,
                        retry_after: None,
                    })
                } else {
                    Err(backoff::Error::Permanent(error))
                }
            }
        }
    };

    match backoff::future::retry(backoff, operation_with_backoff).await {
        Ok(value) => Ok(value),
        Err(error) => Err(ApiError::from(error)),
    }
}

/// Applies the per-call deadline to a facade operation.
async fn bounded<T, F>(future: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(API_CALL_TIMEOUT, future).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Transient),
    }
}

/// Creates a Kubernetes client using either in-cluster config or a
/// provided kubeconfig path.
pub async fn create_k8s_client(
    kubeconfig_path: Option<&str>,
) -> Result<Client, Box<dyn std::error::Error + Send + Sync>> {
    let config = match kubeconfig_path {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await?
        }
        None => kube::Config::infer().await?,
    };
    Ok(Client::try_from(config)?)
}

/// The API facade handed to every KubeClient-consuming component.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Checks API server reachability.
    pub async fn ping(&self) -> Result<(), ApiError> {
        self.client
            .apiserver_version()
            .await
            .map(|_| ())
            .map_err(ApiError::from)
    }

    /// Reads a single pod.
    pub async fn read_pod(&self, namespace: &str, name: &str) -> Result<PodRecord, ApiError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let name = name.to_string();
        let pod = bounded(with_retries(|| {
            let pods = pods.clone();
            let name = name.clone();
            async move { pods.get(&name).await }
        }))
        .await?;
        Ok(pod::pod_record(&pod))
    }

    /// Lists pods in a namespace.
    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>, ApiError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = bounded(with_retries(|| {
            let pods = pods.clone();
            async move { pods.list(&ListParams::default()).await }
        }))
        .await?;
        Ok(list.items.iter().map(pod::pod_record).collect())
    }

    /// Lists events in a namespace matching a field selector, e.g.
    /// `involvedObject.name=<name>`.
    pub async fn list_events(
        &self,
        namespace: &str,
        field_selector: &str,
    ) -> Result<Vec<EventRecord>, ApiError> {
        let events: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let selector = field_selector.to_string();
        let list = bounded(with_retries(|| {
            let events = events.clone();
            let selector = selector.clone();
            async move { events.list(&ListParams::default().fields(&selector)).await }
        }))
        .await?;
        Ok(list.items.iter().map(pod::event_record).collect())
    }

    /// Tails a container's logs, up to `tail_lines` lines. The returned
    /// lines are raw; callers sanitize before letting them leave the
    /// component boundary.
    pub async fn tail_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &str,
        tail_lines: i64,
    ) -> Result<Vec<String>, ApiError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        let text = bounded(async {
            pods.logs(pod_name, &params).await.map_err(ApiError::from)
        })
        .await?;
        Ok(text.lines().map(|l| l.to_string()).collect())
    }

    /// Lists all namespace names.
    pub async fn list_namespaces(&self) -> Result<Vec<String>, ApiError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = bounded(with_retries(|| {
            let namespaces = namespaces.clone();
            async move { namespaces.list(&ListParams::default()).await }
        }))
        .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    /// Opens a long-lived pod watch for a namespace. The stream yields
    /// typed events; it ends when the server closes the watch window,
    /// on API error, or when the caller drops it. Dropping the stream
    /// is the cancellation path: no further events are observed after
    /// the drop.
    pub async fn watch_pods(
        &self,
        namespace: &str,
    ) -> Result<impl Stream<Item = Result<PodWatchEvent, ApiError>> + Send, ApiError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = WatchParams::default().timeout(WATCH_WINDOW_SECONDS);
        let stream = pods.watch(&params, "0").await.map_err(ApiError::from)?;

        Ok(stream.filter_map(|item| async move {
            match item {
                Ok(WatchEvent::Added(p)) => Some(Ok(PodWatchEvent::Added(pod::pod_record(&p)))),
                Ok(WatchEvent::Modified(p)) => {
                    Some(Ok(PodWatchEvent::Modified(pod::pod_record(&p))))
                }
                Ok(WatchEvent::Deleted(p)) => {
                    Some(Ok(PodWatchEvent::Deleted(pod::pod_record(&p))))
                }
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(status)) => Some(Err(ApiError::from_status(&status))),
                Err(e) => Some(Err(ApiError::from(e))),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error_response(code: u16, reason: &str) -> kube::core::ErrorResponse {
        kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: reason.to_string(),
            code,
        }
    }

    #[test]
    fn test_api_error_kinds_from_codes() {
        assert_eq!(
            ApiError::from(KubeError::Api(api_error_response(404, "NotFound"))),
            ApiError::NotFound
        );
        assert_eq!(
            ApiError::from(KubeError::Api(api_error_response(403, "Forbidden"))),
            ApiError::Forbidden
        );
        assert_eq!(
            ApiError::from(KubeError::Api(api_error_response(500, "InternalError"))),
            ApiError::Transient
        );
    }

    #[test]
    fn test_retryable_error_classification() {
        assert!(is_retryable_error(&KubeError::Api(api_error_response(
            503,
            "ServiceUnavailable"
        ))));
        assert!(is_retryable_error(&KubeError::Api(api_error_response(
            429, "TooManyRequests"
        ))));
        assert!(!is_retryable_error(&KubeError::Api(api_error_response(
            404, "NotFound"
        ))));
        assert!(!is_retryable_error(&KubeError::Api(api_error_response(
            403, "Forbidden"
        ))));
    }

    #[test]
    fn test_api_error_display_is_kind_only() {
        // Errors surface a kind, not a transport message.
        assert_eq!(ApiError::NotFound.to_string(), "resource not found");
        assert_eq!(ApiError::Forbidden.to_string(), "access forbidden");
        assert_eq!(ApiError::Transient.to_string(), "transient API error");
    }
}
