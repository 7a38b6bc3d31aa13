/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # CLI Commands Module
//!
//! Implements the `start` command: the agent's full startup sequence
//! and graceful shutdown.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (fatal on error, before anything starts)
//! 2. Initialize telemetry (tracing + optional OTLP export)
//! 3. Create the Kubernetes client and facade
//! 4. Build the supervisor and validate connectivity
//! 5. Start the health check HTTP server
//! 6. Start the supervisor (watchers, workers, periodic tasks)
//! 7. Wait for SIGINT/SIGTERM, then stop everything cleanly

use crate::health;
use crate::k8s::api::{self, KubeApi};
use crate::supervisor::Supervisor;
use heimdall_utils::config::Settings;
use heimdall_utils::telemetry;
use heimdall_utils::telemetry::prelude::*;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal::ctrl_c;

pub async fn start() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Configuration errors are fatal before any watcher starts.
    let settings = Arc::new(Settings::new(None)?);

    telemetry::init(
        &settings.telemetry,
        &settings.agent.cluster_name,
        &settings.log.level,
        &settings.log.format,
    )
    .expect("Failed to initialize telemetry");

    info!("Starting Heimdall agent for cluster {}", settings.agent.cluster_name);

    info!("Initializing Kubernetes client");
    let client = api::create_k8s_client(settings.agent.kubeconfig_path.as_deref()).await?;
    let kube = KubeApi::new(client);

    let supervisor = Arc::new(Supervisor::new(settings.clone(), kube));

    info!("Validating connectivity and preflighting external endpoints");
    supervisor.initialize().await?;

    // Start health check HTTP server
    let health_port = settings.agent.health_port.unwrap_or(8080);
    info!("Starting health check server on port {}", health_port);
    let health_state = health::HealthState {
        supervisor: supervisor.clone(),
        start_time: SystemTime::now(),
    };
    let health_router = health::configure_health_routes(health_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", health_port)).await?;
    let _health_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_router).await {
            error!("Health check server failed: {}", e);
        }
    });

    info!("Starting namespace watchers");
    supervisor.start().await?;

    // Run until a shutdown signal arrives.
    if let Err(e) = ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    } else {
        info!("Received shutdown signal");
    }

    supervisor.stop().await;
    info!("Shutdown complete");

    // Shutdown telemetry, flushing any pending traces
    telemetry::shutdown();

    Ok(())
}
