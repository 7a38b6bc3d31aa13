/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Heimdall Models
//!
//! Shared data types for the Heimdall pod-failure watch daemon: the
//! SDK-free pod record, failure events produced by the classifier,
//! release resolution results, diagnostic bundles, diagnosis rules, and
//! the health/metrics snapshot structures.
//!
//! Everything here is plain serde data. Kubernetes SDK types never
//! appear in this crate; the agent's k8s adapter copies the fields the
//! pipeline needs into [`models::pod::PodRecord`] at the boundary.

pub mod models;
