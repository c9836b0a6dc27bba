//! Infrastructure backend contract.
//!
//! The backend (a scheduler) turns a declarative [`TopologyRequest`] into
//! running services and reports readiness. It also serves the per-zone
//! cluster configuration handlers derive endpoints from.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ConfigMap, TopologyRequest, TopologyStatus};

/// Errors reported by the infrastructure backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Cluster or topology not known to the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Client for the scheduler that runs addon topologies.
#[async_trait]
pub trait InfraBackend: Send + Sync {
    /// Read the cluster configuration of an availability zone.
    async fn cluster_info(&self, cluster: &str) -> Result<ConfigMap, BackendError>;

    /// Submit a topology. Returns once the backend accepted it.
    async fn create_topology(&self, request: &TopologyRequest) -> Result<(), BackendError>;

    /// Inspect the current status of a topology.
    async fn inspect_topology(&self, kind: &str, id: &str) -> Result<TopologyStatus, BackendError>;

    /// Delete a topology and everything it runs.
    async fn delete_topology(&self, kind: &str, id: &str) -> Result<(), BackendError>;
}
