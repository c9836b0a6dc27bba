//! Errors surfaced by handlers and the coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;
use crate::store::StoreError;

/// Errors that can occur while deploying or undeploying a resource.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Engine or version missing from the catalog.
    #[error("catalog entry not found: {0}")]
    CatalogNotFound(String),

    /// No registered handler accepts the engine.
    #[error("no handler for engine {0}")]
    NoHandler(String),

    /// Neither a tenant nor an instance has this id.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The tenant id was used before and the tenant is deleted.
    #[error("tenant id {0} is not valid anymore, a new id is required")]
    IdentityReused(String),

    /// The backend reported the topology as failed.
    #[error("topology {id} failed: {message}")]
    TopologyFailed { id: String, message: String },

    /// The topology did not become ready in time.
    #[error("topology {id} not ready after {waited:?}")]
    Timeout { id: String, waited: Duration },

    /// The caller cancelled the wait.
    #[error("deploy of {0} cancelled")]
    Cancelled(String),

    /// A handler specific step failed.
    #[error("{engine} handler: {message}")]
    Handler { engine: String, message: String },

    /// Some children could not be torn down; their edges are kept.
    #[error("failed to undeploy children of {parent}: {children:?}")]
    ChildTeardown {
        parent: String,
        children: Vec<String>,
    },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// A persisted config/options column could not be decoded or encoded.
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl DeployError {
    pub fn handler(engine: &str, message: impl Into<String>) -> Self {
        DeployError::Handler {
            engine: engine.to_string(),
            message: message.into(),
        }
    }
}

/// Result type for deploy operations.
pub type Result<T> = std::result::Result<T, DeployError>;
