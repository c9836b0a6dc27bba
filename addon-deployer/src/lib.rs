//! Addon resource deployment coordinator.
//!
//! Provisions shared backing instances and per-tenant bindings for platform
//! addons (config centers, databases, brokers, ...). The [`Coordinator`] walks
//! an addon's dependency tree, drives a [`DeployHandler`] through the deploy
//! lifecycle and compensates everything it created when a step fails.

pub mod audit;
pub mod backend;
pub mod callback;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod model;
pub mod registry;
pub mod rollback;
pub mod store;

pub use audit::DeployAuditLogger;
pub use backend::{BackendError, InfraBackend};
pub use callback::{CallbackNotifier, HttpCallbackNotifier, NoopCallbackNotifier};
pub use config::DeployerConfig;
pub use coordinator::{Coordinator, ResourceApi};
pub use error::{DeployError, Result};
pub use handler::{DefaultHandler, DeployHandler};
pub use model::{ResourceDeployRequest, ResourceDeployResult};
pub use registry::{HandlerRegistry, RegistryError};
pub use store::{DataStore, MemoryStore, StoreError};
