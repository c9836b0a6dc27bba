//! DataStore trait definitions.
//!
//! Rows are read by key or filtered by fields and written back as upserts.
//! Soft deletion is expressed through the `is_deleted` flag on each row.

use async_trait::async_trait;

use crate::model::{
    AddonDefinition, AddonVersion, InstanceData, RequestRelation, TenantData,
};

use super::error::Result;

// =============================================================================
// Domain Store Traits
// =============================================================================

/// Store trait for instance rows.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Get an instance by ID, deleted or not.
    async fn get_instance(&self, id: &str) -> Result<Option<InstanceData>>;

    /// Find the live instance for (engine, version, az).
    ///
    /// If several live rows exist the most recently updated one is returned.
    async fn find_instance(
        &self,
        engine: &str,
        version: &str,
        az: &str,
    ) -> Result<Option<InstanceData>>;

    /// Insert or replace an instance row.
    async fn save_instance(&self, instance: &InstanceData) -> Result<()>;
}

/// Store trait for tenant rows.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Get a tenant by ID, deleted or not.
    async fn get_tenant(&self, id: &str) -> Result<Option<TenantData>>;

    /// Insert or replace a tenant row.
    async fn save_tenant(&self, tenant: &TenantData) -> Result<()>;
}

/// Store trait for dependency edges between deployed resources.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Record a parent → child edge. Recording a live edge again is a no-op.
    async fn save_relation(&self, parent_id: &str, child_id: &str) -> Result<RequestRelation>;

    /// IDs of live children of `parent_id`, in insertion order.
    async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>>;

    /// Soft-delete a live edge.
    async fn delete_relation(&self, parent_id: &str, child_id: &str) -> Result<()>;
}

/// Store trait for catalog metadata.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Get the addon definition for an engine.
    async fn get_addon(&self, engine: &str) -> Result<Option<AddonDefinition>>;

    /// Get one released version of an engine.
    async fn get_addon_version(&self, engine: &str, version: &str)
    -> Result<Option<AddonVersion>>;

    /// Get the most recently released version of an engine.
    async fn get_latest_addon_version(&self, engine: &str) -> Result<Option<AddonVersion>>;
}

// =============================================================================
// Composite DataStore Trait
// =============================================================================

/// Composite data store trait combining all domain stores.
///
/// This is the trait the default handler works with. It provides:
/// - Instance lookup and upsert
/// - Tenant lookup and upsert
/// - Dependency edge bookkeeping
/// - Read-only catalog access
pub trait DataStore: InstanceStore + TenantStore + RelationStore + CatalogStore + Send + Sync {}
