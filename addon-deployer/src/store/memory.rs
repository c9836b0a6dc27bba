//! In-process DataStore for embedded deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::model::{AddonDefinition, AddonVersion, InstanceData, RequestRelation, TenantData};

use super::error::{Result, StoreError};
use super::traits::{CatalogStore, DataStore, InstanceStore, RelationStore, TenantStore};

#[derive(Debug, Default)]
struct MemoryState {
    instances: HashMap<String, InstanceData>,
    tenants: HashMap<String, TenantData>,
    relations: Vec<RequestRelation>,
    addons: HashMap<String, AddonDefinition>,
    versions: HashMap<(String, String), AddonVersion>,
}

/// DataStore keeping every table in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an addon definition.
    pub async fn register_addon(&self, addon: AddonDefinition) {
        let mut state = self.state.write().await;
        state.addons.insert(addon.engine.clone(), addon);
    }

    /// Register a released version. Re-registering identical content is a no-op.
    pub async fn register_addon_version(&self, version: AddonVersion) -> Result<()> {
        let mut state = self.state.write().await;
        let key = (version.engine.clone(), version.version.clone());
        match state.versions.get(&key) {
            Some(existing) if *existing != version => Err(StoreError::Conflict(format!(
                "addon {} version {} already registered with different content",
                key.0, key.1
            ))),
            Some(_) => Ok(()),
            None => {
                state.versions.insert(key, version);
                Ok(())
            }
        }
    }

    /// All instance rows, deleted or not.
    pub async fn list_instances(&self) -> Vec<InstanceData> {
        let state = self.state.read().await;
        state.instances.values().cloned().collect()
    }

    /// All relation rows, deleted or not.
    pub async fn list_relations(&self) -> Vec<RequestRelation> {
        let state = self.state.read().await;
        state.relations.clone()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn get_instance(&self, id: &str) -> Result<Option<InstanceData>> {
        let state = self.state.read().await;
        Ok(state.instances.get(id).cloned())
    }

    async fn find_instance(
        &self,
        engine: &str,
        version: &str,
        az: &str,
    ) -> Result<Option<InstanceData>> {
        let state = self.state.read().await;
        Ok(state
            .instances
            .values()
            .filter(|i| !i.is_deleted && i.engine == engine && i.version == version && i.az == az)
            .max_by_key(|i| i.updated_at)
            .cloned())
    }

    async fn save_instance(&self, instance: &InstanceData) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .instances
            .insert(instance.id.clone(), instance.clone());
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn get_tenant(&self, id: &str) -> Result<Option<TenantData>> {
        let state = self.state.read().await;
        Ok(state.tenants.get(id).cloned())
    }

    async fn save_tenant(&self, tenant: &TenantData) -> Result<()> {
        let mut state = self.state.write().await;
        state.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(())
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn save_relation(&self, parent_id: &str, child_id: &str) -> Result<RequestRelation> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.relations.iter().find(|r| {
            !r.is_deleted && r.parent_request_id == parent_id && r.child_request_id == child_id
        }) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let relation = RequestRelation {
            parent_request_id: parent_id.to_string(),
            child_request_id: child_id.to_string(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.relations.push(relation.clone());
        Ok(relation)
    }

    async fn list_child_ids(&self, parent_id: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| !r.is_deleted && r.parent_request_id == parent_id)
            .map(|r| r.child_request_id.clone())
            .collect())
    }

    async fn delete_relation(&self, parent_id: &str, child_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let relation = state
            .relations
            .iter_mut()
            .find(|r| {
                !r.is_deleted && r.parent_request_id == parent_id && r.child_request_id == child_id
            })
            .ok_or_else(|| StoreError::NotFound(format!("relation {} -> {}", parent_id, child_id)))?;
        relation.is_deleted = true;
        relation.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_addon(&self, engine: &str) -> Result<Option<AddonDefinition>> {
        let state = self.state.read().await;
        Ok(state.addons.get(engine).cloned())
    }

    async fn get_addon_version(
        &self,
        engine: &str,
        version: &str,
    ) -> Result<Option<AddonVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .get(&(engine.to_string(), version.to_string()))
            .cloned())
    }

    async fn get_latest_addon_version(&self, engine: &str) -> Result<Option<AddonVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .filter(|v| v.engine == engine)
            .max_by_key(|v| v.released_at)
            .cloned())
    }
}

impl DataStore for MemoryStore {}
