//! Generic handler backing every engine without special needs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::InfraBackend;
use crate::config::TopologyWaitConfig;
use crate::error::{DeployError, Result};
use crate::model::{
    AddonDefinition, AddonDependency, CUSTOM_VERSION, CatalogEntry, ConfigMap, DeployMode,
    InstanceData, InstanceStatus, ResourceDeployRequest, ResourceDeployResult, TenantData,
    TopologyPhase, TopologyRequest, TopologySpec, TopologyStatus, encode_config_map,
    merge_config_map,
};
use crate::store::DataStore;

use super::DeployHandler;

/// Option naming the instance in topology labels.
const INSTANCE_NAME_OPTION: &str = "instanceName";

/// Option carrying the tenant group on tenant rows.
const TENANT_GROUP_OPTION: &str = "tenantGroup";

/// A resource found by id, as seen by undeploy.
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub addon: AddonDefinition,
    pub tenant: Option<TenantData>,
    pub instance: Option<InstanceData>,
    /// Topology of the instance version, absent for custom or unknown versions
    pub topology: Option<TopologySpec>,
}

impl ResourceRecord {
    /// Whether undeploy has a topology to delete on the backend.
    pub fn has_topology(&self) -> bool {
        self.topology.as_ref().is_some_and(|t| !t.is_trivial())
    }
}

/// Default implementation of every [`DeployHandler`] step.
#[derive(Clone)]
pub struct DefaultHandler {
    store: Arc<dyn DataStore>,
    backend: Arc<dyn InfraBackend>,
    wait: TopologyWaitConfig,
}

impl DefaultHandler {
    pub fn new(
        store: Arc<dyn DataStore>,
        backend: Arc<dyn InfraBackend>,
        wait: TopologyWaitConfig,
    ) -> Self {
        Self {
            store,
            backend,
            wait,
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn InfraBackend> {
        &self.backend
    }

    // =========================================================================
    // Planning
    // =========================================================================

    pub async fn resolve_catalog_entry(
        &self,
        request: &ResourceDeployRequest,
    ) -> Result<CatalogEntry> {
        let engine = request.engine.as_str();
        let addon = self
            .store
            .get_addon(engine)
            .await?
            .ok_or_else(|| DeployError::CatalogNotFound(format!("addon {}", engine)))?;

        let version = match request.requested_version() {
            Some(version) => self
                .store
                .get_addon_version(engine, version)
                .await?
                .ok_or_else(|| DeployError::CatalogNotFound(format!("{}@{}", engine, version)))?,
            None => self
                .store
                .get_latest_addon_version(engine)
                .await?
                .ok_or_else(|| DeployError::CatalogNotFound(format!("{}@latest", engine)))?,
        };

        debug!(
            "Resolved {} to version {} ({:?})",
            engine, version.version, addon.deploy_mode
        );
        Ok(CatalogEntry { addon, version })
    }

    pub async fn read_cluster_config(&self, az: &str) -> Result<ConfigMap> {
        Ok(self.backend.cluster_info(az).await?)
    }

    pub fn check_for_preexisting_custom_binding(
        &self,
        _cluster_config: &ConfigMap,
    ) -> Option<ConfigMap> {
        None
    }

    pub async fn decide_if_instance_needed(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
    ) -> Result<(Option<InstanceData>, bool)> {
        let engine = entry.engine();

        if let Some(custom) = self
            .store
            .find_instance(engine, CUSTOM_VERSION, &request.az)
            .await?
        {
            if custom.is_running() {
                debug!("Using custom instance {} for {}", custom.id, engine);
                return Ok((Some(custom), false));
            }
        }

        let existing = match entry.deploy_mode() {
            DeployMode::Saas => {
                self.store
                    .find_instance(engine, &entry.version.version, &request.az)
                    .await?
            }
            DeployMode::Paas => self
                .store
                .get_instance(&request.uuid)
                .await?
                .filter(|instance| !instance.is_deleted),
        };

        let needed = !existing.as_ref().is_some_and(InstanceData::is_running);
        Ok((existing, needed))
    }

    pub async fn decide_if_tenant_needed(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
    ) -> Result<(Option<TenantData>, bool)> {
        if entry.deploy_mode() != DeployMode::Saas {
            return Ok((None, false));
        }

        match self.store.get_tenant(&request.uuid).await? {
            Some(tenant) if tenant.is_deleted => {
                Err(DeployError::IdentityReused(request.uuid.clone()))
            }
            Some(tenant) => Ok((Some(tenant), false)),
            None => Ok((None, true)),
        }
    }

    // =========================================================================
    // Instance provisioning
    // =========================================================================

    pub async fn initialize_instance(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        sub_results: &[ResourceDeployResult],
    ) -> Result<InstanceData> {
        let id = match entry.deploy_mode() {
            DeployMode::Paas => request.uuid.clone(),
            DeployMode::Saas => Uuid::new_v4().simple().to_string(),
        };

        let mut options = request.options.clone();
        for result in sub_results {
            merge_config_map(&mut options, result.config.clone());
        }

        let now = Utc::now();
        let instance = InstanceData {
            id,
            engine: entry.engine().to_string(),
            version: entry.version.version.clone(),
            az: request.az.clone(),
            release_id: entry.version.release_id.clone(),
            options: encode_config_map(&options)?,
            config: encode_config_map(&ConfigMap::new())?,
            is_custom: false,
            is_deleted: false,
            status: InstanceStatus::Init,
            created_at: now,
            updated_at: now,
        };
        self.store.save_instance(&instance).await?;

        info!(
            "Created instance {} for {}@{} in {}",
            instance.id, instance.engine, instance.version, instance.az
        );
        Ok(instance)
    }

    pub async fn pre_deploy_job(&self, _entry: &CatalogEntry, _instance: &InstanceData) -> Result<()> {
        Ok(())
    }

    pub async fn build_topology_request(
        &self,
        entry: &CatalogEntry,
        instance: &InstanceData,
        _cluster_config: &ConfigMap,
    ) -> Result<TopologyRequest> {
        let options = instance.options_map()?;
        let addon_name = options
            .get(INSTANCE_NAME_OPTION)
            .cloned()
            .unwrap_or_else(|| instance.engine.clone());

        let labels = ConfigMap::from([
            ("SERVICE_TYPE".to_string(), "ADDONS".to_string()),
            ("ADDON_ID".to_string(), instance.id.clone()),
            ("ADDON_TYPE".to_string(), instance.engine.clone()),
            ("ADDON_GROUPS".to_string(), "1".to_string()),
            ("ADDON_NAME".to_string(), addon_name),
        ]);

        let mut topology = entry.topology().clone();
        for service in topology.services.values_mut() {
            merge_config_map(&mut service.envs, labels.clone());
        }

        Ok(TopologyRequest {
            cluster_name: instance.az.clone(),
            id: instance.id.clone(),
            kind: instance.topology_kind(),
            topology,
            group_labels: labels,
        })
    }

    pub async fn submit_and_await_topology(
        &self,
        request: &TopologyRequest,
        _entry: &CatalogEntry,
        _instance: &InstanceData,
        _cluster_config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<TopologyStatus> {
        info!("Submitting topology {}/{}", request.kind, request.id);
        self.backend.create_topology(request).await?;

        match self.await_topology(&request.kind, &request.id, cancel).await {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(
                    "Topology {}/{} did not become ready, deleting it: {}",
                    request.kind, request.id, e
                );
                if let Err(delete_err) = self.backend.delete_topology(&request.kind, &request.id).await {
                    error!(
                        "Failed to delete topology {}/{}: {}",
                        request.kind, request.id, delete_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Poll until the topology is ready, failed, timed out or cancelled.
    async fn await_topology(
        &self,
        kind: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<TopologyStatus> {
        let started = Instant::now();
        let deadline = started + self.wait.ready_timeout();

        loop {
            if cancel.is_cancelled() {
                return Err(DeployError::Cancelled(id.to_string()));
            }

            match self.backend.inspect_topology(kind, id).await {
                Ok(status) if status.phase.is_ready() => {
                    info!("Topology {}/{} is {:?}", kind, id, status.phase);
                    return Ok(status);
                }
                Ok(status) if status.phase == TopologyPhase::Failed => {
                    return Err(DeployError::TopologyFailed {
                        id: id.to_string(),
                        message: status.message.unwrap_or_default(),
                    });
                }
                Ok(status) => debug!("Topology {}/{} is {:?}", kind, id, status.phase),
                Err(e) => warn!("Failed to inspect topology {}/{}: {}", kind, id, e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::Timeout {
                    id: id.to_string(),
                    waited: now - started,
                });
            }

            let delay = self.wait.poll_interval().min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeployError::Cancelled(id.to_string())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    pub async fn post_deploy_job(
        &self,
        _instance: &InstanceData,
        _topology: &TopologyStatus,
        _cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(ConfigMap::new())
    }

    pub async fn compute_instance_config(
        &self,
        _instance: &InstanceData,
        _topology: &TopologyStatus,
        _cluster_config: &ConfigMap,
        extra: ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(extra)
    }

    pub async fn update_instance_on_custom(
        &self,
        instance: &mut InstanceData,
        config: ConfigMap,
    ) -> Result<()> {
        let mut merged = instance.config_map()?;
        merge_config_map(&mut merged, config);

        instance.config = encode_config_map(&merged)?;
        instance.is_custom = true;
        instance.version = CUSTOM_VERSION.to_string();
        instance.status = InstanceStatus::Running;
        instance.updated_at = Utc::now();
        self.store.save_instance(instance).await?;
        Ok(())
    }

    pub async fn update_instance_on_finish(
        &self,
        instance: &mut InstanceData,
        config: ConfigMap,
        status: InstanceStatus,
    ) -> Result<()> {
        let mut merged = instance.config_map()?;
        merge_config_map(&mut merged, config);

        instance.config = encode_config_map(&merged)?;
        instance.status = status;
        instance.updated_at = Utc::now();
        self.store.save_instance(instance).await?;
        Ok(())
    }

    // =========================================================================
    // Tenant provisioning
    // =========================================================================

    pub async fn initialize_tenant(
        &self,
        request: &ResourceDeployRequest,
        instance: &InstanceData,
        sub_results: &[ResourceDeployResult],
    ) -> Result<TenantData> {
        let mut options = request.options.clone();
        options.insert(TENANT_GROUP_OPTION.to_string(), request.tenant_group.clone());
        for result in sub_results {
            merge_config_map(&mut options, result.config.clone());
        }

        let now = Utc::now();
        let tenant = TenantData {
            id: request.uuid.clone(),
            instance_id: instance.id.clone(),
            tenant_group: request.tenant_group.clone(),
            engine: instance.engine.clone(),
            az: request.az.clone(),
            options: encode_config_map(&options)?,
            config: encode_config_map(&ConfigMap::new())?,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.store.save_tenant(&tenant).await?;

        info!("Created tenant {} on instance {}", tenant.id, instance.id);
        Ok(tenant)
    }

    pub async fn apply_tenant_provisioning(
        &self,
        _request: &ResourceDeployRequest,
        _entry: &CatalogEntry,
        _instance: &InstanceData,
        _tenant: &TenantData,
        _cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(ConfigMap::new())
    }

    pub async fn update_tenant_on_finish(&self, tenant: &mut TenantData, config: ConfigMap) -> Result<()> {
        let mut merged = tenant.config_map()?;
        merge_config_map(&mut merged, config);

        tenant.config = encode_config_map(&merged)?;
        tenant.updated_at = Utc::now();
        self.store.save_tenant(tenant).await?;
        Ok(())
    }

    // =========================================================================
    // Sub-resources and results
    // =========================================================================

    pub fn build_sub_resource_request(
        &self,
        name: &str,
        dependency: &AddonDependency,
        parent: &ResourceDeployRequest,
    ) -> Option<ResourceDeployRequest> {
        Some(ResourceDeployRequest {
            engine: name.to_string(),
            uuid: Uuid::new_v4().simple().to_string(),
            plan: dependency.plan.clone(),
            az: parent.az.clone(),
            options: dependency.options.clone(),
            tenant_group: parent.tenant_group.clone(),
            // Only the outermost request reports back to the caller.
            callback: None,
        })
    }

    pub fn build_deploy_result(
        &self,
        instance: &InstanceData,
        tenant: Option<&TenantData>,
    ) -> Result<ResourceDeployResult> {
        let mut result = ResourceDeployResult {
            id: instance.id.clone(),
            config: instance.config_map()?,
            options: ConfigMap::new(),
            status: instance.status,
            created_time: instance.created_at,
            updated_time: instance.updated_at,
        };

        if let Some(tenant) = tenant {
            result.id = tenant.id.clone();
            merge_config_map(&mut result.config, tenant.config_map()?);
            merge_config_map(&mut result.options, tenant.options_map()?);
            result.created_time = tenant.created_at;
            result.updated_time = tenant.updated_at;
        }

        Ok(result)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    pub async fn delete_instance(&self, instance: &InstanceData, status: InstanceStatus) -> Result<()> {
        let mut deleted = instance.clone();
        deleted.status = status;
        deleted.is_deleted = true;
        deleted.updated_at = Utc::now();
        self.store.save_instance(&deleted).await?;

        info!("Deleted instance {} with status {}", instance.id, status);
        Ok(())
    }

    pub async fn delete_tenant(
        &self,
        tenant: &TenantData,
        _instance: Option<&InstanceData>,
        _cluster_config: &ConfigMap,
    ) -> Result<()> {
        let mut deleted = tenant.clone();
        deleted.is_deleted = true;
        deleted.updated_at = Utc::now();
        self.store.save_tenant(&deleted).await?;

        info!("Deleted tenant {}", tenant.id);
        Ok(())
    }

    pub async fn tear_down_topology(&self, instance: &InstanceData) -> Result<()> {
        let kind = instance.topology_kind();
        info!("Deleting topology {}/{}", kind, instance.id);
        self.backend.delete_topology(&kind, &instance.id).await?;
        Ok(())
    }

    pub async fn mark_instance_status(
        &self,
        instance: &InstanceData,
        status: InstanceStatus,
    ) -> Result<()> {
        let mut updated = instance.clone();
        updated.status = status;
        updated.updated_at = Utc::now();
        self.store.save_instance(&updated).await?;
        Ok(())
    }

    // =========================================================================
    // Dependency edges
    // =========================================================================

    pub async fn record_dependency_edge(&self, parent_id: &str, child_id: &str) -> Result<()> {
        self.store.save_relation(parent_id, child_id).await?;
        Ok(())
    }

    pub async fn list_dependency_child_ids(&self, parent_id: &str) -> Result<Vec<String>> {
        Ok(self.store.list_child_ids(parent_id).await?)
    }

    pub async fn delete_dependency_edge(&self, parent_id: &str, child_id: &str) -> Result<()> {
        self.store.delete_relation(parent_id, child_id).await?;
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Load a live or deleted instance by id.
    pub async fn load_instance(&self, id: &str) -> Result<InstanceData> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| DeployError::ResourceNotFound(id.to_string()))
    }

    /// Resolve a resource id to its tenant (preferred) or instance.
    pub async fn find_resource(&self, id: &str) -> Result<ResourceRecord> {
        let (tenant, instance) = match self.store.get_tenant(id).await? {
            Some(tenant) => {
                let instance = self.store.get_instance(&tenant.instance_id).await?;
                (Some(tenant), instance)
            }
            None => match self.store.get_instance(id).await? {
                Some(instance) => (None, Some(instance)),
                None => return Err(DeployError::ResourceNotFound(id.to_string())),
            },
        };

        let engine = tenant
            .as_ref()
            .map(|t| t.engine.as_str())
            .or_else(|| instance.as_ref().map(|i| i.engine.as_str()))
            .unwrap_or_default();
        let addon = self
            .store
            .get_addon(engine)
            .await?
            .ok_or_else(|| DeployError::CatalogNotFound(format!("addon {}", engine)))?;

        let topology = match &instance {
            Some(instance) => self
                .store
                .get_addon_version(&instance.engine, &instance.version)
                .await?
                .map(|version| version.topology),
            None => None,
        };

        Ok(ResourceRecord {
            addon,
            tenant,
            instance,
            topology,
        })
    }
}

#[async_trait]
impl DeployHandler for DefaultHandler {
    fn base(&self) -> &DefaultHandler {
        self
    }

    fn name(&self) -> &str {
        "default"
    }

    fn engines(&self) -> &[&'static str] {
        &[]
    }
}
