//! Resource-type handlers.
//!
//! A handler owns the engine-specific parts of the deploy lifecycle. Every
//! method of [`DeployHandler`] has a default that delegates to the embedded
//! [`DefaultHandler`], so a plugin only overrides the steps that differ.
//!
//! # Lifecycle
//!
//! ```text
//! resolve_catalog_entry
//!   → decide_if_tenant_needed / decide_if_instance_needed
//!   → read_cluster_config
//!   → initialize_instance (INIT)
//!       custom binding?  → update_instance_on_custom (RUNNING)
//!       otherwise        → pre_deploy_job
//!                        → build_topology_request → submit_and_await_topology
//!                        → post_deploy_job → compute_instance_config
//!                        → update_instance_on_finish (RUNNING)
//!   → initialize_tenant → apply_tenant_provisioning → update_tenant_on_finish
//!   → build_deploy_result
//! ```

mod default;
pub mod mysql;
pub mod nacos;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{
    AddonDefinition, AddonDependency, CatalogEntry, ConfigMap, InstanceData, InstanceStatus,
    ResourceDeployRequest, ResourceDeployResult, TenantData, TopologyRequest, TopologyStatus,
};

pub use default::{DefaultHandler, ResourceRecord};
pub use mysql::MysqlHandler;
pub use nacos::NacosHandler;

/// Capability contract of a resource-type handler.
#[async_trait]
pub trait DeployHandler: Send + Sync {
    /// The generic implementation this handler falls back to.
    fn base(&self) -> &DefaultHandler;

    /// Handler name used in logs.
    fn name(&self) -> &str;

    /// Engines this handler claims in the registry.
    fn engines(&self) -> &[&'static str];

    /// Whether this handler accepts the addon.
    fn matches(&self, addon: &AddonDefinition) -> bool {
        self.engines().contains(&addon.engine.as_str())
    }

    // =========================================================================
    // Planning
    // =========================================================================

    async fn resolve_catalog_entry(&self, request: &ResourceDeployRequest) -> Result<CatalogEntry> {
        self.base().resolve_catalog_entry(request).await
    }

    async fn read_cluster_config(&self, az: &str) -> Result<ConfigMap> {
        self.base().read_cluster_config(az).await
    }

    /// Returns the config of an externally managed backend when the cluster
    /// already provides one.
    fn check_for_preexisting_custom_binding(&self, cluster_config: &ConfigMap) -> Option<ConfigMap> {
        self.base().check_for_preexisting_custom_binding(cluster_config)
    }

    /// Returns the existing instance (if any) and whether a new one must be
    /// provisioned.
    async fn decide_if_instance_needed(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
    ) -> Result<(Option<InstanceData>, bool)> {
        self.base().decide_if_instance_needed(request, entry).await
    }

    /// Returns the existing tenant (if any) and whether a new one must be
    /// created.
    async fn decide_if_tenant_needed(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
    ) -> Result<(Option<TenantData>, bool)> {
        self.base().decide_if_tenant_needed(request, entry).await
    }

    // =========================================================================
    // Instance provisioning
    // =========================================================================

    /// Persist a new instance in `INIT`.
    async fn initialize_instance(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        sub_results: &[ResourceDeployResult],
    ) -> Result<InstanceData> {
        self.base()
            .initialize_instance(request, entry, sub_results)
            .await
    }

    async fn pre_deploy_job(&self, entry: &CatalogEntry, instance: &InstanceData) -> Result<()> {
        self.base().pre_deploy_job(entry, instance).await
    }

    async fn build_topology_request(
        &self,
        entry: &CatalogEntry,
        instance: &InstanceData,
        cluster_config: &ConfigMap,
    ) -> Result<TopologyRequest> {
        self.base()
            .build_topology_request(entry, instance, cluster_config)
            .await
    }

    /// Submit the topology and wait until the backend reports it ready.
    ///
    /// On any wait failure the submitted topology is deleted before the
    /// error is returned.
    async fn submit_and_await_topology(
        &self,
        request: &TopologyRequest,
        entry: &CatalogEntry,
        instance: &InstanceData,
        cluster_config: &ConfigMap,
        cancel: &CancellationToken,
    ) -> Result<TopologyStatus> {
        self.base()
            .submit_and_await_topology(request, entry, instance, cluster_config, cancel)
            .await
    }

    /// Extra config produced after the topology is ready.
    async fn post_deploy_job(
        &self,
        instance: &InstanceData,
        topology: &TopologyStatus,
        cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        self.base()
            .post_deploy_job(instance, topology, cluster_config)
            .await
    }

    /// Output parameters of the instance.
    async fn compute_instance_config(
        &self,
        instance: &InstanceData,
        topology: &TopologyStatus,
        cluster_config: &ConfigMap,
        extra: ConfigMap,
    ) -> Result<ConfigMap> {
        self.base()
            .compute_instance_config(instance, topology, cluster_config, extra)
            .await
    }

    async fn update_instance_on_custom(
        &self,
        instance: &mut InstanceData,
        config: ConfigMap,
    ) -> Result<()> {
        self.base().update_instance_on_custom(instance, config).await
    }

    async fn update_instance_on_finish(
        &self,
        instance: &mut InstanceData,
        config: ConfigMap,
        status: InstanceStatus,
    ) -> Result<()> {
        self.base()
            .update_instance_on_finish(instance, config, status)
            .await
    }

    // =========================================================================
    // Tenant provisioning
    // =========================================================================

    async fn initialize_tenant(
        &self,
        request: &ResourceDeployRequest,
        instance: &InstanceData,
        sub_results: &[ResourceDeployResult],
    ) -> Result<TenantData> {
        self.base()
            .initialize_tenant(request, instance, sub_results)
            .await
    }

    /// Apply tenant-side state on the instance. Returns the tenant config.
    async fn apply_tenant_provisioning(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        instance: &InstanceData,
        tenant: &TenantData,
        cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        self.base()
            .apply_tenant_provisioning(request, entry, instance, tenant, cluster_config)
            .await
    }

    async fn update_tenant_on_finish(&self, tenant: &mut TenantData, config: ConfigMap) -> Result<()> {
        self.base().update_tenant_on_finish(tenant, config).await
    }

    // =========================================================================
    // Sub-resources and results
    // =========================================================================

    /// Request for a dependency declared in the topology. `None` skips it.
    fn build_sub_resource_request(
        &self,
        name: &str,
        dependency: &AddonDependency,
        parent: &ResourceDeployRequest,
    ) -> Option<ResourceDeployRequest> {
        self.base()
            .build_sub_resource_request(name, dependency, parent)
    }

    fn build_deploy_result(
        &self,
        instance: &InstanceData,
        tenant: Option<&TenantData>,
    ) -> Result<ResourceDeployResult> {
        self.base().build_deploy_result(instance, tenant)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Soft-delete the instance with a terminal status.
    async fn delete_instance(&self, instance: &InstanceData, status: InstanceStatus) -> Result<()> {
        self.base().delete_instance(instance, status).await
    }

    async fn delete_tenant(
        &self,
        tenant: &TenantData,
        instance: Option<&InstanceData>,
        cluster_config: &ConfigMap,
    ) -> Result<()> {
        self.base()
            .delete_tenant(tenant, instance, cluster_config)
            .await
    }

    async fn tear_down_topology(&self, instance: &InstanceData) -> Result<()> {
        self.base().tear_down_topology(instance).await
    }

    async fn mark_instance_status(&self, instance: &InstanceData, status: InstanceStatus) -> Result<()> {
        self.base().mark_instance_status(instance, status).await
    }

    // =========================================================================
    // Dependency edges
    // =========================================================================

    async fn record_dependency_edge(&self, parent_id: &str, child_id: &str) -> Result<()> {
        self.base().record_dependency_edge(parent_id, child_id).await
    }

    async fn list_dependency_child_ids(&self, parent_id: &str) -> Result<Vec<String>> {
        self.base().list_dependency_child_ids(parent_id).await
    }

    async fn delete_dependency_edge(&self, parent_id: &str, child_id: &str) -> Result<()> {
        self.base().delete_dependency_edge(parent_id, child_id).await
    }
}

/// Port of the first endpoint port, or `default`.
pub(crate) fn first_port(topology: &TopologyStatus, service: &str, default: u16) -> u16 {
    topology
        .services
        .get(service)
        .or_else(|| topology.services.values().next())
        .and_then(|endpoint| endpoint.ports.first().copied())
        .unwrap_or(default)
}

/// Host of the named service, or of the first service when the name is absent.
pub(crate) fn service_host<'a>(topology: &'a TopologyStatus, service: &str) -> Option<&'a str> {
    topology
        .services
        .get(service)
        .or_else(|| topology.services.values().next())
        .map(|endpoint| endpoint.host.as_str())
}
