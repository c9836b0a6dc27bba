//! Custom handler plugins: only the overridden steps change, everything else
//! runs through the default handler.

mod common;

use std::sync::Arc;

use addon_deployer::model::{
    AddonDependency, CatalogEntry, ConfigMap, InstanceData, ResourceDeployRequest, TenantData,
};
use addon_deployer::store::TenantStore;
use addon_deployer::{DefaultHandler, DeployError, DeployHandler, HandlerRegistry, Result};
use async_trait::async_trait;
use common::{TestEnv, fast_config, request};

/// Nacos handler whose tenant provisioning always fails.
struct RejectingTenantHandler {
    base: DefaultHandler,
}

#[async_trait]
impl DeployHandler for RejectingTenantHandler {
    fn base(&self) -> &DefaultHandler {
        &self.base
    }

    fn name(&self) -> &str {
        "rejecting-nacos"
    }

    fn engines(&self) -> &[&'static str] {
        &["nacos"]
    }

    async fn apply_tenant_provisioning(
        &self,
        _request: &ResourceDeployRequest,
        _entry: &CatalogEntry,
        _instance: &InstanceData,
        tenant: &TenantData,
        _cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        Err(DeployError::handler(
            "nacos",
            format!("namespace quota exceeded for {}", tenant.id),
        ))
    }
}

/// Default behaviour for `monitor`, but never deploys its `nacos` dependency.
struct MysqlOnlyMonitorHandler {
    base: DefaultHandler,
}

#[async_trait]
impl DeployHandler for MysqlOnlyMonitorHandler {
    fn base(&self) -> &DefaultHandler {
        &self.base
    }

    fn name(&self) -> &str {
        "monitor"
    }

    fn engines(&self) -> &[&'static str] {
        &["monitor"]
    }

    fn build_sub_resource_request(
        &self,
        name: &str,
        dependency: &AddonDependency,
        parent: &ResourceDeployRequest,
    ) -> Option<ResourceDeployRequest> {
        if name == "nacos" {
            return None;
        }
        self.base
            .build_sub_resource_request(name, dependency, parent)
    }
}

#[tokio::test]
async fn test_tenant_failure_rolls_back_tenant_only() {
    let env = TestEnv::with_registry(fast_config(), |base| {
        HandlerRegistry::builder(base.clone())
            .register(Arc::new(RejectingTenantHandler { base }))
            .build()
            .unwrap()
    })
    .await;

    let result = env.coordinator.deploy(request("nacos", "tenant-1")).await;
    assert!(matches!(result, Err(DeployError::Handler { .. })));

    let tenant = env.store.get_tenant("tenant-1").await.unwrap().unwrap();
    assert!(tenant.is_deleted);

    // The instance reached RUNNING before the tenant step and stays
    let instances = env.instances_of("nacos").await;
    assert_eq!(instances.len(), 1);
    assert!(instances[0].is_running());
    assert!(env.backend.deleted().is_empty());
}

#[tokio::test]
async fn test_skipped_sub_resource_is_not_deployed() {
    let env = TestEnv::with_registry(fast_config(), |base| {
        HandlerRegistry::builder(base.clone())
            .register(Arc::new(MysqlOnlyMonitorHandler { base: base.clone() }))
            .register(Arc::new(addon_deployer::handler::MysqlHandler::new(base)))
            .build()
            .unwrap()
    })
    .await;

    env.coordinator.deploy(request("monitor", "mon-1")).await.unwrap();

    let edges = env.live_edges().await;
    assert_eq!(edges.len(), 1);
    assert!(env.instances_of("nacos").await.is_empty());
    assert_eq!(env.instances_of("mysql").await.len(), 1);
}

#[tokio::test]
async fn test_engine_without_handler_is_rejected() {
    let env = TestEnv::with_registry(fast_config(), |base| {
        HandlerRegistry::builder(base.clone())
            .register(Arc::new(addon_deployer::handler::NacosHandler::new(base)))
            .build()
            .unwrap()
    })
    .await;

    let result = env.coordinator.deploy(request("mysql", "db-1")).await;
    assert!(matches!(result, Err(DeployError::NoHandler(engine)) if engine == "mysql"));
    assert!(env.store.list_instances().await.is_empty());
}

#[tokio::test]
async fn test_unclaimed_engine_uses_default_handler() {
    let env = TestEnv::new().await;

    let result = env.coordinator.deploy(request("monitor", "mon-1")).await.unwrap();

    // The default handler computes no endpoint config of its own
    assert!(!result.config.contains_key("MONITOR_HOST"));
    assert_eq!(result.id, "mon-1");
    let created = env.backend.created();
    let monitor = created.iter().find(|r| r.kind == "addon-monitor").unwrap();
    assert_eq!(monitor.group_labels["ADDON_NAME"], "monitor");
}
