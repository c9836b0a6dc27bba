//! Nacos config center, shared by tenants through namespaces.

use async_trait::async_trait;

use crate::error::{DeployError, Result};
use crate::model::{
    CatalogEntry, ConfigMap, InstanceData, ResourceDeployRequest, TenantData, TopologyRequest,
    TopologyStatus, merge_config_map,
};

use super::{DefaultHandler, DeployHandler, service_host};

const ENGINE: &str = "nacos";
const NACOS_PORT: u16 = 8848;

pub struct NacosHandler {
    base: DefaultHandler,
}

impl NacosHandler {
    pub fn new(base: DefaultHandler) -> Self {
        Self { base }
    }
}

#[async_trait]
impl DeployHandler for NacosHandler {
    fn base(&self) -> &DefaultHandler {
        &self.base
    }

    fn name(&self) -> &str {
        ENGINE
    }

    fn engines(&self) -> &[&'static str] {
        &[ENGINE]
    }

    async fn build_topology_request(
        &self,
        entry: &CatalogEntry,
        instance: &InstanceData,
        cluster_config: &ConfigMap,
    ) -> Result<TopologyRequest> {
        let mut request = self
            .base
            .build_topology_request(entry, instance, cluster_config)
            .await?;
        for service in request.topology.services.values_mut() {
            service
                .envs
                .insert("NACOS_SERVER_PORT".to_string(), NACOS_PORT.to_string());
        }
        Ok(request)
    }

    async fn compute_instance_config(
        &self,
        instance: &InstanceData,
        topology: &TopologyStatus,
        _cluster_config: &ConfigMap,
        extra: ConfigMap,
    ) -> Result<ConfigMap> {
        let host = service_host(topology, ENGINE).ok_or_else(|| {
            DeployError::handler(ENGINE, format!("no service endpoint for {}", instance.id))
        })?;

        let mut config = ConfigMap::from([
            ("NACOS_HOST".to_string(), host.to_string()),
            ("NACOS_PORT".to_string(), NACOS_PORT.to_string()),
            ("NACOS_ADDRESS".to_string(), format!("{}:{}", host, NACOS_PORT)),
        ]);
        merge_config_map(&mut config, extra);
        Ok(config)
    }

    async fn apply_tenant_provisioning(
        &self,
        _request: &ResourceDeployRequest,
        _entry: &CatalogEntry,
        _instance: &InstanceData,
        tenant: &TenantData,
        _cluster_config: &ConfigMap,
    ) -> Result<ConfigMap> {
        Ok(ConfigMap::from([
            ("NACOS_TENANT_ID".to_string(), tenant.id.clone()),
            ("NACOS_GROUP".to_string(), tenant.tenant_group.clone()),
        ]))
    }
}
