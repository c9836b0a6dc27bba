//! MySQL, one dedicated instance per request.
//!
//! A zone whose cluster config already names a MySQL server binds to that
//! server instead of scheduling a new one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{DeployError, Result};
use crate::model::{
    AddonDefinition, CatalogEntry, ConfigMap, DeployMode, InstanceData, ResourceDeployRequest,
    ResourceDeployResult, TopologyRequest, TopologyStatus, encode_config_map, merge_config_map,
};

use super::{DefaultHandler, DeployHandler, first_port, service_host};

const ENGINE: &str = "mysql";
const DEFAULT_PORT: u16 = 3306;
const ROOT_USER: &str = "root";
const PASSWORD_OPTION: &str = "MYSQL_ROOT_PASSWORD";

/// Cluster config keys describing an externally managed server.
const CUSTOM_KEYS: [&str; 4] = ["MYSQL_HOST", "MYSQL_PORT", "MYSQL_USERNAME", "MYSQL_PASSWORD"];

pub struct MysqlHandler {
    base: DefaultHandler,
}

impl MysqlHandler {
    pub fn new(base: DefaultHandler) -> Self {
        Self { base }
    }

    fn root_password(instance: &InstanceData) -> Result<String> {
        instance
            .options_map()?
            .remove(PASSWORD_OPTION)
            .ok_or_else(|| {
                DeployError::handler(ENGINE, format!("no root password on {}", instance.id))
            })
    }
}

#[async_trait]
impl DeployHandler for MysqlHandler {
    fn base(&self) -> &DefaultHandler {
        &self.base
    }

    fn name(&self) -> &str {
        ENGINE
    }

    fn engines(&self) -> &[&'static str] {
        &[ENGINE]
    }

    fn matches(&self, addon: &AddonDefinition) -> bool {
        addon.engine == ENGINE && addon.deploy_mode == DeployMode::Paas
    }

    fn check_for_preexisting_custom_binding(&self, cluster_config: &ConfigMap) -> Option<ConfigMap> {
        CUSTOM_KEYS
            .iter()
            .map(|key| {
                cluster_config
                    .get(*key)
                    .filter(|value| !value.is_empty())
                    .map(|value| (key.to_string(), value.clone()))
            })
            .collect()
    }

    async fn initialize_instance(
        &self,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        sub_results: &[ResourceDeployResult],
    ) -> Result<InstanceData> {
        let mut instance = self
            .base
            .initialize_instance(request, entry, sub_results)
            .await?;

        let mut options = instance.options_map()?;
        if options.get(PASSWORD_OPTION).is_none_or(String::is_empty) {
            options.insert(
                PASSWORD_OPTION.to_string(),
                Uuid::new_v4().simple().to_string(),
            );
            instance.options = encode_config_map(&options)?;
            self.base.store().save_instance(&instance).await?;
        }
        Ok(instance)
    }

    async fn build_topology_request(
        &self,
        entry: &CatalogEntry,
        instance: &InstanceData,
        cluster_config: &ConfigMap,
    ) -> Result<TopologyRequest> {
        let password = Self::root_password(instance)?;
        let mut request = self
            .base
            .build_topology_request(entry, instance, cluster_config)
            .await?;
        for service in request.topology.services.values_mut() {
            service
                .envs
                .insert(PASSWORD_OPTION.to_string(), password.clone());
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
        let port = first_port(topology, ENGINE, DEFAULT_PORT);

        let mut config = ConfigMap::from([
            ("MYSQL_HOST".to_string(), host.to_string()),
            ("MYSQL_PORT".to_string(), port.to_string()),
            ("MYSQL_USERNAME".to_string(), ROOT_USER.to_string()),
            ("MYSQL_PASSWORD".to_string(), Self::root_password(instance)?),
        ]);
        merge_config_map(&mut config, extra);
        Ok(config)
    }
}
