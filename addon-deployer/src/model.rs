//! Domain types shared by the store, the handlers and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Flat string map used for addon options and computed config.
pub type ConfigMap = BTreeMap<String, String>;

/// Version recorded on instances bound to an externally managed backend.
pub const CUSTOM_VERSION: &str = "custom";

/// Request option selecting a catalog version.
pub const VERSION_OPTION: &str = "version";

/// Engines renamed in the catalog, kept resolvable for old callers.
const LEGACY_ENGINE_ALIASES: &[(&str, &str, &str)] =
    &[("terminus-zkproxy", "registercenter", "1.0.0")];

// =============================================================================
// Config Map Codec
// =============================================================================

/// Decode a persisted config/options column. Empty text is an empty map.
pub fn decode_config_map(text: &str) -> Result<ConfigMap, serde_json::Error> {
    if text.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    serde_json::from_str(text)
}

/// Encode a map for a persisted config/options column.
pub fn encode_config_map(map: &ConfigMap) -> Result<String, serde_json::Error> {
    serde_json::to_string(map)
}

/// Merge `extra` into `base`; keys in `extra` win.
pub fn merge_config_map(base: &mut ConfigMap, extra: ConfigMap) {
    base.extend(extra);
}

// =============================================================================
// Catalog Types
// =============================================================================

/// How an addon is shared between callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployMode {
    /// One instance per request, identified by the caller's uuid.
    Paas,
    /// One shared instance, many tenants.
    Saas,
}

/// Addon definition (one row per engine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonDefinition {
    pub engine: String,
    pub deploy_mode: DeployMode,
}

/// A released version of an addon with its service topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddonVersion {
    pub engine: String,
    pub version: String,
    #[serde(default)]
    pub release_id: String,
    pub released_at: DateTime<Utc>,
    #[serde(default)]
    pub topology: TopologySpec,
}

/// Resolved catalog entry for one (engine, version).
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub addon: AddonDefinition,
    pub version: AddonVersion,
}

impl CatalogEntry {
    pub fn engine(&self) -> &str {
        &self.addon.engine
    }

    pub fn deploy_mode(&self) -> DeployMode {
        self.addon.deploy_mode
    }

    pub fn topology(&self) -> &TopologySpec {
        &self.version.topology
    }
}

/// Declarative service topology of an addon version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologySpec {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    /// Sub-resources this addon depends on, keyed by engine.
    #[serde(default)]
    pub addons: BTreeMap<String, AddonDependency>,
}

impl TopologySpec {
    /// A topology without services has nothing to submit to the backend.
    pub fn is_trivial(&self) -> bool {
        self.services.is_empty()
    }
}

/// One service (container group) of a topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    pub image: String,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub resources: ServiceResources,
    #[serde(default)]
    pub envs: ConfigMap,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

fn default_replicas() -> u32 {
    1
}

/// Resource requests of a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceResources {
    pub cpu: f64,
    pub mem_mb: u64,
}

/// Health check the backend uses to decide readiness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthCheck {
    Http { port: u16, path: String },
    Tcp { port: u16 },
    Exec { cmd: String },
}

/// A dependency declared in a topology.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddonDependency {
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub options: ConfigMap,
}

// =============================================================================
// Instance / Tenant / Relation Types
// =============================================================================

/// Lifecycle status of an instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Record created, provisioning in progress
    #[default]
    Init,
    /// Provisioned and usable
    Running,
    /// Provisioning failed
    Error,
    /// Torn down
    Deleted,
    /// Teardown failed, backend state unknown
    DeleteError,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Init => "INIT",
            InstanceStatus::Running => "RUNNING",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::Deleted => "DELETED",
            InstanceStatus::DeleteError => "DELETE_ERROR",
        };
        f.write_str(s)
    }
}

/// A deployed backing resource, possibly shared by many tenants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceData {
    pub id: String,
    pub engine: String,
    pub version: String,
    pub az: String,
    pub release_id: String,
    /// JSON encoded [`ConfigMap`] of input parameters
    pub options: String,
    /// JSON encoded [`ConfigMap`] of computed output parameters
    pub config: String,
    pub is_custom: bool,
    pub is_deleted: bool,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceData {
    pub fn options_map(&self) -> Result<ConfigMap, serde_json::Error> {
        decode_config_map(&self.options)
    }

    pub fn config_map(&self) -> Result<ConfigMap, serde_json::Error> {
        decode_config_map(&self.config)
    }

    /// Live and in the terminal success state.
    pub fn is_running(&self) -> bool {
        !self.is_deleted && self.status == InstanceStatus::Running
    }

    /// Backend topology kind used for this instance.
    pub fn topology_kind(&self) -> String {
        format!("addon-{}", self.engine)
    }
}

/// A per-tenant binding onto a shared instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantData {
    /// Caller supplied identity, never reused once deleted
    pub id: String,
    pub instance_id: String,
    pub tenant_group: String,
    pub engine: String,
    pub az: String,
    pub options: String,
    pub config: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantData {
    pub fn options_map(&self) -> Result<ConfigMap, serde_json::Error> {
        decode_config_map(&self.options)
    }

    pub fn config_map(&self) -> Result<ConfigMap, serde_json::Error> {
        decode_config_map(&self.config)
    }
}

/// Edge recording that deploying `parent_request_id` deployed `child_request_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestRelation {
    pub parent_request_id: String,
    pub child_request_id: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Topology Request / Status
// =============================================================================

/// Topology submitted to the infrastructure backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyRequest {
    pub cluster_name: String,
    pub id: String,
    pub kind: String,
    pub topology: TopologySpec,
    pub group_labels: ConfigMap,
}

/// Readiness phase reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TopologyPhase {
    #[default]
    Progressing,
    Ready,
    Healthy,
    Failed,
    Unknown,
}

impl TopologyPhase {
    pub fn is_ready(&self) -> bool {
        matches!(self, TopologyPhase::Ready | TopologyPhase::Healthy)
    }
}

/// Endpoint of one running service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceEndpoint {
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub replicas: u32,
}

/// Status of a submitted topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyStatus {
    pub id: String,
    pub kind: String,
    pub phase: TopologyPhase,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEndpoint>,
}

impl TopologyStatus {
    /// Ready status used when an addon declares no services.
    pub fn synthetic_ready(id: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            phase: TopologyPhase::Ready,
            message: None,
            services: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Deploy Request / Result
// =============================================================================

/// Request to deploy an addon resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeployRequest {
    pub engine: String,
    /// Idempotency key; becomes the tenant id (SAAS) or instance id (PAAS).
    pub uuid: String,
    #[serde(default)]
    pub plan: String,
    pub az: String,
    #[serde(default)]
    pub options: ConfigMap,
    #[serde(default)]
    pub tenant_group: String,
    #[serde(default)]
    pub callback: Option<String>,
}

impl ResourceDeployRequest {
    /// Rewrite engines that were renamed in the catalog.
    pub fn normalize_legacy_engine(&mut self) {
        for (legacy, current, pinned_version) in LEGACY_ENGINE_ALIASES {
            if self.engine == *legacy {
                self.engine = current.to_string();
                if let Some(version) = self.options.get_mut(VERSION_OPTION) {
                    *version = pinned_version.to_string();
                }
            }
        }
    }

    pub fn requested_version(&self) -> Option<&str> {
        self.options
            .get(VERSION_OPTION)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Result of a deploy, combining instance and tenant state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeployResult {
    pub id: String,
    pub config: ConfigMap,
    pub options: ConfigMap,
    pub status: InstanceStatus,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_config_is_empty_map() {
        assert!(decode_config_map("").unwrap().is_empty());
        assert!(decode_config_map("  ").unwrap().is_empty());
        assert!(decode_config_map("{}").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_non_map() {
        assert!(decode_config_map("[1,2]").is_err());
    }

    #[test]
    fn test_merge_is_additive_last_write_wins() {
        let mut base = ConfigMap::from([
            ("HOST".to_string(), "old".to_string()),
            ("PORT".to_string(), "8848".to_string()),
        ]);
        merge_config_map(
            &mut base,
            ConfigMap::from([
                ("HOST".to_string(), "new".to_string()),
                ("USER".to_string(), "root".to_string()),
            ]),
        );
        assert_eq!(base.len(), 3);
        assert_eq!(base["HOST"], "new");
        assert_eq!(base["PORT"], "8848");
        assert_eq!(base["USER"], "root");
    }

    #[test]
    fn test_legacy_engine_is_renamed_and_version_pinned() {
        let mut req = ResourceDeployRequest {
            engine: "terminus-zkproxy".to_string(),
            options: ConfigMap::from([(VERSION_OPTION.to_string(), "3.1.0".to_string())]),
            ..Default::default()
        };
        req.normalize_legacy_engine();
        assert_eq!(req.engine, "registercenter");
        assert_eq!(req.requested_version(), Some("1.0.0"));
    }

    #[test]
    fn test_legacy_engine_without_version_stays_unversioned() {
        let mut req = ResourceDeployRequest {
            engine: "terminus-zkproxy".to_string(),
            ..Default::default()
        };
        req.normalize_legacy_engine();
        assert_eq!(req.engine, "registercenter");
        assert_eq!(req.requested_version(), None);
    }

    #[test]
    fn test_deploy_mode_wire_format() {
        assert_eq!(serde_json::to_string(&DeployMode::Saas).unwrap(), "\"SAAS\"");
        let mode: DeployMode = serde_json::from_str("\"PAAS\"").unwrap();
        assert_eq!(mode, DeployMode::Paas);
    }

    #[test]
    fn test_instance_status_display_matches_wire_format() {
        for status in [
            InstanceStatus::Init,
            InstanceStatus::Running,
            InstanceStatus::Error,
            InstanceStatus::Deleted,
            InstanceStatus::DeleteError,
        ] {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire, format!("\"{}\"", status));
        }
    }

    #[test]
    fn test_topology_spec_defaults() {
        let spec: TopologySpec = serde_json::from_str(
            r#"{"services": {"nacos": {"image": "nacos/nacos-server:2.0", "ports": [8848]}}}"#,
        )
        .unwrap();
        assert!(!spec.is_trivial());
        assert!(spec.addons.is_empty());
        assert_eq!(spec.services["nacos"].replicas, 1);
        assert!(TopologySpec::default().is_trivial());
    }
}
