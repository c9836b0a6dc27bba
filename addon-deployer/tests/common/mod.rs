//! Shared test utilities for addon-deployer integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use addon_deployer::audit::DeployAuditLogger;
use addon_deployer::callback::{CallbackError, CallbackNotifier};
use addon_deployer::config::{RetryPolicy, TopologyWaitConfig};
use addon_deployer::model::{
    AddonDefinition, AddonDependency, AddonVersion, ConfigMap, DeployMode, InstanceData,
    ServiceEndpoint, ServiceSpec, TopologyPhase, TopologyRequest, TopologySpec, TopologyStatus,
};
use addon_deployer::{
    BackendError, Coordinator, DefaultHandler, DeployerConfig, HandlerRegistry, InfraBackend,
    MemoryStore, ResourceDeployRequest,
};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short waits so timeout and retry paths finish quickly.
pub fn fast_config() -> DeployerConfig {
    DeployerConfig {
        topology: TopologyWaitConfig {
            poll_interval_ms: 10,
            ready_timeout_ms: 200,
        },
        child_teardown: RetryPolicy {
            attempts: 2,
            backoff_ms: 5,
        },
        ..Default::default()
    }
}

pub fn request(engine: &str, uuid: &str) -> ResourceDeployRequest {
    ResourceDeployRequest {
        engine: engine.to_string(),
        uuid: uuid.to_string(),
        plan: "basic".to_string(),
        az: "az1".to_string(),
        tenant_group: "group-a".to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Fake Backend
// =============================================================================

#[derive(Default)]
struct FakeState {
    cluster_configs: HashMap<String, ConfigMap>,
    phases: HashMap<String, TopologyPhase>,
    failing_deletes: HashSet<String>,
    created: Vec<TopologyRequest>,
    deleted: Vec<String>,
}

/// Scriptable in-memory scheduler.
///
/// Topologies are ready on first inspection unless a phase is scripted for
/// their kind. Service hosts are `<service>-<id>.addons.svc`.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cluster_config(&self, az: &str, config: ConfigMap) {
        self.state
            .lock()
            .unwrap()
            .cluster_configs
            .insert(az.to_string(), config);
    }

    /// Phase reported for every topology of `kind`.
    pub fn set_phase(&self, kind: &str, phase: TopologyPhase) {
        self.state
            .lock()
            .unwrap()
            .phases
            .insert(kind.to_string(), phase);
    }

    pub fn fail_deletes(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(kind.to_string());
    }

    pub fn allow_deletes(&self, kind: &str) {
        self.state.lock().unwrap().failing_deletes.remove(kind);
    }

    pub fn created(&self) -> Vec<TopologyRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Deleted topologies as `kind/id`.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl InfraBackend for FakeBackend {
    async fn cluster_info(&self, cluster: &str) -> Result<ConfigMap, BackendError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cluster_configs
            .get(cluster)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_topology(&self, request: &TopologyRequest) -> Result<(), BackendError> {
        self.state.lock().unwrap().created.push(request.clone());
        Ok(())
    }

    async fn inspect_topology(&self, kind: &str, id: &str) -> Result<TopologyStatus, BackendError> {
        let state = self.state.lock().unwrap();
        let request = state
            .created
            .iter()
            .rev()
            .find(|r| r.kind == kind && r.id == id)
            .ok_or_else(|| BackendError::NotFound(format!("{}/{}", kind, id)))?;

        let services = request
            .topology
            .services
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    ServiceEndpoint {
                        host: format!("{}-{}.addons.svc", name, id),
                        ports: spec.ports.clone(),
                        replicas: spec.replicas,
                    },
                )
            })
            .collect();

        let phase = state
            .phases
            .get(kind)
            .copied()
            .unwrap_or(TopologyPhase::Ready);
        Ok(TopologyStatus {
            id: id.to_string(),
            kind: kind.to_string(),
            phase,
            message: (phase == TopologyPhase::Failed).then(|| "container exited".to_string()),
            services,
        })
    }

    async fn delete_topology(&self, kind: &str, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes.contains(kind) {
            return Err(BackendError::Unavailable(format!("cannot delete {}/{}", kind, id)));
        }
        state.deleted.push(format!("{}/{}", kind, id));
        Ok(())
    }
}

// =============================================================================
// Recording Notifier
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CallbackRecord {
    pub url: String,
    pub resource_id: String,
    pub success: bool,
    pub config: ConfigMap,
}

#[derive(Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<CallbackRecord>>,
}

impl RecordingNotifier {
    pub fn records(&self) -> Vec<CallbackRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(
        &self,
        url: &str,
        resource_id: &str,
        success: bool,
        config: &ConfigMap,
    ) -> Result<(), CallbackError> {
        self.records.lock().unwrap().push(CallbackRecord {
            url: url.to_string(),
            resource_id: resource_id.to_string(),
            success,
            config: config.clone(),
        });
        Ok(())
    }
}

// =============================================================================
// Catalog Fixtures
// =============================================================================

fn service(image: &str, port: u16) -> ServiceSpec {
    ServiceSpec {
        image: image.to_string(),
        cmd: None,
        replicas: 1,
        resources: Default::default(),
        envs: ConfigMap::new(),
        ports: vec![port],
        health_check: None,
    }
}

fn version(engine: &str, version: &str, day: u32, topology: TopologySpec) -> AddonVersion {
    AddonVersion {
        engine: engine.to_string(),
        version: version.to_string(),
        release_id: format!("{}-{}", engine, version),
        released_at: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap() + Duration::hours(1),
        topology,
    }
}

fn single_service(name: &str, image: &str, port: u16) -> TopologySpec {
    TopologySpec {
        services: BTreeMap::from([(name.to_string(), service(image, port))]),
        addons: BTreeMap::new(),
    }
}

/// Catalog used by every integration test:
///
/// - `nacos` SAAS, one `nacos` service on 8848
/// - `mysql` PAAS, one `mysql` service on 3306
/// - `monitor` PAAS, one service, depends on `mysql` and `nacos`
/// - `registercenter` SAAS without services, versions 1.0.0 and 2.0.0
pub async fn seed_catalog(store: &MemoryStore) {
    store
        .register_addon(AddonDefinition {
            engine: "nacos".to_string(),
            deploy_mode: DeployMode::Saas,
        })
        .await;
    store
        .register_addon_version(version(
            "nacos",
            "2.0.0",
            1,
            single_service("nacos", "nacos/nacos-server:2.0.0", 8848),
        ))
        .await
        .unwrap();

    store
        .register_addon(AddonDefinition {
            engine: "mysql".to_string(),
            deploy_mode: DeployMode::Paas,
        })
        .await;
    store
        .register_addon_version(version(
            "mysql",
            "5.7",
            1,
            single_service("mysql", "mysql:5.7", 3306),
        ))
        .await
        .unwrap();

    let mut monitor = single_service("monitor", "platform/monitor:3.0", 7096);
    monitor.addons = BTreeMap::from([
        (
            "mysql".to_string(),
            AddonDependency {
                plan: "basic".to_string(),
                options: ConfigMap::new(),
            },
        ),
        (
            "nacos".to_string(),
            AddonDependency {
                plan: "basic".to_string(),
                options: ConfigMap::new(),
            },
        ),
    ]);
    store
        .register_addon(AddonDefinition {
            engine: "monitor".to_string(),
            deploy_mode: DeployMode::Paas,
        })
        .await;
    store
        .register_addon_version(version("monitor", "3.0.0", 1, monitor))
        .await
        .unwrap();

    store
        .register_addon(AddonDefinition {
            engine: "registercenter".to_string(),
            deploy_mode: DeployMode::Saas,
        })
        .await;
    for (v, day) in [("1.0.0", 1), ("2.0.0", 2)] {
        store
            .register_addon_version(version("registercenter", v, day, TopologySpec::default()))
            .await
            .unwrap();
    }
}

// =============================================================================
// Test Environment
// =============================================================================

/// Coordinator wired to a memory store, a fake backend and a recording
/// notifier.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<FakeBackend>,
    pub notifier: Arc<RecordingNotifier>,
    pub coordinator: Coordinator,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_registry(fast_config(), |base| {
            HandlerRegistry::with_builtin_handlers(base).unwrap()
        })
        .await
    }

    pub async fn with_config(config: DeployerConfig) -> Self {
        Self::with_registry(config, |base| {
            HandlerRegistry::with_builtin_handlers(base).unwrap()
        })
        .await
    }

    pub async fn with_registry(
        config: DeployerConfig,
        build: impl FnOnce(DefaultHandler) -> HandlerRegistry,
    ) -> Self {
        init_tracing();

        let store = Arc::new(MemoryStore::new());
        seed_catalog(&store).await;
        let backend = Arc::new(FakeBackend::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let base = DefaultHandler::new(store.clone(), backend.clone(), config.topology.clone());
        let registry = Arc::new(build(base));
        let coordinator = Coordinator::new(registry, notifier.clone(), &config)
            .with_audit(Arc::new(DeployAuditLogger::new_noop()));

        Self {
            store,
            backend,
            notifier,
            coordinator,
        }
    }

    pub async fn instances_of(&self, engine: &str) -> Vec<InstanceData> {
        self.store
            .list_instances()
            .await
            .into_iter()
            .filter(|i| i.engine == engine)
            .collect()
    }

    /// Live `(parent, child)` edges.
    pub async fn live_edges(&self) -> Vec<(String, String)> {
        self.store
            .list_relations()
            .await
            .into_iter()
            .filter(|r| !r.is_deleted)
            .map(|r| (r.parent_request_id, r.child_request_id))
            .collect()
    }
}
