//! Resource deployment coordinator.
//!
//! Drives a handler through the deploy lifecycle, deploys declared
//! sub-resources depth-first and compensates everything created by a failed
//! call. Undeploy walks the dependency edges recorded during deploy.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::DeployAuditLogger;
use crate::callback::CallbackNotifier;
use crate::config::{DeployerConfig, RetryPolicy};
use crate::error::{DeployError, Result};
use crate::handler::DeployHandler;
use crate::model::{
    CatalogEntry, ConfigMap, DeployMode, InstanceData, InstanceStatus, ResourceDeployRequest,
    ResourceDeployResult, TenantData, TopologyStatus, VERSION_OPTION,
};
use crate::registry::HandlerRegistry;
use crate::rollback::{UndoAction, UndoStack};

/// Boundary consumed by a transport adapter.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Whether deploying `request` would create an instance or a tenant.
    async fn check_if_need_real_deploy(&self, request: &ResourceDeployRequest) -> Result<bool>;

    async fn deploy(&self, request: ResourceDeployRequest) -> Result<ResourceDeployResult>;

    async fn undeploy(&self, resource_id: &str) -> Result<()>;
}

/// What a deploy has to create.
struct DeployPlan {
    instance: Option<InstanceData>,
    need_instance: bool,
    tenant: Option<TenantData>,
    need_tenant: bool,
}

impl DeployPlan {
    fn needs_deploy(&self) -> bool {
        self.need_instance || self.need_tenant
    }
}

/// Outcome of one level of the deploy recursion.
struct Deployed {
    result: ResourceDeployResult,
    /// Whether this call created an instance or a tenant
    created: bool,
}

pub struct Coordinator {
    registry: Arc<HandlerRegistry>,
    notifier: Arc<dyn CallbackNotifier>,
    audit: Arc<DeployAuditLogger>,
    teardown: RetryPolicy,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        notifier: Arc<dyn CallbackNotifier>,
        config: &DeployerConfig,
    ) -> Self {
        Self {
            registry,
            notifier,
            audit: Arc::new(DeployAuditLogger::new()),
            teardown: config.child_teardown.clone(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<DeployAuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Cancel every in-flight topology wait.
    pub fn shutdown(&self) {
        info!("Coordinator shutting down, cancelling in-flight deploys");
        self.shutdown.cancel();
    }

    // =========================================================================
    // Deploy
    // =========================================================================

    pub async fn deploy(&self, request: ResourceDeployRequest) -> Result<ResourceDeployResult> {
        let cancel = self.shutdown.child_token();
        self.deploy_with_cancel(request, &cancel).await
    }

    /// Deploy with a caller-owned cancellation token for the topology wait.
    pub async fn deploy_with_cancel(
        &self,
        request: ResourceDeployRequest,
        cancel: &CancellationToken,
    ) -> Result<ResourceDeployResult> {
        let callback = request.callback.clone().filter(|url| !url.is_empty());
        let resource_id = request.uuid.clone();

        info!("Deploying {} ({})", request.engine, resource_id);
        let outcome = self
            .deploy_resource(request, cancel)
            .await
            .map(|deployed| deployed.result);
        match &outcome {
            Ok(result) => info!("Deployed {} with status {}", result.id, result.status),
            Err(e) => error!("Deploy of {} failed: {}", resource_id, e),
        }

        if let Some(url) = callback {
            self.send_callback(&url, &resource_id, &outcome).await;
        }
        outcome
    }

    pub async fn check_if_need_real_deploy(&self, request: &ResourceDeployRequest) -> Result<bool> {
        let mut request = request.clone();
        request.normalize_legacy_engine();

        let entry = self.registry.base().resolve_catalog_entry(&request).await?;
        let handler = self.registry.resolve(&entry.addon)?;
        let plan = Self::plan(handler.as_ref(), &request, &entry).await?;
        Ok(plan.needs_deploy())
    }

    async fn plan(
        handler: &dyn DeployHandler,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
    ) -> Result<DeployPlan> {
        let (tenant, need_tenant) = handler.decide_if_tenant_needed(request, entry).await?;
        let (instance, need_instance) = handler.decide_if_instance_needed(request, entry).await?;

        Ok(DeployPlan {
            // A live tenant already points at its own instance
            need_instance: need_instance && tenant.is_none(),
            instance,
            tenant,
            need_tenant,
        })
    }

    fn deploy_resource<'a>(
        &'a self,
        mut request: ResourceDeployRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Deployed>> {
        Box::pin(async move {
            request.normalize_legacy_engine();

            let entry = self.registry.base().resolve_catalog_entry(&request).await?;
            let handler = self.registry.resolve(&entry.addon)?;
            let plan = Self::plan(handler.as_ref(), &request, &entry).await?;

            if !plan.needs_deploy() {
                debug!("{} ({}) is already deployed", request.engine, request.uuid);
                let result = self.existing_result(handler.as_ref(), plan, &request).await?;
                return Ok(Deployed {
                    result,
                    created: false,
                });
            }

            let mut undo = UndoStack::new();
            match self
                .provision(handler.as_ref(), &request, &entry, plan, &mut undo, cancel)
                .await
            {
                Ok(result) => Ok(Deployed {
                    result,
                    created: true,
                }),
                Err(e) => {
                    if !undo.is_empty() {
                        warn!(
                            "Rolling back {} step(s) of {} ({})",
                            undo.len(),
                            request.engine,
                            request.uuid
                        );
                    }
                    self.compensate(handler.as_ref(), undo).await;
                    Err(e)
                }
            }
        })
    }

    /// Result of a request that needs no new instance or tenant.
    async fn existing_result(
        &self,
        handler: &dyn DeployHandler,
        plan: DeployPlan,
        request: &ResourceDeployRequest,
    ) -> Result<ResourceDeployResult> {
        if let Some(tenant) = plan.tenant {
            let instance = self.registry.base().load_instance(&tenant.instance_id).await?;
            return handler.build_deploy_result(&instance, Some(&tenant));
        }

        let instance = plan
            .instance
            .ok_or_else(|| DeployError::ResourceNotFound(request.uuid.clone()))?;
        handler.build_deploy_result(&instance, None)
    }

    async fn provision(
        &self,
        handler: &dyn DeployHandler,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        plan: DeployPlan,
        undo: &mut UndoStack,
        cancel: &CancellationToken,
    ) -> Result<ResourceDeployResult> {
        let sub_results = self
            .deploy_sub_resources(handler, request, entry, undo, cancel)
            .await?;
        let cluster_config = handler.read_cluster_config(&request.az).await?;

        let instance = if plan.need_instance {
            self.provision_instance(handler, request, entry, &cluster_config, &sub_results, undo, cancel)
                .await?
        } else {
            plan.instance
                .ok_or_else(|| DeployError::ResourceNotFound(request.uuid.clone()))?
        };

        let mut tenant = None;
        if plan.need_tenant {
            let mut created = handler
                .initialize_tenant(request, &instance, &sub_results)
                .await?;
            undo.push(UndoAction::DeleteTenant {
                tenant: created.clone(),
                instance: instance.clone(),
                cluster_config: cluster_config.clone(),
            });

            let config = handler
                .apply_tenant_provisioning(request, entry, &instance, &created, &cluster_config)
                .await?;
            handler.update_tenant_on_finish(&mut created, config).await?;
            self.audit
                .tenant_created(&created.id, &instance.id, &created.tenant_group);
            tenant = Some(created);
        }

        handler.build_deploy_result(&instance, tenant.as_ref())
    }

    /// Deploy every declared dependency, in name order.
    async fn deploy_sub_resources(
        &self,
        handler: &dyn DeployHandler,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        undo: &mut UndoStack,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceDeployResult>> {
        let mut results = Vec::new();

        for (name, dependency) in &entry.topology().addons {
            let Some(sub_request) = handler.build_sub_resource_request(name, dependency, request)
            else {
                debug!("Skipping sub-resource {} of {}", name, request.uuid);
                continue;
            };

            info!("Deploying sub-resource {} of {}", name, request.uuid);
            let Deployed { result, created } = self.deploy_resource(sub_request, cancel).await?;

            // Reused resources (e.g. a custom binding) belong to whoever created them
            if created {
                undo.push(UndoAction::UndeploySubResource {
                    parent_id: request.uuid.clone(),
                    child_id: result.id.clone(),
                });
                handler
                    .record_dependency_edge(&request.uuid, &result.id)
                    .await?;
                self.audit.dependency_recorded(&request.uuid, &result.id);
            } else {
                debug!("Sub-resource {} of {} reuses {}", name, request.uuid, result.id);
            }

            results.push(result);
        }

        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    async fn provision_instance(
        &self,
        handler: &dyn DeployHandler,
        request: &ResourceDeployRequest,
        entry: &CatalogEntry,
        cluster_config: &ConfigMap,
        sub_results: &[ResourceDeployResult],
        undo: &mut UndoStack,
        cancel: &CancellationToken,
    ) -> Result<InstanceData> {
        let mut instance = handler
            .initialize_instance(request, entry, sub_results)
            .await?;
        undo.push(UndoAction::FailInstance {
            instance: instance.clone(),
        });

        if let Some(custom) = handler.check_for_preexisting_custom_binding(cluster_config) {
            info!(
                "Binding {} to the custom {} backend of {}",
                instance.id, instance.engine, instance.az
            );
            handler.update_instance_on_custom(&mut instance, custom).await?;
            self.audit
                .instance_bound_custom(&instance.id, &instance.engine, &instance.az);
        } else {
            handler.pre_deploy_job(entry, &instance).await?;

            let topology = if entry.topology().is_trivial() {
                debug!("{} declares no services, skipping topology", instance.engine);
                TopologyStatus::synthetic_ready(&instance.id, &instance.topology_kind())
            } else {
                let topology_request = handler
                    .build_topology_request(entry, &instance, cluster_config)
                    .await?;
                let status = handler
                    .submit_and_await_topology(
                        &topology_request,
                        entry,
                        &instance,
                        cluster_config,
                        cancel,
                    )
                    .await?;
                undo.push(UndoAction::TearDownTopology {
                    instance: instance.clone(),
                });
                status
            };

            let extra = handler
                .post_deploy_job(&instance, &topology, cluster_config)
                .await?;
            let config = handler
                .compute_instance_config(&instance, &topology, cluster_config, extra)
                .await?;
            handler
                .update_instance_on_finish(&mut instance, config, InstanceStatus::Running)
                .await?;
            self.audit
                .instance_running(&instance.id, &instance.engine, &instance.az);
        }

        undo.settle_instance(&instance.id);
        Ok(instance)
    }

    /// Run compensating actions newest first. Failures are logged and never
    /// replace the error that triggered the rollback.
    async fn compensate(&self, handler: &dyn DeployHandler, undo: UndoStack) {
        for action in undo.into_reversed() {
            let label = action.describe();
            let outcome = match action {
                UndoAction::UndeploySubResource {
                    parent_id,
                    child_id,
                } => match self.undeploy_resource(&child_id).await {
                    Ok(()) => {
                        let removed = handler.delete_dependency_edge(&parent_id, &child_id).await;
                        if removed.is_ok() {
                            self.audit.dependency_removed(&parent_id, &child_id);
                        }
                        removed
                    }
                    Err(e) => Err(e),
                },
                UndoAction::TearDownTopology { instance } => {
                    handler.tear_down_topology(&instance).await
                }
                UndoAction::FailInstance { instance } => {
                    let deleted = handler
                        .delete_instance(&instance, InstanceStatus::Error)
                        .await;
                    if deleted.is_ok() {
                        self.audit.instance_failed(&instance.id, &instance.engine);
                    }
                    deleted
                }
                UndoAction::DeleteTenant {
                    tenant,
                    instance,
                    cluster_config,
                } => {
                    let deleted = handler
                        .delete_tenant(&tenant, Some(&instance), &cluster_config)
                        .await;
                    if deleted.is_ok() {
                        self.audit.tenant_deleted(&tenant.id, &instance.id);
                    }
                    deleted
                }
            };

            match outcome {
                Ok(()) => debug!("Rollback step done: {}", label),
                Err(e) => error!("Rollback step failed: {}: {}", label, e),
            }
        }
    }

    async fn send_callback(
        &self,
        url: &str,
        resource_id: &str,
        outcome: &Result<ResourceDeployResult>,
    ) {
        let (success, config) = match outcome {
            Ok(result) => {
                let mut config = result.config.clone();
                if let Some(version) = result.options.get(VERSION_OPTION) {
                    config
                        .entry(VERSION_OPTION.to_string())
                        .or_insert_with(|| version.clone());
                }
                (true, config)
            }
            Err(_) => (false, ConfigMap::new()),
        };

        match self
            .notifier
            .notify(url, resource_id, success, &config)
            .await
        {
            Ok(()) => self.audit.callback_sent(resource_id, success),
            Err(e) => error!("Callback for {} to {} failed: {}", resource_id, url, e),
        }
    }

    // =========================================================================
    // Undeploy
    // =========================================================================

    pub async fn undeploy(&self, resource_id: &str) -> Result<()> {
        info!("Undeploying {}", resource_id);
        let outcome = self.undeploy_resource(resource_id).await;
        if let Err(e) = &outcome {
            error!("Undeploy of {} failed: {}", resource_id, e);
        }
        outcome
    }

    fn undeploy_resource<'a>(&'a self, resource_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = self.registry.base().find_resource(resource_id).await?;
            let handler = self.registry.resolve(&record.addon)?;

            // Only SAAS addons multiplex tenants; anything else tears down its instance
            let tenant = record
                .tenant
                .as_ref()
                .filter(|_| record.addon.deploy_mode == DeployMode::Saas);

            if let Some(tenant) = tenant {
                if tenant.is_deleted {
                    debug!("Tenant {} already deleted", tenant.id);
                } else {
                    let cluster_config = handler.read_cluster_config(&tenant.az).await?;
                    handler
                        .delete_tenant(tenant, record.instance.as_ref(), &cluster_config)
                        .await?;
                    self.audit.tenant_deleted(&tenant.id, &tenant.instance_id);
                }
            } else if let Some(instance) = &record.instance {
                if instance.is_deleted {
                    debug!("Instance {} already deleted", instance.id);
                } else {
                    if record.has_topology() && !instance.is_custom {
                        if let Err(e) = handler.tear_down_topology(instance).await {
                            error!("Failed to tear down instance {}: {}", instance.id, e);
                            if let Err(mark_err) = handler
                                .mark_instance_status(instance, InstanceStatus::DeleteError)
                                .await
                            {
                                error!(
                                    "Failed to mark instance {} as {}: {}",
                                    instance.id,
                                    InstanceStatus::DeleteError,
                                    mark_err
                                );
                            }
                            return Err(e);
                        }
                    }
                    handler
                        .delete_instance(instance, InstanceStatus::Deleted)
                        .await?;
                    self.audit.instance_deleted(&instance.id, &instance.engine);
                }
            }

            self.undeploy_children(handler.as_ref(), resource_id).await
        })
    }

    /// Undeploy every child edge of `parent_id`; edges of children that
    /// still fail after retrying are kept.
    async fn undeploy_children(&self, handler: &dyn DeployHandler, parent_id: &str) -> Result<()> {
        let children = handler.list_dependency_child_ids(parent_id).await?;
        let mut failed = Vec::new();

        for child_id in children {
            if let Err(e) = self.undeploy_child_with_retry(&child_id).await {
                error!("Giving up on child {} of {}: {}", child_id, parent_id, e);
                failed.push(child_id);
                continue;
            }

            match handler.delete_dependency_edge(parent_id, &child_id).await {
                Ok(()) => self.audit.dependency_removed(parent_id, &child_id),
                Err(e) => {
                    error!(
                        "Failed to remove edge {} -> {}: {}",
                        parent_id, child_id, e
                    );
                    failed.push(child_id);
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DeployError::ChildTeardown {
                parent: parent_id.to_string(),
                children: failed,
            })
        }
    }

    async fn undeploy_child_with_retry(&self, child_id: &str) -> Result<()> {
        let attempts = self.teardown.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.undeploy_resource(child_id).await {
                Ok(()) => return Ok(()),
                Err(DeployError::ResourceNotFound(_)) => {
                    warn!("Child {} no longer exists", child_id);
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    let delay = self.teardown.backoff(attempt);
                    warn!(
                        "Undeploy of child {} failed (attempt {}/{}), retrying in {:?}: {}",
                        child_id, attempt, attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ResourceApi for Coordinator {
    async fn check_if_need_real_deploy(&self, request: &ResourceDeployRequest) -> Result<bool> {
        Coordinator::check_if_need_real_deploy(self, request).await
    }

    async fn deploy(&self, request: ResourceDeployRequest) -> Result<ResourceDeployResult> {
        Coordinator::deploy(self, request).await
    }

    async fn undeploy(&self, resource_id: &str) -> Result<()> {
        Coordinator::undeploy(self, resource_id).await
    }
}
