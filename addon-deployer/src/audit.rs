use tracing::{info, warn};

/// Audit logger for resource lifecycle events.
///
/// Events are emitted under the `audit` tracing target so a subscriber can
/// route them to a dedicated sink.
pub struct DeployAuditLogger {
    enabled: bool,
}

impl DeployAuditLogger {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn new_noop() -> Self {
        Self { enabled: false }
    }

    // Instance events
    pub fn instance_running(&self, instance_id: &str, engine: &str, az: &str) {
        if self.enabled {
            info!(target: "audit", instance_id, engine, az, "Instance running");
        }
    }

    pub fn instance_bound_custom(&self, instance_id: &str, engine: &str, az: &str) {
        if self.enabled {
            info!(target: "audit", instance_id, engine, az, "Instance bound to custom backend");
        }
    }

    pub fn instance_failed(&self, instance_id: &str, engine: &str) {
        if self.enabled {
            warn!(target: "audit", instance_id, engine, "Instance failed");
        }
    }

    pub fn instance_deleted(&self, instance_id: &str, engine: &str) {
        if self.enabled {
            info!(target: "audit", instance_id, engine, "Instance deleted");
        }
    }

    // Tenant events
    pub fn tenant_created(&self, tenant_id: &str, instance_id: &str, tenant_group: &str) {
        if self.enabled {
            info!(target: "audit", tenant_id, instance_id, tenant_group, "Tenant created");
        }
    }

    pub fn tenant_deleted(&self, tenant_id: &str, instance_id: &str) {
        if self.enabled {
            info!(target: "audit", tenant_id, instance_id, "Tenant deleted");
        }
    }

    // Dependency events
    pub fn dependency_recorded(&self, parent_id: &str, child_id: &str) {
        if self.enabled {
            info!(target: "audit", parent_id, child_id, "Dependency recorded");
        }
    }

    pub fn dependency_removed(&self, parent_id: &str, child_id: &str) {
        if self.enabled {
            info!(target: "audit", parent_id, child_id, "Dependency removed");
        }
    }

    pub fn callback_sent(&self, resource_id: &str, success: bool) {
        if self.enabled {
            info!(target: "audit", resource_id, success, "Callback sent");
        }
    }
}

impl Default for DeployAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
