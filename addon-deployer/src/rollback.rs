//! Compensating actions recorded while a deploy makes progress.
//!
//! Every side effect of a deploy pushes the action that undoes it. On
//! failure the coordinator drains the stack in reverse order; on success the
//! stack is dropped.

use crate::model::{ConfigMap, InstanceData, TenantData};

#[derive(Debug, Clone, PartialEq)]
pub enum UndoAction {
    /// Undeploy a sub-resource and remove its dependency edge.
    UndeploySubResource { parent_id: String, child_id: String },
    /// Soft-delete an instance that never reached RUNNING with status ERROR.
    FailInstance { instance: InstanceData },
    /// Delete the topology submitted for an instance.
    TearDownTopology { instance: InstanceData },
    /// Soft-delete a tenant created by this deploy.
    DeleteTenant {
        tenant: TenantData,
        instance: InstanceData,
        cluster_config: ConfigMap,
    },
}

impl UndoAction {
    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            UndoAction::UndeploySubResource {
                parent_id,
                child_id,
            } => format!("undeploy sub-resource {} of {}", child_id, parent_id),
            UndoAction::FailInstance { instance } => format!("fail instance {}", instance.id),
            UndoAction::TearDownTopology { instance } => {
                format!("tear down topology of {}", instance.id)
            }
            UndoAction::DeleteTenant { tenant, .. } => format!("delete tenant {}", tenant.id),
        }
    }
}

#[derive(Debug, Default)]
pub struct UndoStack {
    actions: Vec<UndoAction>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    /// Drop the instance actions once the instance reached RUNNING.
    pub fn settle_instance(&mut self, instance_id: &str) {
        self.actions.retain(|action| match action {
            UndoAction::FailInstance { instance } | UndoAction::TearDownTopology { instance } => {
                instance.id != instance_id
            }
            _ => true,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Actions in the order they must run: newest first.
    pub fn into_reversed(self) -> impl Iterator<Item = UndoAction> {
        self.actions.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceStatus;
    use chrono::Utc;

    fn make_instance(id: &str) -> InstanceData {
        let now = Utc::now();
        InstanceData {
            id: id.to_string(),
            engine: "nacos".to_string(),
            version: "2.0.0".to_string(),
            az: "az1".to_string(),
            release_id: String::new(),
            options: "{}".to_string(),
            config: "{}".to_string(),
            is_custom: false,
            is_deleted: false,
            status: InstanceStatus::Init,
            created_at: now,
            updated_at: now,
        }
    }

    fn sub_resource(child_id: &str) -> UndoAction {
        UndoAction::UndeploySubResource {
            parent_id: "parent".to_string(),
            child_id: child_id.to_string(),
        }
    }

    #[test]
    fn test_drains_newest_first() {
        let mut stack = UndoStack::new();
        stack.push(sub_resource("child-a"));
        stack.push(sub_resource("child-b"));
        stack.push(UndoAction::FailInstance {
            instance: make_instance("i-1"),
        });

        let order: Vec<String> = stack.into_reversed().map(|a| a.describe()).collect();
        assert_eq!(
            order,
            vec![
                "fail instance i-1",
                "undeploy sub-resource child-b of parent",
                "undeploy sub-resource child-a of parent",
            ]
        );
    }

    #[test]
    fn test_settle_instance_keeps_other_actions() {
        let mut stack = UndoStack::new();
        stack.push(sub_resource("child-a"));
        stack.push(UndoAction::FailInstance {
            instance: make_instance("i-1"),
        });
        stack.push(UndoAction::TearDownTopology {
            instance: make_instance("i-1"),
        });
        stack.push(UndoAction::FailInstance {
            instance: make_instance("i-2"),
        });
        assert_eq!(stack.len(), 4);

        stack.settle_instance("i-1");
        assert_eq!(stack.len(), 2);

        let remaining: Vec<UndoAction> = stack.into_reversed().collect();
        assert!(matches!(&remaining[0], UndoAction::FailInstance { instance } if instance.id == "i-2"));
        assert_eq!(remaining[1], sub_resource("child-a"));
    }

    #[test]
    fn test_empty_stack() {
        let stack = UndoStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.into_reversed().count(), 0);
    }
}
