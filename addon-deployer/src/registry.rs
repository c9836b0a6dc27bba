//! Engine → handler lookup.
//!
//! The registry is assembled once from an explicit handler list and never
//! changes afterwards, so it is shared through an `Arc` without locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::handler::{DefaultHandler, DeployHandler, MysqlHandler, NacosHandler};
use crate::model::AddonDefinition;

/// Errors building a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("engine {engine} claimed by both {first} and {second}")]
    Ambiguous {
        engine: String,
        first: String,
        second: String,
    },
}

/// Immutable map from engine to the handler that deploys it.
pub struct HandlerRegistry {
    base: Arc<DefaultHandler>,
    handlers: HashMap<String, Arc<dyn DeployHandler>>,
    fallback: bool,
}

impl HandlerRegistry {
    pub fn builder(base: DefaultHandler) -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            base,
            handlers: Vec::new(),
            fallback: false,
        }
    }

    /// Registry with every built-in handler, falling back to the default
    /// handler for other engines.
    pub fn with_builtin_handlers(base: DefaultHandler) -> std::result::Result<Self, RegistryError> {
        Self::builder(base.clone())
            .register(Arc::new(NacosHandler::new(base.clone())))
            .register(Arc::new(MysqlHandler::new(base)))
            .with_fallback(true)
            .build()
    }

    /// The handler for an addon.
    pub fn resolve(&self, addon: &AddonDefinition) -> Result<Arc<dyn DeployHandler>> {
        match self.handlers.get(&addon.engine) {
            Some(handler) if handler.matches(addon) => {
                debug!("Handler {} selected for {}", handler.name(), addon.engine);
                Ok(handler.clone())
            }
            _ if self.fallback => {
                debug!("Default handler selected for {}", addon.engine);
                Ok(self.base.clone() as Arc<dyn DeployHandler>)
            }
            _ => Err(DeployError::NoHandler(addon.engine.clone())),
        }
    }

    /// The generic handler, used for catalog resolution and resource lookup.
    pub fn base(&self) -> &DefaultHandler {
        &self.base
    }

    pub fn engines(&self) -> Vec<&str> {
        let mut engines: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        engines.sort_unstable();
        engines
    }
}

pub struct HandlerRegistryBuilder {
    base: DefaultHandler,
    handlers: Vec<Arc<dyn DeployHandler>>,
    fallback: bool,
}

impl HandlerRegistryBuilder {
    pub fn register(mut self, handler: Arc<dyn DeployHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Route engines no handler claims to the default handler.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn build(self) -> std::result::Result<HandlerRegistry, RegistryError> {
        let mut handlers: HashMap<String, Arc<dyn DeployHandler>> = HashMap::new();
        for handler in self.handlers {
            for engine in handler.engines() {
                if let Some(existing) = handlers.get(*engine) {
                    return Err(RegistryError::Ambiguous {
                        engine: engine.to_string(),
                        first: existing.name().to_string(),
                        second: handler.name().to_string(),
                    });
                }
                handlers.insert(engine.to_string(), handler.clone());
            }
        }

        Ok(HandlerRegistry {
            base: Arc::new(self.base),
            handlers,
            fallback: self.fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, InfraBackend};
    use crate::config::TopologyWaitConfig;
    use crate::model::{ConfigMap, DeployMode, TopologyRequest, TopologyStatus};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct StubBackend;

    #[async_trait]
    impl InfraBackend for StubBackend {
        async fn cluster_info(&self, _cluster: &str) -> std::result::Result<ConfigMap, BackendError> {
            Ok(ConfigMap::new())
        }

        async fn create_topology(
            &self,
            _request: &TopologyRequest,
        ) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        async fn inspect_topology(
            &self,
            kind: &str,
            id: &str,
        ) -> std::result::Result<TopologyStatus, BackendError> {
            Ok(TopologyStatus::synthetic_ready(id, kind))
        }

        async fn delete_topology(&self, _kind: &str, _id: &str) -> std::result::Result<(), BackendError> {
            Ok(())
        }
    }

    fn make_base() -> DefaultHandler {
        DefaultHandler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(StubBackend),
            TopologyWaitConfig::default(),
        )
    }

    fn addon(engine: &str, mode: DeployMode) -> AddonDefinition {
        AddonDefinition {
            engine: engine.to_string(),
            deploy_mode: mode,
        }
    }

    #[test]
    fn test_builtin_handlers_are_registered() {
        let registry = HandlerRegistry::with_builtin_handlers(make_base()).unwrap();
        assert_eq!(registry.engines(), vec!["mysql", "nacos"]);

        let handler = registry.resolve(&addon("nacos", DeployMode::Saas)).unwrap();
        assert_eq!(handler.name(), "nacos");
        let handler = registry.resolve(&addon("mysql", DeployMode::Paas)).unwrap();
        assert_eq!(handler.name(), "mysql");
    }

    #[test]
    fn test_unclaimed_engine_falls_back_to_default() {
        let registry = HandlerRegistry::with_builtin_handlers(make_base()).unwrap();
        let handler = registry.resolve(&addon("redis", DeployMode::Paas)).unwrap();
        assert_eq!(handler.name(), "default");

        // mysql only accepts PAAS
        let handler = registry.resolve(&addon("mysql", DeployMode::Saas)).unwrap();
        assert_eq!(handler.name(), "default");
    }

    #[test]
    fn test_no_handler_without_fallback() {
        let base = make_base();
        let registry = HandlerRegistry::builder(base.clone())
            .register(Arc::new(NacosHandler::new(base)))
            .build()
            .unwrap();

        let result = registry.resolve(&addon("redis", DeployMode::Paas));
        assert!(matches!(result, Err(DeployError::NoHandler(engine)) if engine == "redis"));
    }

    #[test]
    fn test_duplicate_claim_is_rejected() {
        let base = make_base();
        let result = HandlerRegistry::builder(base.clone())
            .register(Arc::new(NacosHandler::new(base.clone())))
            .register(Arc::new(NacosHandler::new(base)))
            .build();

        match result {
            Err(RegistryError::Ambiguous { engine, .. }) => assert_eq!(engine, "nacos"),
            Ok(_) => panic!("expected ambiguous registration"),
        }
    }
}
