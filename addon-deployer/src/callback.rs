//! Completion callbacks to the orchestrator that requested a deploy.
//!
//! Protocol:
//! 1. `POST {url}/api/addon-platform/addons/{id}/action/provision` with
//!    `{"isSuccess": bool}` and the operator id in `User-ID`.
//! 2. On success only, a best-effort
//!    `POST {url}/api/addon-platform/addons/{id}/config` carrying the
//!    flattened config list. Failures of this second call are swallowed.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CallbackConfig;
use crate::model::{ConfigMap, VERSION_OPTION};

/// Errors delivering a callback.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),

    #[error("callback request failed: {0}")]
    Request(reqwest::Error),
}

/// Delivers the outcome of a deploy to the caller.
#[async_trait]
pub trait CallbackNotifier: Send + Sync {
    async fn notify(
        &self,
        url: &str,
        resource_id: &str,
        success: bool,
        config: &ConfigMap,
    ) -> Result<(), CallbackError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProvisionCallback {
    is_success: bool,
}

#[derive(Serialize)]
struct ConfigItem<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
struct ConfigCallback<'a> {
    label: ConfigMap,
    version: &'a str,
    config: Vec<ConfigItem<'a>>,
}

/// HTTP implementation of [`CallbackNotifier`].
pub struct HttpCallbackNotifier {
    client: reqwest::Client,
    operator_id: String,
}

impl HttpCallbackNotifier {
    pub fn new(config: &CallbackConfig) -> Result<Self, CallbackError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(CallbackError::Client)?;
        Ok(Self {
            client,
            operator_id: config.operator_id.clone(),
        })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(
        &self,
        url: &str,
        resource_id: &str,
        success: bool,
        config: &ConfigMap,
    ) -> Result<(), CallbackError> {
        let base = format!(
            "{}/api/addon-platform/addons/{}",
            url.trim_end_matches('/'),
            resource_id
        );

        info!("Sending provision callback for {} (success: {})", resource_id, success);
        let response = self
            .client
            .post(format!("{}/action/provision", base))
            .header("User-ID", &self.operator_id)
            .json(&ProvisionCallback {
                is_success: success,
            })
            .send()
            .await
            .map_err(CallbackError::Request)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                "Provision callback for {} rejected with status {}: {}",
                resource_id, status, body
            );
            return Ok(());
        }

        if !success {
            return Ok(());
        }

        let payload = ConfigCallback {
            label: ConfigMap::new(),
            version: config.get(VERSION_OPTION).map(String::as_str).unwrap_or(""),
            config: config
                .iter()
                .map(|(name, value)| ConfigItem { name, value })
                .collect(),
        };
        match self
            .client
            .post(format!("{}/config", base))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => debug!(
                "Config callback for {} answered {}",
                resource_id,
                response.status()
            ),
            Err(e) => warn!("Config callback for {} failed: {}", resource_id, e),
        }

        Ok(())
    }
}

/// Notifier that only logs; for deployments without a callback receiver.
#[derive(Debug, Default)]
pub struct NoopCallbackNotifier;

#[async_trait]
impl CallbackNotifier for NoopCallbackNotifier {
    async fn notify(
        &self,
        url: &str,
        resource_id: &str,
        success: bool,
        _config: &ConfigMap,
    ) -> Result<(), CallbackError> {
        debug!(
            "Dropping callback to {} for {} (success: {})",
            url, resource_id, success
        );
        Ok(())
    }
}
