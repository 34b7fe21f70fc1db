//! Dependency request to the external agent

use crate::config::{AgentConfig, PlmConfig};
use crate::error::UpstreamError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Body posted to the agent. `plan_id` correlates the later delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyRequest {
    pub tracking_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub plan_id: String,
    pub folder_id: String,
}

#[async_trait]
pub trait DependencyAgent: Send + Sync {
    async fn request(&self, request: &DependencyRequest) -> Result<(), UpstreamError>;
}

/// Posts requests to the agent's webhook
#[derive(Clone)]
pub struct HttpDependencyAgent {
    client: Client,
    url: String,
}

impl HttpDependencyAgent {
    pub fn new(url: impl Into<String>) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DependencyAgent for HttpDependencyAgent {
    async fn request(&self, request: &DependencyRequest) -> Result<(), UpstreamError> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                service: "dependency agent",
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Fires dependency requests without waiting on them
#[derive(Clone)]
pub struct DependencyRequester {
    agent: Option<Arc<dyn DependencyAgent>>,
    web_base_url: String,
    company: String,
    callback_url: Option<String>,
}

impl DependencyRequester {
    pub fn new(agent: Option<Arc<dyn DependencyAgent>>, plm: &PlmConfig, config: &AgentConfig) -> Self {
        Self {
            agent,
            web_base_url: plm.web_base_url.trim_end_matches('/').to_string(),
            company: plm.company.clone(),
            callback_url: config.callback_url.clone(),
        }
    }

    /// PLM web page the agent reads the dependency table from
    pub fn tracking_url(&self, folder_id: &str, plan_id: &str) -> String {
        format!(
            "{}/{}/Tracking#/Tracking/{}/Style/plan/{}/setup?useFavorite=true",
            self.web_base_url, self.company, folder_id, plan_id
        )
    }

    /// Spawn the request. Failures are logged and never reach the caller;
    /// `None` when no agent is configured.
    pub fn request(&self, plan_id: &str, folder_id: &str) -> Option<JoinHandle<()>> {
        let Some(agent) = self.agent.clone() else {
            warn!("No dependency agent configured, skipping request for plan {}", plan_id);
            return None;
        };

        let request = DependencyRequest {
            tracking_url: self.tracking_url(folder_id, plan_id),
            callback_url: self.callback_url.clone(),
            plan_id: plan_id.to_string(),
            folder_id: folder_id.to_string(),
        };
        info!("Requesting dependencies for plan {} ({})", plan_id, request.tracking_url);

        Some(tokio::spawn(async move {
            match agent.request(&request).await {
                Ok(()) => info!("Dependency request accepted for plan {}", request.plan_id),
                Err(e) => error!("Dependency request for plan {} failed: {}", request.plan_id, e),
            }
        }))
    }
}
