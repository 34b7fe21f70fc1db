//! PLM API client
//!
//! Outbound calls to the PLM: the tracking plan behind a plan-style, the
//! tracking folder list and masterdata choice lists. Authentication is a
//! bearer token issued elsewhere and supplied through configuration.

use crate::config::PlmConfig;
use crate::error::UpstreamError;
use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, RequestBuilder};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const SERVICE: &str = "PLM API";

/// Read access to the PLM
#[async_trait]
pub trait PlmClient: Send + Sync {
    /// Tracking plan with its timeline schema
    async fn fetch_plan(&self, plan_id: &str) -> Result<Value, UpstreamError>;

    /// Every tracking folder visible to the company
    async fn list_tracking_folders(&self) -> Result<Vec<Value>, UpstreamError>;

    /// Masterdata definition of one field, choices included
    async fn fetch_masterdata(&self, field_id: &str) -> Result<Value, UpstreamError>;
}

/// `reqwest`-backed client
#[derive(Clone)]
pub struct HttpPlmClient {
    client: Client,
    api_base_url: String,
    company: String,
    access_token: Option<String>,
}

impl HttpPlmClient {
    pub fn new(config: &PlmConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            company: config.company.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}/{}", self.api_base_url, self.company, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, UpstreamError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(UpstreamError::NotConfigured("PLM access token"))?;

        let response = request
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PlmClient for HttpPlmClient {
    async fn fetch_plan(&self, plan_id: &str) -> Result<Value, UpstreamError> {
        let url = self.url(&format!("Tracking/Plan/{plan_id}"));
        debug!("Fetching plan: {}", url);
        // The PLM serves plans from a body-less POST
        self.send(self.client.post(url).body("")).await
    }

    async fn list_tracking_folders(&self) -> Result<Vec<Value>, UpstreamError> {
        match self.send(self.client.get(self.url("Tracking/Folders"))).await? {
            Value::Array(folders) => Ok(folders),
            other => Err(UpstreamError::Unexpected(format!(
                "folder list is not an array: {}",
                truncate(&other.to_string(), 200)
            ))),
        }
    }

    async fn fetch_masterdata(&self, field_id: &str) -> Result<Value, UpstreamError> {
        let url = self.url(&format!("MasterData/{field_id}"));
        debug!("Fetching: {}", url);
        self.send(self.client.get(url)).await
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Run `op`, and once more after `backoff` if it fails.
pub async fn with_single_retry<T, F, Fut>(
    what: &str,
    backoff: Duration,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Attempt 1 to {} failed: {}", what, e);
            tokio::time::sleep(backoff).await;
            op().await.map_err(|e| {
                warn!("Attempt 2 to {} failed: {}", what, e);
                e
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_url_layout() {
        let client = HttpPlmClient::new(&PlmConfig {
            api_base_url: "https://plm.example.com/".to_string(),
            company: "acme".to_string(),
            ..PlmConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url("Tracking/Plan/P1"),
            "https://plm.example.com/api/acme/Tracking/Plan/P1"
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_not_configured() {
        let client = HttpPlmClient::new(&PlmConfig::default()).unwrap();
        let err = client.fetch_plan("P1").await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_retry_recovers_on_second_attempt() {
        let calls = AtomicUsize::new(0);
        let result = with_single_retry("fetch plan", Duration::ZERO, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(UpstreamError::Unexpected("flaky".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_two_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_single_retry("fetch plan", Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(UpstreamError::Unexpected("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("größe", 3), "grö");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
