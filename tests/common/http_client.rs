//! HTTP client helpers for tests.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub answer: String,
    pub documents_found: usize,
    pub served_from_cache: bool,
}

#[derive(Debug)]
pub struct QueryReply {
    pub body: QueryBody,
    pub cache_header: String,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TestClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(u16, String),
}

pub struct TestClient {
    client: reqwest::Client,
    base_url: String,
}

impl TestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url, path)
    }

    pub async fn query(&self, query: &str) -> Result<QueryReply, TestClientError> {
        let resp = self
            .client
            .post(self.url("/v1/query"))
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        let cache_header = resp
            .headers()
            .get("x-ragline-cache")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        match resp.status().as_u16() {
            200 => Ok(QueryReply {
                body: resp.json().await?,
                cache_header,
            }),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(TestClientError::UnexpectedStatus(status, body))
            }
        }
    }

    pub async fn health(&self) -> Result<HealthResponse, TestClientError> {
        let resp = self.client.get(self.url("/healthz")).send().await?;

        if resp.status().is_success() {
            Ok(resp.json().await?)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(TestClientError::UnexpectedStatus(status, body))
        }
    }

    pub async fn get_json(&self, path: &str) -> Result<serde_json::Value, TestClientError> {
        let resp = self.client.get(self.url(path)).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    pub async fn get_text(&self, path: &str) -> Result<String, TestClientError> {
        let resp = self.client.get(self.url(path)).send().await?;
        Ok(resp.error_for_status()?.text().await?)
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TestClientError> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        Ok(resp.error_for_status()?.json().await?)
    }
}
