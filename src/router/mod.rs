//! Router Client (C3): HTTP client to the Media Router's JSON REST
//! surface, with fixed-delay retry on transport errors and 5xx.

mod types;

pub use types::{PathSpec, RouterHealth, RouterMetrics, RouterPath, RouterStream};

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::warn;

use crate::error::{AppError, Result};

pub struct RouterClient {
    base_url: String,
    client: Client,
    retry_attempts: u32,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl RouterClient {
    pub fn new(host: &str, api_port: u16, retry_attempts: u32, retry_delay: Duration, request_timeout: Duration) -> Self {
        Self {
            base_url: format!("http://{host}:{api_port}"),
            client: Client::new(),
            retry_attempts,
            retry_delay,
            request_timeout,
        }
    }

    async fn request_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self.client.request(method.clone(), &url).timeout(self.request_timeout);
            if let Some(ref b) = body {
                req = req.json(b);
            }

            let result = req.send().await;
            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<T>()
                            .await
                            .map_err(|e| AppError::Internal(format!("decoding router response: {e}")));
                    }
                    if status.is_client_error() {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(AppError::RouterHttp { status: status.as_u16(), body: text });
                    }
                    if attempt > self.retry_attempts {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(AppError::RouterHttp { status: status.as_u16(), body: text });
                    }
                    warn!(path, attempt, %status, "router returned server error, retrying");
                }
                Err(e) if attempt > self.retry_attempts => {
                    return Err(AppError::RouterTimeout(e.to_string()));
                }
                Err(e) => {
                    warn!(path, attempt, error = %e, "router request failed, retrying");
                }
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    pub async fn get_paths(&self) -> Result<Vec<RouterPath>> {
        self.request_with_retry(reqwest::Method::GET, "/v3/paths/list", None).await
    }

    pub async fn get_path(&self, name: &str) -> Result<RouterPath> {
        self.request_with_retry(reqwest::Method::GET, &format!("/v3/paths/get/{name}"), None).await
    }

    pub async fn create_path(&self, name: &str, spec: &PathSpec) -> Result<()> {
        let body = serde_json::to_value(spec).map_err(|e| AppError::Internal(e.to_string()))?;
        let _: serde_json::Value = self
            .request_with_retry(reqwest::Method::POST, &format!("/v3/config/paths/add/{name}"), Some(body))
            .await?;
        Ok(())
    }

    pub async fn delete_path(&self, name: &str) -> Result<()> {
        let _: serde_json::Value = self
            .request_with_retry(reqwest::Method::DELETE, &format!("/v3/config/paths/delete/{name}"), None)
            .await?;
        Ok(())
    }

    pub async fn get_streams(&self) -> Result<Vec<RouterStream>> {
        self.request_with_retry(reqwest::Method::GET, "/v3/paths/list", None).await
    }

    pub async fn get_stream(&self, name: &str) -> Result<RouterStream> {
        self.request_with_retry(reqwest::Method::GET, &format!("/v3/paths/get/{name}"), None).await
    }

    pub async fn get_health(&self) -> Result<RouterHealth> {
        let url = format!("{}/v3/config/global/get", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| AppError::RouterTimeout(e.to_string()))?;
        if resp.status() == StatusCode::OK {
            Ok(RouterHealth { reachable: true })
        } else {
            Ok(RouterHealth { reachable: false })
        }
    }

    pub async fn get_metrics(&self) -> Result<RouterMetrics> {
        self.request_with_retry(reqwest::Method::GET, "/v3/metrics", None).await
    }

    pub async fn update_config(&self, cfg: serde_json::Value) -> Result<()> {
        let _: serde_json::Value = self
            .request_with_retry(reqwest::Method::PATCH, "/v3/config/global/patch", Some(cfg))
            .await?;
        Ok(())
    }
}
