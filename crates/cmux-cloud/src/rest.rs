//! Reqwest-backed Morph REST client.
//!
//! Auth is a bearer token read from `MORPH_API_KEY`. Responses are parsed
//! through the [`crate::value`] adapter because field placement varies
//! between endpoints.

use crate::api::{BootSpec, CloudClient, ExecResult, InstanceHandle, SnapshotInfo, TtlAction};
use crate::error::CloudError;
use crate::{value, CloudResult};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://cloud.morph.so/api";
const READY_POLL_ATTEMPTS: u32 = 120;
const READY_POLL_DELAY: Duration = Duration::from_secs(2);

/// Shared HTTP plumbing for the client and its instance handles.
#[derive(Clone)]
struct Rest {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Rest {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> CloudResult<Value> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        debug!(method = %method, url = %url, "cloud API request");
        let mut req = self
            .http
            .request(method, &url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json");
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(json!({}));
            }
            return Ok(serde_json::from_str(&text)?);
        }
        let message = response.text().await.unwrap_or_default();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(CloudError::Transient(format!(
                "HTTP {status}: {}",
                message.trim()
            )));
        }
        Err(CloudError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

/// Client for the Morph REST API.
pub struct MorphRestClient {
    rest: Rest,
}

impl MorphRestClient {
    /// Build a client from `MORPH_API_KEY` (required) and `MORPH_BASE_URL`
    /// (optional).
    pub fn from_env() -> CloudResult<Self> {
        let api_key = std::env::var("MORPH_API_KEY")
            .map_err(|_| CloudError::Credentials("MORPH_API_KEY is not set".to_string()))?;
        let base_url =
            std::env::var("MORPH_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            rest: Rest {
                http: reqwest::Client::new(),
                base_url: base_url.into(),
                api_key: api_key.into(),
            },
        }
    }

    fn handle(&self, instance_id: String) -> Arc<dyn InstanceHandle> {
        Arc::new(RestInstance {
            rest: self.rest.clone(),
            instance_id,
        })
    }
}

#[async_trait]
impl CloudClient for MorphRestClient {
    async fn boot(&self, spec: &BootSpec) -> CloudResult<Arc<dyn InstanceHandle>> {
        let body = json!({
            "snapshot_id": spec.snapshot_id,
            "vcpus": spec.vcpus,
            "memory": spec.memory_mib,
            "disk_size": spec.disk_size_mib,
            "ttl_seconds": spec.ttl_seconds,
            "ttl_action": spec.ttl_action,
        });
        let response = self
            .rest
            .request(Method::POST, "instance", Some(body))
            .await?;
        let instance_id =
            value::get_str(&response, "id").ok_or(CloudError::MissingField { field: "id" })?;
        info!(instance_id = %instance_id, snapshot_id = %spec.snapshot_id, "booted instance");
        Ok(self.handle(instance_id))
    }

    async fn get_instance(&self, instance_id: &str) -> CloudResult<Arc<dyn InstanceHandle>> {
        let response = self
            .rest
            .request(Method::GET, &format!("instance/{instance_id}"), None)
            .await?;
        let instance_id =
            value::get_str(&response, "id").ok_or(CloudError::MissingField { field: "id" })?;
        Ok(self.handle(instance_id))
    }
}

/// One booted VM addressed through the REST API.
struct RestInstance {
    rest: Rest,
    instance_id: String,
}

impl RestInstance {
    fn path(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            format!("instance/{}", self.instance_id)
        } else {
            format!("instance/{}/{suffix}", self.instance_id)
        }
    }
}

#[async_trait]
impl InstanceHandle for RestInstance {
    fn id(&self) -> &str {
        &self.instance_id
    }

    async fn wait_until_ready(&self) -> CloudResult<()> {
        for attempt in 1..=READY_POLL_ATTEMPTS {
            let response = self.rest.request(Method::GET, &self.path(""), None).await?;
            let status = value::get_str(&response, "status").unwrap_or_default();
            if status == "ready" {
                debug!(instance_id = %self.instance_id, attempt, "instance ready");
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_DELAY).await;
        }
        Err(CloudError::ReadyTimeout {
            instance_id: self.instance_id.clone(),
            attempts: READY_POLL_ATTEMPTS,
        })
    }

    async fn expose_http_service(&self, name: &str, port: u16) -> CloudResult<String> {
        let body = json!({"name": name, "port": port});
        let response = self
            .rest
            .request(Method::POST, &self.path("http-services"), Some(body))
            .await?;
        if let Some(url) = value::get_url(&response, "url") {
            return Ok(url);
        }
        // Some API versions return the whole instance; find the service by
        // port in its networking block.
        let services = response
            .pointer("/networking/http_services")
            .and_then(Value::as_array)
            .ok_or(CloudError::MissingField { field: "url" })?;
        services
            .iter()
            .find(|svc| value::get_port(svc, "port") == Some(port))
            .and_then(|svc| value::get_url(svc, "url"))
            .ok_or(CloudError::MissingField { field: "url" })
    }

    async fn upload(&self, local: &Path, remote: &str) -> CloudResult<()> {
        let bytes = tokio::fs::read(local).await?;
        let url = format!(
            "{}/{}?path={}",
            self.rest.base_url.trim_end_matches('/'),
            self.path("files"),
            remote
        );
        let response = self
            .rest
            .http
            .put(&url)
            .bearer_auth(&self.rest.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CloudError::Api {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn exec(&self, command: &str) -> CloudResult<ExecResult> {
        let body = json!({"command": command});
        let response = self
            .rest
            .request(Method::POST, &self.path("exec"), Some(body))
            .await?;
        Ok(ExecResult {
            exit_code: value::get(&response, "exit_code")
                .and_then(Value::as_i64)
                .unwrap_or(0) as i32,
            stdout: value::get_str(&response, "stdout").unwrap_or_default(),
            stderr: value::get_str(&response, "stderr").unwrap_or_default(),
        })
    }

    async fn snapshot(&self) -> CloudResult<SnapshotInfo> {
        let response = self
            .rest
            .request(Method::POST, &self.path("snapshot"), None)
            .await?;
        let id =
            value::get_str(&response, "id").ok_or(CloudError::MissingField { field: "id" })?;
        info!(instance_id = %self.instance_id, snapshot_id = %id, "snapshot created");
        Ok(SnapshotInfo { id })
    }

    async fn set_ttl(&self, ttl_seconds: u64, ttl_action: TtlAction) -> CloudResult<()> {
        let body = json!({"ttl_seconds": ttl_seconds, "ttl_action": ttl_action});
        self.rest
            .request(Method::POST, &self.path("ttl"), Some(body))
            .await?;
        Ok(())
    }

    async fn set_wake_on(&self, wake_on_http: bool) -> CloudResult<()> {
        let body = json!({"wake_on_http": wake_on_http});
        self.rest
            .request(Method::POST, &self.path("wake-on"), Some(body))
            .await?;
        Ok(())
    }

    async fn stop(&self) -> CloudResult<()> {
        self.rest
            .request(Method::POST, &self.path("stop"), None)
            .await?;
        info!(instance_id = %self.instance_id, "instance stopped");
        Ok(())
    }
}
