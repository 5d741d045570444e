//! HTTP streaming exec client for the in-VM `cmux-execd` daemon.
//!
//! Wire protocol: `POST {base}/exec` with `{"command": ..., "timeout_ms"?: ...}`;
//! the response body is newline-delimited JSON [`crate::ExecEvent`] frames.
//! `GET {base}/healthz` answers 200 once the daemon is ready.

use crate::command::Command;
use crate::error::ExecError;
use crate::events::EventAccumulator;
use crate::{ExecOutcome, ExecResult};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// HTTP status codes that indicate transient errors worth retrying.
const TRANSIENT_HTTP_CODES: [u16; 3] = [502, 503, 504];
const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one daemon endpoint.
#[derive(Debug, Clone)]
pub struct HttpExecClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpExecClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Poll `/healthz` until it answers 200, up to `retries` attempts with a
    /// fixed delay between them.
    pub async fn wait_ready(&self, retries: u32, delay: Duration) -> ExecOutcome<()> {
        let url = format!("{}/healthz", self.base_url);
        for attempt in 1..=retries {
            let healthy = match self
                .http
                .get(&url)
                .timeout(HEALTH_TIMEOUT)
                .send()
                .await
            {
                Ok(response) => response.status().as_u16() == 200,
                Err(_) => false,
            };
            if healthy {
                return Ok(());
            }
            if attempt < retries {
                tokio::time::sleep(delay).await;
            }
        }
        Err(ExecError::NotReady)
    }

    /// Execute a command, streaming its output. Raises on non-zero exit with
    /// stdout and stderr captured in the error.
    pub async fn run(
        &self,
        label: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> ExecOutcome<ExecResult> {
        let command_str = command.to_exec_string();
        let mut payload = json!({ "command": command_str });
        if let Some(timeout) = timeout {
            let timeout_ms = (timeout.as_millis() as u64).max(1);
            payload["timeout_ms"] = json!(timeout_ms);
        }
        let request_timeout =
            timeout.map(|t| std::cmp::max(t + Duration::from_secs(5), Duration::from_secs(30)));

        let url = format!("{}/exec", self.base_url);
        let mut last_error: Option<String> = None;
        for attempt in 0..MAX_RETRIES {
            let mut request = self.http.post(&url).json(&payload);
            if let Some(request_timeout) = request_timeout {
                request = request.timeout(request_timeout);
            }
            let response = request
                .send()
                .await
                .map_err(|err| ExecError::Transport(err.to_string()))?;

            let status = response.status().as_u16();
            if TRANSIENT_HTTP_CODES.contains(&status) {
                if attempt < MAX_RETRIES - 1 {
                    let delay = INITIAL_RETRY_DELAY * 2u32.pow(attempt);
                    info!(
                        "[{label}] HTTP {status} error, retrying in {:.1}s (attempt {}/{})",
                        delay.as_secs_f64(),
                        attempt + 1,
                        MAX_RETRIES
                    );
                    last_error = Some(format!("HTTP {status}"));
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ExecError::Transport(format!(
                    "exec request failed after {MAX_RETRIES} retries: {}",
                    last_error.unwrap_or_else(|| format!("HTTP {status}"))
                )));
            }
            if status != 200 {
                let body = response.text().await.unwrap_or_default();
                return Err(ExecError::Protocol {
                    status,
                    body: body.trim().to_string(),
                });
            }

            return self.consume_stream(label, response).await;
        }
        Err(ExecError::Transport(format!(
            "exec request failed after {MAX_RETRIES} retries: {}",
            last_error.unwrap_or_default()
        )))
    }

    /// Read the NDJSON body to completion, carrying partial lines across
    /// chunk boundaries, and fold the frames into an [`ExecResult`].
    async fn consume_stream(
        &self,
        label: &str,
        response: reqwest::Response,
    ) -> ExecOutcome<ExecResult> {
        let mut accumulator = EventAccumulator::new(label);
        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| ExecError::Transport(err.to_string()))?;
            pending.extend_from_slice(&chunk);
            while let Some(newline) = pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = pending.drain(..=newline).collect();
                accumulator.note_line(&String::from_utf8_lossy(&line));
            }
        }
        if !pending.is_empty() {
            accumulator.note_line(&String::from_utf8_lossy(&pending));
        }

        let (exit_code, stdout, stderr) = accumulator.finish();
        let exit_code = match exit_code {
            Some(code) => code,
            None => {
                warn!("[{label}] exec service did not report exit code, assuming success");
                0
            }
        };
        if exit_code != 0 {
            return Err(ExecError::CommandFailed {
                label: label.to_string(),
                exit_code,
                stdout,
                stderr,
            });
        }
        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
        })
    }
}
