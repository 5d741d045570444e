//! Error types for the cloud SDK interface.

use thiserror::Error;

/// Errors surfaced by cloud operations.
#[derive(Error, Debug)]
pub enum CloudError {
    /// The API rejected a request.
    #[error("cloud API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Connection-level failure worth retrying (reset, closed channel,
    /// timeout). The SSH exec wrapper retries these.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Response body did not have the expected shape.
    #[error("unexpected response shape: missing field '{field}'")]
    MissingField { field: &'static str },

    /// Credentials missing or malformed.
    #[error("cloud credentials error: {0}")]
    Credentials(String),

    /// Instance did not reach the ready state within the poll budget.
    #[error("instance {instance_id} did not become ready after {attempts} polls")]
    ReadyTimeout { instance_id: String, attempts: u32 },

    /// Local file handling during upload.
    #[error("upload I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of a request or response payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether a retry at the call site is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || (err.is_request() && err.status().is_none()) {
            CloudError::Transient(err.to_string())
        } else {
            CloudError::Api {
                status: err.status().map(|s| s.as_u16()).unwrap_or(0),
                message: err.to_string(),
            }
        }
    }
}
