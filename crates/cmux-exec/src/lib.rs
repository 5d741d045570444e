//! Remote command execution for cmux snapshot provisioning.
//!
//! Two interchangeable backends produce a uniform [`ExecResult`]:
//! - [`HttpExecClient`]: streaming NDJSON protocol against the in-VM
//!   `cmux-execd` daemon, with transient-5xx retry
//! - [`run_via_ssh`]: the cloud SDK's exec channel wrapped with retry on
//!   transient connection failures
//!
//! Commands are [`Command`] values (shell script or argv) and are decorated
//! with the environment prelude and an optional cgroup join before they hit
//! either backend.

mod command;
mod error;
mod events;
mod http;
mod ssh;

pub use cmux_cloud::ExecResult;
pub use command::{decorate, Command};
pub use error::ExecError;
pub use events::ExecEvent;
pub use http::HttpExecClient;
pub use ssh::run_via_ssh;

/// Result type for exec operations.
pub type ExecOutcome<T> = std::result::Result<T, ExecError>;
