//! Cloud SDK trait definitions.
//!
//! These traits are the provisioner's only view of the cloud provider. The
//! REST client implements them for real runs; `fakes` implements them for
//! tests. Guarantees:
//! - `boot` returns a handle for a booting instance; commands must wait for
//!   `wait_until_ready` before executing.
//! - `expose_http_service` is idempotent per (name, port) and returns the
//!   public URL.
//! - `exec` runs a single shell command over the provider's SSH channel and
//!   never raises on non-zero exit codes; callers inspect `exit_code`.

use crate::CloudResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Uniform result of one remote command, shared by the SSH and HTTP exec
/// backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Action taken when an instance's TTL expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlAction {
    Pause,
    Stop,
}

impl std::fmt::Display for TtlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TtlAction::Pause => write!(f, "pause"),
            TtlAction::Stop => write!(f, "stop"),
        }
    }
}

impl std::str::FromStr for TtlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(TtlAction::Pause),
            "stop" => Ok(TtlAction::Stop),
            other => Err(format!("invalid ttl action '{other}', expected pause|stop")),
        }
    }
}

/// Hardware and lifecycle parameters for booting an instance.
#[derive(Debug, Clone, Serialize)]
pub struct BootSpec {
    pub snapshot_id: String,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub disk_size_mib: u64,
    pub ttl_seconds: u64,
    pub ttl_action: TtlAction,
}

/// Identifier of a created snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
}

/// A booted (or booting) VM.
#[async_trait]
pub trait InstanceHandle: Send + Sync {
    /// Provider-assigned instance id.
    fn id(&self) -> &str;

    /// Block until the provider reports the instance ready for commands.
    async fn wait_until_ready(&self) -> CloudResult<()>;

    /// Expose an in-VM HTTP port as a named public service; returns the URL.
    async fn expose_http_service(&self, name: &str, port: u16) -> CloudResult<String>;

    /// Upload a local file to an absolute path on the instance.
    async fn upload(&self, local: &Path, remote: &str) -> CloudResult<()>;

    /// Run one command line over the provider's SSH channel.
    async fn exec(&self, command: &str) -> CloudResult<ExecResult>;

    /// Snapshot the instance's current disk + memory state.
    async fn snapshot(&self) -> CloudResult<SnapshotInfo>;

    /// Replace the instance's TTL policy.
    async fn set_ttl(&self, ttl_seconds: u64, ttl_action: TtlAction) -> CloudResult<()>;

    /// Enable or disable wake-on-HTTP for paused instances.
    async fn set_wake_on(&self, wake_on_http: bool) -> CloudResult<()>;

    /// Stop (destroy) the instance.
    async fn stop(&self) -> CloudResult<()>;
}

/// Entry point into the provider.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Boot a transient instance from a base snapshot.
    async fn boot(&self, spec: &BootSpec) -> CloudResult<Arc<dyn InstanceHandle>>;

    /// Re-attach to a running instance by id.
    async fn get_instance(&self, instance_id: &str) -> CloudResult<Arc<dyn InstanceHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_action_round_trips_through_strings() {
        assert_eq!("pause".parse::<TtlAction>().unwrap(), TtlAction::Pause);
        assert_eq!("stop".parse::<TtlAction>().unwrap(), TtlAction::Stop);
        assert!("restart".parse::<TtlAction>().is_err());
        assert_eq!(TtlAction::Pause.to_string(), "pause");
        assert_eq!(
            serde_json::to_string(&TtlAction::Stop).unwrap(),
            "\"stop\""
        );
    }

    #[test]
    fn exec_result_success_is_exit_zero() {
        let ok = ExecResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        let bad = ExecResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".into(),
        };
        assert!(ok.success());
        assert!(!bad.success());
    }
}
