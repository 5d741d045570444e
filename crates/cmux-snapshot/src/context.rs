//! Per-VM execution environment passed to every task.

use crate::args::IdeProvider;
use crate::cgroup::ResourceProfile;
use anyhow::anyhow;
use cmux_cloud::InstanceHandle;
use cmux_exec::{decorate, Command, ExecResult, HttpExecClient};
use cmux_taskgraph::TimingsCollector;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Fixed export block prepended to every command so each task sees the same
/// PATH and toolchain roots regardless of layer ordering.
const ENVIRONMENT_PRELUDE: &str = r#"export PATH="/usr/local/bin:/usr/local/cargo/bin:/usr/local/go/bin:$HOME/.local/bin:$HOME/.bun/bin:$PATH"
export RUSTUP_HOME=/usr/local/rustup
export CARGO_HOME=/usr/local/cargo
export GOPATH=/usr/local/go-workspace
export GOMODCACHE=/usr/local/go-workspace/pkg/mod
export GOCACHE=/usr/local/go-cache
export BUN_INSTALL=/root/.bun"#;

const DAEMON_LOG_PATH: &str = "/var/log/cmux-execd.log";

/// Mutable bag shared by all tasks of one preset's provisioning run.
///
/// The exec client and cgroup path start empty and are attached by the
/// bootstrap tasks; every later command goes through the HTTP client and
/// joins the cgroup.
pub struct TaskContext {
    pub instance: Arc<dyn InstanceHandle>,
    pub repo_root: PathBuf,
    pub remote_repo_root: String,
    pub remote_repo_tar: String,
    pub exec_service_url: String,
    pub timings: Arc<TimingsCollector>,
    pub resource_profile: Option<ResourceProfile>,
    pub ide_provider: IdeProvider,
    exec_client: OnceLock<HttpExecClient>,
    cgroup_path: OnceLock<String>,
}

impl TaskContext {
    pub fn new(
        instance: Arc<dyn InstanceHandle>,
        repo_root: PathBuf,
        exec_service_url: String,
        resource_profile: Option<ResourceProfile>,
        ide_provider: IdeProvider,
    ) -> Self {
        Self {
            instance,
            repo_root,
            remote_repo_root: "/cmux".to_string(),
            remote_repo_tar: "/tmp/cmux-repo.tar".to_string(),
            exec_service_url,
            timings: Arc::new(TimingsCollector::new()),
            resource_profile,
            ide_provider,
            exec_client: OnceLock::new(),
            cgroup_path: OnceLock::new(),
        }
    }

    pub fn environment_prelude(&self) -> &'static str {
        ENVIRONMENT_PRELUDE
    }

    /// Attach the HTTP exec client once the daemon is healthy.
    pub fn attach_exec_client(&self, client: HttpExecClient) {
        self.exec_client.set(client).ok();
    }

    pub fn exec_client(&self) -> Option<&HttpExecClient> {
        self.exec_client.get()
    }

    /// Record the active cgroup so every later command joins it.
    pub fn set_cgroup_path(&self, path: String) {
        self.cgroup_path.set(path).ok();
    }

    pub fn cgroup_path(&self) -> Option<&str> {
        self.cgroup_path.get().map(String::as_str)
    }

    /// Run a command through the HTTP exec service, falling back to SSH
    /// while the daemon is not yet installed (the bootstrap layer).
    pub async fn run(
        &self,
        label: &str,
        command: impl Into<Command>,
    ) -> anyhow::Result<ExecResult> {
        self.run_with_timeout(label, command, None).await
    }

    /// Like [`TaskContext::run`] with an explicit command timeout.
    ///
    /// HTTP failures carry a best-effort tail of the daemon log so they stay
    /// debuggable without extra round trips.
    pub async fn run_with_timeout(
        &self,
        label: &str,
        command: impl Into<Command>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<ExecResult> {
        let decorated = decorate(
            &command.into(),
            Some(self.environment_prelude()),
            self.cgroup_path(),
            true,
        );
        let Some(client) = self.exec_client() else {
            let result =
                cmux_exec::run_via_ssh(self.instance.as_ref(), label, &decorated).await?;
            return Ok(result);
        };
        match client.run(label, &decorated, timeout).await {
            Ok(result) => Ok(result),
            Err(err) => match self.daemon_log_tail().await {
                Some(tail) if !tail.trim().is_empty() => Err(anyhow!(
                    "{err}\n--- {DAEMON_LOG_PATH} (last 50 lines) ---\n{}",
                    tail.trim_end()
                )),
                _ => Err(err.into()),
            },
        }
    }

    /// Run a command over the SDK's SSH channel, bypassing the daemon.
    /// Bootstrap commands pass `use_cgroup = false`.
    pub async fn run_via_ssh(
        &self,
        label: &str,
        command: impl Into<Command>,
        use_cgroup: bool,
    ) -> anyhow::Result<ExecResult> {
        let decorated = decorate(
            &command.into(),
            Some(self.environment_prelude()),
            if use_cgroup { self.cgroup_path() } else { None },
            use_cgroup,
        );
        let result = cmux_exec::run_via_ssh(self.instance.as_ref(), label, &decorated).await?;
        Ok(result)
    }

    /// Last lines of the daemon log, fetched over SSH. Best effort.
    async fn daemon_log_tail(&self) -> Option<String> {
        let command = Command::shell(format!(
            "tail -n 50 {DAEMON_LOG_PATH} 2>/dev/null || true"
        ));
        match cmux_exec::run_via_ssh(self.instance.as_ref(), "execd-log-tail", &command).await {
            Ok(result) => Some(result.stdout),
            Err(_) => None,
        }
    }
}
