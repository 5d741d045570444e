//! Exec daemon installer.
//!
//! Guarantees that, soon after boot, the VM runs the `cmux-execd` HTTP
//! daemon on its known port: cross-compile on the host, upload with retry,
//! launch detached over SSH (killing any prior instance first), and gate on
//! `/healthz`.

use crate::context::TaskContext;
use anyhow::{bail, Context as _};
use cmux_exec::HttpExecClient;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const EXEC_HTTP_PORT: u16 = 39375;
pub const EXEC_BINARY_NAME: &str = "cmux-execd";
pub const EXEC_REMOTE_PATH: &str = "/usr/local/bin/cmux-execd";
pub const EXEC_TEMP_PATH: &str = "/tmp/cmux-execd";
pub const EXEC_LOG_PATH: &str = "/var/log/cmux-execd.log";
pub const EXEC_BUILD_TARGET_ENV: &str = "CMUX_EXEC_TARGET";
const DEFAULT_EXEC_BUILD_TARGET: &str = "linux/amd64";
const EXEC_SOURCE_DIR: &str = "scripts/execd";

const UPLOAD_MAX_ATTEMPTS: u32 = 5;
const HEALTH_RETRIES: u32 = 30;
const HEALTH_DELAY: Duration = Duration::from_millis(500);

/// Parse a `GOOS/GOARCH` build target, tolerating `bun-`/`go-` style
/// prefixes, `-`/`_` separators, and common architecture aliases.
pub fn parse_go_target(target: &str) -> anyhow::Result<(String, String)> {
    let mut normalized = target.trim().to_ascii_lowercase();
    for prefix in ["bun-", "go-", "golang-"] {
        if let Some(stripped) = normalized.strip_prefix(prefix) {
            normalized = stripped.to_string();
            break;
        }
    }
    let normalized = normalized.replace(['-', '_'], "/");
    let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        bail!("invalid Go target '{target}', expected format GOOS/GOARCH");
    }
    let goos = parts[0].to_string();
    let goarch = match parts[1] {
        "x64" | "x86" | "x86/64" | "x86_64" | "amd64" => "amd64",
        "arm64" | "aarch64" => "arm64",
        other => other,
    }
    .to_string();
    Ok((goos, goarch))
}

/// Cross-compile the daemon into `scripts/execd/dist/` and return the
/// binary path.
pub async fn build_exec_binary(repo_root: &Path) -> anyhow::Result<PathBuf> {
    let entry_dir = repo_root.join(EXEC_SOURCE_DIR);
    let entry_file = entry_dir.join("main.go");
    if !entry_file.exists() {
        bail!(
            "exec daemon entrypoint not found at {}. Did you run this from the repository root?",
            entry_file.display()
        );
    }

    let target = std::env::var(EXEC_BUILD_TARGET_ENV)
        .unwrap_or_else(|_| DEFAULT_EXEC_BUILD_TARGET.to_string());
    let (goos, goarch) = parse_go_target(&target)?;

    let output_dir = entry_dir.join("dist");
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let binary_path = output_dir.join(EXEC_BINARY_NAME);

    info!(
        "building {EXEC_BINARY_NAME} with Go (GOOS={goos}, GOARCH={goarch}) from {EXEC_SOURCE_DIR}"
    );
    let status = tokio::process::Command::new("go")
        .args(["build", "-o"])
        .arg(&binary_path)
        .arg(".")
        .current_dir(&entry_dir)
        .env("GOOS", &goos)
        .env("GOARCH", &goarch)
        .env("CGO_ENABLED", "0")
        .status()
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => anyhow::anyhow!(
                "Go toolchain not found in PATH. Install Go to build the exec daemon."
            ),
            _ => anyhow::Error::new(err).context("spawning go build"),
        })?;
    if !status.success() {
        bail!(
            "failed to build {EXEC_BINARY_NAME} (go exit {:?})",
            status.code()
        );
    }
    if !binary_path.exists() {
        bail!(
            "expected exec binary at {}, but it was not produced",
            binary_path.display()
        );
    }
    Ok(binary_path)
}

/// Upload the daemon binary to its temp path, retrying transient and API
/// failures with linear backoff. Retries never assume partial state.
pub async fn upload_with_retry(ctx: &TaskContext, binary_path: &Path) -> anyhow::Result<()> {
    let mut attempt: u32 = 0;
    loop {
        match ctx.instance.upload(binary_path, EXEC_TEMP_PATH).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempt += 1;
                if attempt >= UPLOAD_MAX_ATTEMPTS {
                    return Err(anyhow::Error::new(err).context(format!(
                        "uploading exec binary failed after {UPLOAD_MAX_ATTEMPTS} attempts"
                    )));
                }
                let delay = Duration::from_secs_f64(1.5 * f64::from(attempt));
                info!(
                    "retrying exec upload (attempt {attempt}/{UPLOAD_MAX_ATTEMPTS}) after error: {err}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Launch script: install the binary, kill any prior daemon by name, start
/// detached with output to the log file, then verify it is alive.
pub fn start_script() -> String {
    format!(
        r#"set -euo pipefail
install -Dm0755 {EXEC_TEMP_PATH} {EXEC_REMOTE_PATH}
rm -f {EXEC_TEMP_PATH}
if command -v pkill >/dev/null 2>&1; then
    pkill -x {EXEC_BINARY_NAME} || true
else
    pids=$(ps -eo pid,comm | awk '$2 == "{EXEC_BINARY_NAME}" {{print $1}}')
    if [ -n "$pids" ]; then
        kill $pids || true
    fi
fi
mkdir -p /var/log
nohup {EXEC_REMOTE_PATH} --port {EXEC_HTTP_PORT} >{EXEC_LOG_PATH} 2>&1 &
if command -v pgrep >/dev/null 2>&1; then
    sleep 1
    if ! pgrep -x {EXEC_BINARY_NAME} >/dev/null 2>&1; then
        echo "{EXEC_BINARY_NAME} failed to start" >&2
        if [ -f {EXEC_LOG_PATH} ]; then
            tail -n 50 {EXEC_LOG_PATH} >&2 || true
        fi
        exit 1
    fi
fi
"#
    )
}

/// Install and start the daemon, then attach a healthy client to the
/// context.
pub async fn setup_exec_service(
    ctx: &TaskContext,
    binary_path: &Path,
    service_url: &str,
) -> anyhow::Result<HttpExecClient> {
    info!("uploading exec service binary");
    upload_with_retry(ctx, binary_path).await?;

    ctx.run_via_ssh(
        "verify-exec-upload",
        format!("ls -l {EXEC_TEMP_PATH}"),
        false,
    )
    .await?;
    ctx.run_via_ssh("start-exec-service", start_script(), false)
        .await?;

    let client = HttpExecClient::new(service_url);
    client
        .wait_ready(HEALTH_RETRIES, HEALTH_DELAY)
        .await
        .context("exec service did not become ready")?;
    ctx.attach_exec_client(client.clone());
    info!("exec service ready at {service_url}");
    Ok(client)
}
