//! Post-cleanup sanity checks: every installed toolchain and service is
//! probed before the snapshot is taken.

use crate::args::IdeProvider;
use crate::context::TaskContext;
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use std::sync::Arc;

const CHECK_SSH_SERVICE: &str = r#"set -euo pipefail
status_output="$(systemctl status ssh --no-pager || true)"
printf '%s\n' "$status_output"
if ! systemctl is-active --quiet ssh; then
  echo "ssh service not active; attempting restart..." >&2
  systemctl restart ssh || true
  sleep 2
  status_output="$(systemctl status ssh --no-pager || true)"
  printf '%s\n' "$status_output"
fi
if ! systemctl is-active --quiet ssh; then
  echo "ERROR: ssh service status did not report active (running)" >&2
  journalctl -u ssh --no-pager -n 50 || true
  exit 1
fi
"#;

const CHECK_VSCODE: &str = r#"for attempt in $(seq 1 15); do
  if curl -fsS -o /dev/null http://127.0.0.1:39378/; then
    echo "IDE endpoint is reachable"
    exit 0
  fi
  sleep 2
done
echo "ERROR: IDE endpoint not reachable after 30s" >&2
systemctl status cmux-ide.service --no-pager || true
exit 1
"#;

const CHECK_PTY: &str = r#"for attempt in $(seq 1 20); do
  if curl -fsS -H 'Accept: application/json' http://127.0.0.1:39383/sessions >/dev/null; then
    echo "cmux-pty endpoint is reachable"
    exit 0
  fi
  sleep 2
done
echo "ERROR: cmux-pty endpoint not reachable after 40s" >&2
systemctl status cmux-pty.service --no-pager || true
tail -n 80 /var/log/cmux/cmux-pty.log || true
exit 1
"#;

const CHECK_VNC: &str = r#"# Verify VNC binaries are installed
vncserver -version
if [ ! -x /usr/local/lib/cmux/cmux-vnc-proxy ]; then
  echo "cmux-vnc-proxy binary missing" >&2
  exit 1
fi

# Verify VNC endpoint is accessible
sleep 5
for attempt in $(seq 1 15); do
  if curl -fsS -o /dev/null http://127.0.0.1:39380/vnc.html; then
    echo "VNC endpoint is reachable"
    exit 0
  fi
  sleep 2
done
echo "ERROR: VNC endpoint not reachable after 30s" >&2
systemctl status cmux-tigervnc.service --no-pager || true
systemctl status cmux-vnc-proxy.service --no-pager || true
systemctl status cmux-devtools.service --no-pager || true
tail -n 40 /var/log/cmux/chrome.log || true
tail -n 40 /var/log/cmux/tigervnc.log || true
tail -n 40 /var/log/cmux/vnc-proxy.log || true
exit 1
"#;

const CHECK_VNC_WEBSOCKET: &str = r#"python3 - <<'PY'
import base64
import os
import socket
import sys

host = "127.0.0.1"
port = 39380
path = "/websockify"

key = base64.b64encode(os.urandom(16)).decode()
request = (
    f"GET {path} HTTP/1.1\r\n"
    f"Host: {host}:{port}\r\n"
    "Upgrade: websocket\r\n"
    "Connection: Upgrade\r\n"
    f"Sec-WebSocket-Key: {key}\r\n"
    "Sec-WebSocket-Version: 13\r\n"
    "\r\n"
)

with socket.create_connection((host, port), timeout=5) as sock:
    sock.settimeout(5)
    sock.sendall(request.encode("ascii"))
    resp = sock.recv(1024).decode("latin1", "replace")

status_line = resp.splitlines()[0] if resp else ""
if not status_line.startswith("HTTP/1.1 101"):
    print(f"Unexpected websocket response: {status_line!r}", file=sys.stderr)
    sys.exit(1)
PY
"#;

const CHECK_DEVTOOLS: &str = r#"# Verify Chrome is installed
google-chrome --version

# Verify DevTools endpoint is accessible
sleep 5
for attempt in $(seq 1 45); do
  if curl -fsS -o /dev/null http://127.0.0.1:39381/json/version; then
    echo "DevTools endpoint is reachable"
    exit 0
  fi
  sleep 2
done
echo "ERROR: DevTools endpoint not reachable after 90s" >&2
systemctl status cmux-devtools.service --no-pager || true
systemctl status cmux-cdp-proxy.service --no-pager || true
ss -ltnp | grep 3938 || true
tail -n 100 /var/log/cmux/chrome.log || true
tail -n 40 /var/log/cmux/tigervnc.log || true
exit 1
"#;

const CHECK_WORKER: &str = r#"set -euo pipefail
for attempt in $(seq 1 30); do
  if systemctl is-active --quiet cmux-worker.service; then
    if health="$(curl -fsS http://127.0.0.1:39377/health)"; then
      printf '%s\n' "$health"
      exit 0
    fi
  fi
  sleep 2
done
echo "ERROR: cmux-worker service failed health check" >&2
systemctl status cmux-worker.service --no-pager || true
tail -n 80 /var/log/cmux/worker.log || true
exit 1
"#;

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("check-cargo")
            .deps(["install-rust-toolchain", "cleanup-build-artifacts"])
            .describe("Verify cargo is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-cargo", "PATH=/usr/local/cargo/bin:$PATH cargo --version")
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-node")
            .deps(["install-node-runtime", "cleanup-build-artifacts"])
            .describe("Verify node is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-node", "node --version").await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-bun")
            .deps(["install-bun", "cleanup-build-artifacts"])
            .describe("Verify bun is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-bun", "bun --version && bunx --version").await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-uv")
            .deps(["install-uv-python", "cleanup-build-artifacts"])
            .describe("Verify uv is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-uv", "uv --version && uvx --version").await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-gh")
            .deps(["install-base-packages", "cleanup-build-artifacts"])
            .describe("Verify GitHub CLI is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-gh", "gh --version").await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-envctl")
            .deps(["configure-envctl", "cleanup-build-artifacts"])
            .describe("Verify envctl is installed and working"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-envctl", "envctl --version && command -v envd")
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-ssh-service")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify SSH service is active"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-ssh-service", CHECK_SSH_SERVICE).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-vscode")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify VS Code endpoint is accessible"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-vscode", CHECK_VSCODE).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-vscode-via-proxy")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify VS Code endpoint is accessible through cmux-proxy"),
        |ctx: Arc<TaskContext>| async move {
            let log_file = match ctx.ide_provider {
                IdeProvider::Coder => "coder.log",
                IdeProvider::CmuxCode => "cmux-code.log",
                IdeProvider::Openvscode => "openvscode.log",
            };
            let cmd = format!(
                r#"for attempt in $(seq 1 15); do
  if curl -fsS -H 'X-Cmux-Port-Internal: 39378' http://127.0.0.1:39379/ >/dev/null; then
    echo "IDE endpoint is reachable via cmux-proxy"
    exit 0
  fi
  sleep 2
done
echo "ERROR: IDE endpoint via cmux-proxy not reachable after 30s" >&2
systemctl status cmux-proxy.service --no-pager || true
systemctl status cmux-ide.service --no-pager || true
tail -n 80 /var/log/cmux/cmux-proxy.log || true
tail -n 80 /var/log/cmux/{log_file} || true
exit 1
"#
            );
            ctx.run("check-vscode-via-proxy", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-pty")
            .deps(["install-systemd-units", "cleanup-build-artifacts"])
            .describe("Verify cmux-pty service is accessible"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-pty", CHECK_PTY).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-vnc")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify VNC packages and endpoint are accessible"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-vnc", CHECK_VNC).await?;
            ctx.run("check-vnc-websocket-upgrade", CHECK_VNC_WEBSOCKET)
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-devtools")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify Chrome browser and DevTools endpoint are accessible"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-devtools", CHECK_DEVTOOLS).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("check-worker")
            .deps(["configure-memory-protection", "cleanup-build-artifacts"])
            .describe("Verify worker service is running"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("check-worker", CHECK_WORKER).await?;
            Ok(())
        },
    )?;

    Ok(())
}
