//! In-VM builds and systemd service wiring.

use crate::args::IdeProvider;
use crate::cleanup::cleanup_instance_disk;
use crate::context::TaskContext;
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use std::sync::Arc;
use std::time::Duration;

const CDP_PROXY_BINARY_NAME: &str = "cmux-cdp-proxy";
const VNC_PROXY_BINARY_NAME: &str = "cmux-vnc-proxy";

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// IDE-provider-specific systemd artifacts.
fn ide_unit_parts(provider: IdeProvider) -> (&'static str, &'static str, &'static str) {
    match provider {
        IdeProvider::Coder => ("cmux-coder.service", "configure-coder", "ide.env.coder"),
        IdeProvider::CmuxCode => (
            "cmux-cmux-code.service",
            "configure-cmux-code",
            "ide.env.cmux-code",
        ),
        IdeProvider::Openvscode => (
            "cmux-openvscode.service",
            "configure-openvscode",
            "ide.env.openvscode",
        ),
    }
}

const CONFIGURE_MEMORY_PROTECTION: &str = r#"set -euo pipefail
CMUX_FORCE_SWAP=1 CMUX_SWAPFILE_SIZE_GIB=6 /usr/local/sbin/cmux-configure-memory
expected_kib=$((6 * 1024 * 1024))
tolerance_kib=8
min_expected_kib=$((expected_kib - tolerance_kib))
actual_kib="$(awk '$1 == "/var/swap/cmux-swapfile" {print $3}' /proc/swaps 2>/dev/null || true)"
if [ -z "${actual_kib}" ]; then
    echo "Swapfile /var/swap/cmux-swapfile missing from /proc/swaps after configuration." >&2
    swapon --show=NAME,TYPE,SIZE,USED,PRIO || true
    exit 1
fi
case "${actual_kib}" in
    *[!0-9]*)
        echo "Swapfile size reported as '${actual_kib}' KiB; expected numeric value." >&2
        swapon --show=NAME,TYPE,SIZE,USED,PRIO || true
        exit 1
        ;;
esac
if [ "${actual_kib}" -lt "${min_expected_kib}" ]; then
    echo "Swapfile size ${actual_kib} KiB is below required ${min_expected_kib} KiB minimum (6 GiB minus tolerance)." >&2
    swapon --show=NAME,TYPE,SIZE,USED,PRIO || true
    exit 1
fi
if [ "${actual_kib}" -lt "${expected_kib}" ]; then
    echo "Swapfile size ${actual_kib} KiB slightly below nominal ${expected_kib} KiB target; continuing (within tolerance ${tolerance_kib} KiB)." >&2
fi
"#;

const CONFIGURE_ENVCTL: &str = r#"set -eux
envctl --version
envctl install-hook bash
envctl install-hook zsh
cat <<'PROFILE' > /root/.profile
if [ -n "${ZSH_VERSION:-}" ]; then
  if [ -f ~/.zshrc ]; then
    . ~/.zshrc
  fi
elif [ -n "${BASH_VERSION:-}" ]; then
  if [ -f ~/.bashrc ]; then
    . ~/.bashrc
  fi
elif [ -f ~/.bashrc ]; then
  . ~/.bashrc
fi
PROFILE
cat <<'PROFILE' > /root/.bash_profile
if [ -n "${ZSH_VERSION:-}" ]; then
  if [ -f ~/.zshrc ]; then
    . ~/.zshrc
  fi
elif [ -n "${BASH_VERSION:-}" ]; then
  if [ -f ~/.bashrc ]; then
    . ~/.bashrc
  fi
elif [ -f ~/.bashrc ]; then
  . ~/.bashrc
fi
PROFILE
mkdir -p /run/user/0
chmod 700 /run/user/0
if ! grep -q 'XDG_RUNTIME_DIR=/run/user/0' /root/.bashrc 2>/dev/null; then
  echo 'export XDG_RUNTIME_DIR=/run/user/0' >> /root/.bashrc
fi
if ! grep -q 'cmux-paths.sh' /root/.bashrc 2>/dev/null; then
  echo '[ -f /etc/profile.d/cmux-paths.sh ] && . /etc/profile.d/cmux-paths.sh' >> /root/.bashrc
fi
if ! grep -q 'nvm.sh' /root/.bashrc 2>/dev/null; then
  echo '[ -f /etc/profile.d/nvm.sh ] && . /etc/profile.d/nvm.sh' >> /root/.bashrc
fi
if ! grep -q 'XDG_RUNTIME_DIR=/run/user/0' /root/.zshrc 2>/dev/null; then
  echo 'export XDG_RUNTIME_DIR=/run/user/0' >> /root/.zshrc
fi
"#;

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("build-cdp-proxy")
            .deps(["install-service-scripts", "install-go-toolchain"])
            .describe("Build and install Chrome DevTools and VNC proxy binaries"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"set -euo pipefail
export PATH="/usr/local/go/bin:${{PATH}}"
install -d /usr/local/lib/cmux
cd {repo}/scripts/cdp-proxy
go build -trimpath -o /usr/local/lib/cmux/{CDP_PROXY_BINARY_NAME} .
if [ ! -x /usr/local/lib/cmux/{CDP_PROXY_BINARY_NAME} ]; then
  echo "Failed to build {CDP_PROXY_BINARY_NAME}" >&2
  exit 1
fi
cd {repo}/scripts/vnc-proxy
go build -trimpath -o /usr/local/lib/cmux/{VNC_PROXY_BINARY_NAME} .
if [ ! -x /usr/local/lib/cmux/{VNC_PROXY_BINARY_NAME} ]; then
  echo "Failed to build {VNC_PROXY_BINARY_NAME}" >&2
  exit 1
fi
"#
            );
            ctx.run("build-cdp-proxy", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-systemd-units")
            .deps([
                "upload-repo",
                "install-ide-extensions",
                "install-service-scripts",
                "build-worker",
                "build-cdp-proxy",
                "link-rust-binaries",
                "configure-zsh",
            ])
            .describe("Install cmux systemd units and helpers"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let (ide_service, ide_configure_script, ide_env_file) =
                ide_unit_parts(ctx.ide_provider);
            let cmd = format!(
                r#"set -euo pipefail

install -d /usr/local/lib/cmux
install -d /etc/cmux
install -Dm0644 {repo}/configs/systemd/cmux.target /usr/lib/systemd/system/cmux.target
install -Dm0644 {repo}/configs/systemd/{ide_service} /usr/lib/systemd/system/cmux-ide.service
install -Dm0644 {repo}/configs/systemd/cmux-worker.service /usr/lib/systemd/system/cmux-worker.service
install -Dm0644 {repo}/configs/systemd/cmux-proxy.service /usr/lib/systemd/system/cmux-proxy.service
install -Dm0644 {repo}/configs/systemd/cmux-dockerd.service /usr/lib/systemd/system/cmux-dockerd.service
install -Dm0644 {repo}/configs/systemd/cmux-devtools.service /usr/lib/systemd/system/cmux-devtools.service
install -Dm0644 {repo}/configs/systemd/cmux-xvfb.service /usr/lib/systemd/system/cmux-xvfb.service
install -Dm0644 {repo}/configs/systemd/cmux-tigervnc.service /usr/lib/systemd/system/cmux-tigervnc.service
install -Dm0644 {repo}/configs/systemd/cmux-openbox.service /usr/lib/systemd/system/cmux-openbox.service
install -Dm0644 {repo}/configs/systemd/cmux-vnc-proxy.service /usr/lib/systemd/system/cmux-vnc-proxy.service
install -Dm0644 {repo}/configs/systemd/cmux-cdp-proxy.service /usr/lib/systemd/system/cmux-cdp-proxy.service
install -Dm0644 {repo}/configs/systemd/cmux-pty.service /usr/lib/systemd/system/cmux-pty.service
install -Dm0644 {repo}/configs/systemd/cmux-memory-setup.service /usr/lib/systemd/system/cmux-memory-setup.service
install -Dm0755 {repo}/configs/systemd/bin/{ide_configure_script} /usr/local/lib/cmux/{ide_configure_script}
install -Dm0644 {repo}/configs/systemd/{ide_env_file} /etc/cmux/ide.env
install -Dm0755 {repo}/configs/systemd/bin/code /usr/local/bin/code
touch /usr/local/lib/cmux/dockerd.flag
mkdir -p /var/log/cmux
mkdir -p /root/workspace
mkdir -p /etc/systemd/system/multi-user.target.wants
mkdir -p /etc/systemd/system/cmux.target.wants
mkdir -p /etc/systemd/system/swap.target.wants
ln -sf /usr/lib/systemd/system/cmux.target /etc/systemd/system/multi-user.target.wants/cmux.target
ln -sf /usr/lib/systemd/system/cmux-ide.service /etc/systemd/system/cmux.target.wants/cmux-ide.service
ln -sf /usr/lib/systemd/system/cmux-worker.service /etc/systemd/system/cmux.target.wants/cmux-worker.service
ln -sf /usr/lib/systemd/system/cmux-proxy.service /etc/systemd/system/cmux.target.wants/cmux-proxy.service
ln -sf /usr/lib/systemd/system/cmux-dockerd.service /etc/systemd/system/cmux.target.wants/cmux-dockerd.service
ln -sf /usr/lib/systemd/system/cmux-devtools.service /etc/systemd/system/cmux.target.wants/cmux-devtools.service
ln -sf /usr/lib/systemd/system/cmux-tigervnc.service /etc/systemd/system/cmux.target.wants/cmux-tigervnc.service
ln -sf /usr/lib/systemd/system/cmux-openbox.service /etc/systemd/system/cmux.target.wants/cmux-openbox.service
ln -sf /usr/lib/systemd/system/cmux-vnc-proxy.service /etc/systemd/system/cmux.target.wants/cmux-vnc-proxy.service
ln -sf /usr/lib/systemd/system/cmux-cdp-proxy.service /etc/systemd/system/cmux.target.wants/cmux-cdp-proxy.service
ln -sf /usr/lib/systemd/system/cmux-pty.service /etc/systemd/system/cmux.target.wants/cmux-pty.service
ln -sf /usr/lib/systemd/system/cmux-memory-setup.service /etc/systemd/system/multi-user.target.wants/cmux-memory-setup.service
ln -sf /usr/lib/systemd/system/cmux-memory-setup.service /etc/systemd/system/swap.target.wants/cmux-memory-setup.service
{{ systemctl daemon-reload || true; }}
{{ systemctl enable cmux.target || true; }}
chown root:root /usr/local
chown root:root /usr/local/bin
chmod 0755 /usr/local
chmod 0755 /usr/local/bin
if [ -f /usr/local/bin/fetch-mmds-keys ]; then
    chown root:root /usr/local/bin/fetch-mmds-keys
    chmod 0755 /usr/local/bin/fetch-mmds-keys
fi
{{ systemctl restart ssh || true; }}
{{ systemctl is-active --quiet ssh || true; }}
# Use explicit true exit to ensure || true works with envctl debug trap
{{ systemctl start cmux.target 2>/dev/null || true; }}
"#
            );
            ctx.run("install-systemd-units", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("configure-memory-protection")
            .deps(["install-systemd-units"])
            .describe("Configure swapfile and systemd resource protections"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("configure-memory-protection", CONFIGURE_MEMORY_PROTECTION)
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("build-worker")
            .deps(["install-repo-dependencies"])
            .describe("Build worker bundle and install helper scripts"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"set -euo pipefail
export PATH="/usr/local/bin:$PATH"
cd {repo}
bun build ./apps/worker/src/index.ts \
  --target node \
  --outdir ./apps/worker/build \
  --external @cmux/convex \
  --external 'node:*'
if [ ! -f ./apps/worker/build/index.js ]; then
  echo "Worker build output missing at ./apps/worker/build/index.js" >&2
  exit 1
fi
install -d /builtins
cat <<'JSON' > /builtins/package.json
{{"name":"builtins","type":"module","version":"1.0.0"}}
JSON
rm -rf /builtins/build
cp -r ./apps/worker/build /builtins/build
install -Dm0755 ./apps/worker/wait-for-docker.sh /usr/local/bin/wait-for-docker.sh
"#
            );
            ctx.run("build-worker", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("build-rust-binaries")
            .deps(["upload-repo", "install-rust-toolchain"])
            .describe("Build Rust binaries with a shared target dir"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"set -euo pipefail
export RUSTUP_HOME=/usr/local/rustup
export CARGO_HOME=/usr/local/cargo
export CARGO_TARGET_DIR={repo}/target
export PATH="${{CARGO_HOME}}/bin:$PATH"
export CARGO_BUILD_JOBS="$(nproc)"
cargo build --locked --release --manifest-path {repo}/crates/cmux-env/Cargo.toml
cargo build --locked --release --manifest-path {repo}/crates/cmux-proxy/Cargo.toml
cargo build --locked --release --manifest-path {repo}/crates/cmux-pty/Cargo.toml
"#
            );
            ctx.run_with_timeout("build-rust-binaries", cmd, Some(Duration::from_secs(60 * 30)))
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("link-rust-binaries")
            .deps(["build-rust-binaries"])
            .describe("Symlink built Rust binaries into /usr/local/bin"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"install -m 0755 {repo}/target/release/envd /usr/local/bin/envd
install -m 0755 {repo}/target/release/envctl /usr/local/bin/envctl
install -m 0755 {repo}/target/release/cmux-proxy /usr/local/bin/cmux-proxy
install -m 0755 {repo}/target/release/cmux-pty /usr/local/bin/cmux-pty
"#
            );
            ctx.run("link-rust-binaries", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("configure-envctl")
            .deps(["link-rust-binaries", "configure-zsh"])
            .describe("Configure envctl defaults"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("configure-envctl", CONFIGURE_ENVCTL).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("cleanup-build-artifacts")
            .deps([
                "configure-memory-protection",
                "configure-envctl",
                "configure-openbox",
                "install-prompt-wrapper",
                "install-tmux-conf",
                "install-collect-scripts",
                "setup-claude-oauth-wrappers",
            ])
            .describe("Remove repository upload and toolchain caches prior to final validation"),
        |ctx: Arc<TaskContext>| async move { cleanup_instance_disk(&ctx).await },
    )?;

    Ok(())
}
