//! First-layer tasks: exec daemon install, cgroup configuration, apt
//! groundwork.

use crate::cgroup;
use crate::context::TaskContext;
use crate::execd;
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use std::sync::Arc;
use tracing::info;

const APT_BOOTSTRAP: &str = r#"set -eux

# Configure APT for parallel downloads (16 parallel to saturate 2gbps)
cat > /etc/apt/apt.conf.d/99parallel << 'EOF'
Acquire::Queue-Mode "host";
APT::Acquire::Max-Parallel-Downloads "16";
Acquire::http::Pipeline-Depth "10";
Acquire::https::Pipeline-Depth "10";
EOF

# Update and install core utilities needed for source setup
DEBIAN_FRONTEND=noninteractive apt-get update
DEBIAN_FRONTEND=noninteractive apt-get install -y \
    ca-certificates curl wget jq git gnupg lsb-release \
    tar unzip xz-utils zip bzip2 gzip htop lsof

# Setup GitHub CLI repository
install -m 0755 -d /usr/share/keyrings
curl -fsSL https://cli.github.com/packages/githubcli-archive-keyring.gpg \
    | dd of=/usr/share/keyrings/githubcli-archive-keyring.gpg
chmod go+r /usr/share/keyrings/githubcli-archive-keyring.gpg
arch="$(dpkg --print-architecture)"
echo "deb [arch=${arch} signed-by=/usr/share/keyrings/githubcli-archive-keyring.gpg] https://cli.github.com/packages stable main" \
    > /etc/apt/sources.list.d/github-cli.list

rm -rf /var/lib/apt/lists/*
"#;

const INSTALL_BASE_PACKAGES: &str = r#"set -eux

# Single apt-get update to pick up all configured sources
DEBIAN_FRONTEND=noninteractive apt-get update

# Install all packages in parallel in a single command
DEBIAN_FRONTEND=noninteractive apt-get install -y \
    build-essential make pkg-config g++ libssl-dev \
    ruby-full perl software-properties-common \
    tigervnc-standalone-server tigervnc-common \
    xvfb \
    x11-xserver-utils xterm novnc \
    dbus-x11 openbox \
    tmux \
    gh \
    zsh \
    zsh-autosuggestions \
    ripgrep ffmpeg xdotool


# Download and install Chrome
arch="$(dpkg --print-architecture)"
case "${arch}" in
  amd64)
    chrome_url="https://dl.google.com/linux/direct/google-chrome-stable_current_amd64.deb"
    ;;
  arm64)
    chrome_url="https://dl.google.com/linux/direct/google-chrome-stable_current_arm64.deb"
    ;;
  *)
    echo "Unsupported architecture: ${arch}" >&2
    exit 1
    ;;
esac
cd /tmp
curl -fsSL -o chrome.deb "${chrome_url}"
DEBIAN_FRONTEND=noninteractive apt-get install -y ./chrome.deb || true
DEBIAN_FRONTEND=noninteractive apt-get install -yf
rm -f chrome.deb

# Clean up
rm -rf /var/lib/apt/lists/*
"#;

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("build-setup-exec-binary").describe("Build and setup exec binary"),
        |ctx: Arc<TaskContext>| async move {
            info!("building exec binary");
            let binary_path = execd::build_exec_binary(&ctx.repo_root).await?;
            info!("setting up exec service at {}", ctx.exec_service_url);
            execd::setup_exec_service(&ctx, &binary_path, &ctx.exec_service_url).await?;
            info!("exec service setup complete");
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("configure-provisioning-cgroup").describe("Configure provisioning cgroup"),
        |ctx: Arc<TaskContext>| async move {
            let Some(profile) = ctx.resource_profile.clone() else {
                info!("resource profile not provided; skipping cgroup configuration");
                return Ok(());
            };
            ctx.run("configure-resource-cgroup", cgroup::configure_script(&profile))
                .await?;
            let verification = ctx
                .run("verify-resource-cgroup", cgroup::verify_script(&profile))
                .await?;
            if verification.stdout.trim() == "ready" {
                let path = profile.cgroup_path();
                info!("resource cgroup active at {path}");
                ctx.set_cgroup_path(path);
            } else {
                info!("cgroup controllers unavailable; continuing without resource isolation");
            }
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("apt-bootstrap")
            .describe("Install core apt utilities and set up package sources"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("apt-bootstrap", APT_BOOTSTRAP).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-base-packages")
            .deps(["apt-bootstrap"])
            .describe("Install build-essential tooling and utilities"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-base-packages", INSTALL_BASE_PACKAGES).await?;
            Ok(())
        },
    )?;

    Ok(())
}
