//! Language runtimes and container engine.

use crate::context::TaskContext;
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use std::sync::Arc;

const ENSURE_DOCKER: &str = r#"set -euo pipefail

echo "[docker] ensuring Docker APT repository"
DEBIAN_FRONTEND=noninteractive apt-get update
DEBIAN_FRONTEND=noninteractive apt-get install -y ca-certificates curl
os_release="/etc/os-release"
if [ ! -f "$os_release" ]; then
  echo "Missing /etc/os-release; unable to determine distribution" >&2
  exit 1
fi
. "$os_release"
distro_codename="${UBUNTU_CODENAME:-${VERSION_CODENAME:-stable}}"
distro_id="${ID:-debian}"
case "$distro_id" in
  ubuntu|Ubuntu|UBUNTU)
    repo_id="ubuntu"
    ;;
  debian|Debian|DEBIAN)
    repo_id="debian"
    ;;
  *)
    echo "Unrecognized distro id '$distro_id'; defaulting to debian" >&2
    repo_id="debian"
    ;;
esac
install -m 0755 -d /etc/apt/keyrings
curl -fsSL "https://download.docker.com/linux/${repo_id}/gpg" -o /etc/apt/keyrings/docker.asc
chmod a+r /etc/apt/keyrings/docker.asc
printf 'deb [arch=%s signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/%s %s stable\n' \
  "$(dpkg --print-architecture)" "$repo_id" "$distro_codename" \
  > /etc/apt/sources.list.d/docker.list

echo "[docker] installing engine and CLI plugins"
DEBIAN_FRONTEND=noninteractive apt-get update
DEBIAN_FRONTEND=noninteractive apt-get install -y \
  docker-ce docker-ce-cli containerd.io docker-buildx-plugin docker-compose-plugin

systemctl enable docker.service
systemctl enable docker.socket || true
systemctl start docker.service

for attempt in $(seq 1 30); do
  if docker info >/dev/null 2>&1; then
    echo "[docker] daemon is ready"
    break
  fi
  if [ "$attempt" -eq 30 ]; then
    echo "[docker] daemon failed to start within expected window" >&2
    exit 1
  fi
  sleep 2
done

docker --version
docker compose version
docker buildx version
docker run --rm hello-world
"#;

const INSTALL_NODE: &str = r#"set -eux
NODE_VERSION="24.9.0"
arch="$(uname -m)"
case "${arch}" in
  x86_64) node_arch="x64" ;;
  aarch64|arm64) node_arch="arm64" ;;
  *) echo "Unsupported architecture: ${arch}" >&2; exit 1 ;;
esac
tmp_dir="$(mktemp -d)"
trap 'rm -rf "${tmp_dir}"' EXIT
cd "${tmp_dir}"
curl -fsSLO "https://nodejs.org/dist/v${NODE_VERSION}/node-v${NODE_VERSION}-linux-${node_arch}.tar.xz"
curl -fsSLO "https://nodejs.org/dist/v${NODE_VERSION}/SHASUMS256.txt"
grep " node-v${NODE_VERSION}-linux-${node_arch}.tar.xz$" SHASUMS256.txt | sha256sum -c -
tar -xJf "node-v${NODE_VERSION}-linux-${node_arch}.tar.xz" -C /usr/local --strip-components=1
cd /
ln -sf /usr/local/bin/node /usr/bin/node
ln -sf /usr/local/bin/npm /usr/bin/npm
ln -sf /usr/local/bin/npx /usr/bin/npx
ln -sf /usr/local/bin/corepack /usr/bin/corepack
npm install -g node-gyp
corepack enable
corepack prepare pnpm@10.14.0 --activate
"#;

const INSTALL_NVM: &str = r#"set -eux
export NVM_DIR="/root/.nvm"
mkdir -p "${NVM_DIR}"
curl -fsSL "https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/install.sh" | bash
cat <<'PROFILE' > /etc/profile.d/nvm.sh
export NVM_DIR="$HOME/.nvm"
[ -s "$NVM_DIR/nvm.sh" ] && . "$NVM_DIR/nvm.sh"
[ -s "$NVM_DIR/bash_completion" ] && . "$NVM_DIR/bash_completion"
PROFILE
bash -lc 'source /etc/profile.d/nvm.sh && nvm --version'
"#;

const INSTALL_BUN: &str = r#"curl -fsSL https://bun.sh/install | bash
install -m 0755 /root/.bun/bin/bun /usr/local/bin/bun
ln -sf /usr/local/bin/bun /usr/local/bin/bunx
bun --version
bunx --version
"#;

const INSTALL_GO: &str = r#"set -eux
GO_VERSION="1.25.2"
ARCH="$(uname -m)"
case "${ARCH}" in
  x86_64)
    GO_ARCH="amd64"
    ;;
  aarch64|arm64)
    GO_ARCH="arm64"
    ;;
  *)
    echo "Unsupported architecture for Go: ${ARCH}" >&2
    exit 1
    ;;
esac
TMP_DIR="$(mktemp -d)"
trap 'rm -rf "${TMP_DIR}"' EXIT
cd "${TMP_DIR}"
curl -fsSLo go.tar.gz "https://go.dev/dl/go${GO_VERSION}.linux-${GO_ARCH}.tar.gz"
rm -rf /usr/local/go
tar -C /usr/local -xzf go.tar.gz
install -d /usr/local/bin
install -d -m 0755 /usr/local/go-workspace/bin
install -d -m 0755 /usr/local/go-workspace/pkg/mod
install -d -m 0755 /usr/local/go-workspace/pkg/sumdb
install -d -m 0755 /usr/local/go-cache
ln -sf /usr/local/go/bin/go /usr/local/bin/go
ln -sf /usr/local/go/bin/gofmt /usr/local/bin/gofmt
/usr/local/go/bin/go version
"#;

const INSTALL_UV_PYTHON: &str = r#"set -eux
ARCH="$(uname -m)"
curl -LsSf https://astral.sh/uv/install.sh | sh
export PATH="${HOME}/.local/bin:/usr/local/cargo/bin:${PATH}"
uv python install --default
PIP_VERSION="$(curl -fsSL https://pypi.org/pypi/pip/json | jq -r '.info.version')"
python3 -m pip install --break-system-packages --upgrade "pip==${PIP_VERSION}"
ln -sf /usr/bin/python3 /usr/bin/python
"#;

const INSTALL_RUST: &str = r#"set -eux
export RUSTUP_HOME=/usr/local/rustup
export CARGO_HOME=/usr/local/cargo
install -d -m 0755 "${RUSTUP_HOME}" "${CARGO_HOME}"
install -d -m 0755 "${CARGO_HOME}/bin"
export PATH="${CARGO_HOME}/bin:${PATH}"
ARCH="$(uname -m)"
case "${ARCH}" in
  x86_64)
    RUST_HOST_TARGET="x86_64-unknown-linux-gnu"
    ;;
  aarch64|arm64)
    RUST_HOST_TARGET="aarch64-unknown-linux-gnu"
    ;;
  *)
    echo "Unsupported architecture: ${ARCH}" >&2
    exit 1
    ;;
esac
curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | \
  sh -s -- -y --no-modify-path --profile minimal
source "${CARGO_HOME}/env"
rustup component add rustfmt
rustup target add "${RUST_HOST_TARGET}"
rustup default stable
"#;

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("ensure-docker")
            .deps(["install-base-packages"])
            .describe("Install Docker engine and CLI plugins"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("ensure-docker-install", ENSURE_DOCKER).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-node-runtime")
            .deps(["install-base-packages"])
            .describe("Install Node.js runtime and pnpm via corepack"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-node-runtime", INSTALL_NODE).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-nvm")
            .deps(["install-node-runtime"])
            .describe("Install nvm for runtime use"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-nvm", INSTALL_NVM).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-bun")
            .deps(["install-base-packages"])
            .describe("Install Bun runtime"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-bun", INSTALL_BUN).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-go-toolchain")
            .deps(["install-base-packages"])
            .describe("Install Go toolchain for building cmux helpers"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-go-toolchain", INSTALL_GO).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-uv-python")
            .deps(["apt-bootstrap"])
            .describe("Install uv CLI and provision default Python runtime"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-uv-python", INSTALL_UV_PYTHON).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-rust-toolchain")
            .deps(["install-base-packages"])
            .describe("Install Rust toolchain via rustup"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-rust-toolchain", INSTALL_RUST).await?;
            Ok(())
        },
    )?;

    Ok(())
}
