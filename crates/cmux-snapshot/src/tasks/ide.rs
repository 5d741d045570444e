//! IDE server installation, extension preinstall, and agent CLIs.
//!
//! Exactly one of the three IDE install tasks does real work per run; the
//! other two short-circuit based on the provider carried in the context.

use crate::args::IdeProvider;
use crate::context::TaskContext;
use anyhow::{bail, Context as _};
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Pinned IDE dependencies: marketplace extensions and global CLI packages.
/// Lives at `configs/ide-deps.json` in the repo.
#[derive(Debug, Deserialize)]
pub struct IdeDeps {
    pub packages: BTreeMap<String, String>,
    pub extensions: Vec<ExtensionSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ExtensionSpec {
    pub publisher: String,
    pub name: String,
    pub version: String,
}

async fn load_ide_deps(repo_root: &Path) -> anyhow::Result<IdeDeps> {
    let path = repo_root.join("configs/ide-deps.json");
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let deps: IdeDeps = serde_json::from_str(&raw)
        .with_context(|| format!("invalid IDE dependency file at {}", path.display()))?;
    if deps.extensions.is_empty() {
        bail!("no extensions found in configs/ide-deps.json");
    }
    if deps.packages.is_empty() {
        bail!("no packages found in configs/ide-deps.json");
    }
    Ok(deps)
}

/// Filesystem layout of the selected IDE server on the image.
struct IdeLayout {
    server_root: &'static str,
    bin_path: &'static str,
    extensions_dir: &'static str,
    user_data_dir: &'static str,
}

fn ide_layout(provider: IdeProvider) -> IdeLayout {
    match provider {
        IdeProvider::Coder => IdeLayout {
            server_root: "/app/code-server",
            bin_path: "/app/code-server/bin/code-server",
            extensions_dir: "/root/.code-server/extensions",
            user_data_dir: "/root/.code-server",
        },
        IdeProvider::CmuxCode => IdeLayout {
            server_root: "/app/cmux-code",
            bin_path: "/app/cmux-code/bin/code-server-oss",
            extensions_dir: "/root/.vscode-server-oss/extensions",
            user_data_dir: "/root/.vscode-server-oss/data",
        },
        IdeProvider::Openvscode => IdeLayout {
            server_root: "/app/openvscode-server",
            bin_path: "/app/openvscode-server/bin/openvscode-server",
            extensions_dir: "/root/.openvscode-server/extensions",
            user_data_dir: "/root/.openvscode-server/data",
        },
    }
}

const INSTALL_OPENVSCODE: &str = r#"set -eux
CODE_RELEASE="$(curl -fsSL https://api.github.com/repos/gitpod-io/openvscode-server/releases/latest | jq -r '.tag_name' | sed 's|^openvscode-server-v||')"
arch="$(dpkg --print-architecture)"
case "${arch}" in
  amd64) ARCH="x64" ;;
  arm64) ARCH="arm64" ;;
  *) echo "Unsupported architecture ${arch}" >&2; exit 1 ;;
esac
mkdir -p /app/openvscode-server
url="https://github.com/gitpod-io/openvscode-server/releases/download/openvscode-server-v${CODE_RELEASE}/openvscode-server-v${CODE_RELEASE}-linux-${ARCH}.tar.gz"
curl -fSL --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/openvscode-server.tar.gz "${url}" || \
  curl -fSL4 --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/openvscode-server.tar.gz "${url}"
tar xf /tmp/openvscode-server.tar.gz -C /app/openvscode-server --strip-components=1
rm -f /tmp/openvscode-server.tar.gz
"#;

const INSTALL_CODER: &str = r#"set -eux
CODER_RELEASE="$(curl -fsSL https://api.github.com/repos/coder/code-server/releases/latest | jq -r '.tag_name' | sed 's|^v||')"
arch="$(dpkg --print-architecture)"
case "${arch}" in
  amd64) ARCH="amd64" ;;
  arm64) ARCH="arm64" ;;
  *) echo "Unsupported architecture ${arch}" >&2; exit 1 ;;
esac
mkdir -p /app/code-server
url="https://github.com/coder/code-server/releases/download/v${CODER_RELEASE}/code-server-${CODER_RELEASE}-linux-${ARCH}.tar.gz"
curl -fSL --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/code-server.tar.gz "${url}" || \
  curl -fSL4 --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/code-server.tar.gz "${url}"
tar xf /tmp/code-server.tar.gz -C /app/code-server --strip-components=1
rm -f /tmp/code-server.tar.gz

# Create code-server config directory and config.yaml
mkdir -p /root/.config/code-server
cat > /root/.config/code-server/config.yaml << 'EOF'
bind-addr: 0.0.0.0:39378
auth: none
cert: false
EOF

# Create code-server user settings
mkdir -p /root/.code-server/User
cat > /root/.code-server/User/settings.json << 'EOF'
{
  "workbench.startupEditor": "none",
  "security.workspace.trust.enabled": false,
  "editor.formatOnSave": true,
  "editor.formatOnSaveMode": "file",
  "files.autoSave": "afterDelay",
  "files.autoSaveDelay": 0
}
EOF
"#;

const INSTALL_CMUX_CODE: &str = r#"set -eux
CODE_RELEASE="$(curl -fsSL https://api.github.com/repos/manaflow-ai/vscode-1/releases/latest | jq -r '.tag_name' | sed 's|^v||')"
arch="$(dpkg --print-architecture)"
case "${arch}" in
  amd64) ARCH="x64" ;;
  arm64) ARCH="arm64" ;;
  *) echo "Unsupported architecture ${arch}" >&2; exit 1 ;;
esac
mkdir -p /app/cmux-code
url="https://github.com/manaflow-ai/vscode-1/releases/download/v${CODE_RELEASE}/vscode-server-linux-${ARCH}-web.tar.gz"
curl -fSL --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/cmux-code.tar.gz "${url}" || \
  curl -fSL4 --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o /tmp/cmux-code.tar.gz "${url}"
tar xf /tmp/cmux-code.tar.gz -C /app/cmux-code --strip-components=1
rm -f /tmp/cmux-code.tar.gz

# Create cmux-code user settings
mkdir -p /root/.vscode-server-oss/data/User
cat > /root/.vscode-server-oss/data/User/settings.json << 'EOF'
{
  "workbench.startupEditor": "none",
  "workbench.secondarySideBar.defaultVisibility": "hidden",
  "security.workspace.trust.enabled": false,
  "telemetry.telemetryLevel": "off",
  "update.mode": "none",
  "extensions.verifySignature": false,
  "editor.formatOnSave": true,
  "editor.formatOnSaveMode": "file",
  "files.autoSave": "afterDelay",
  "files.autoSaveDelay": 1000
}
EOF
"#;

const INSTALL_CURSOR: &str = r#"curl https://cursor.com/install -fsS | bash
/root/.local/bin/cursor-agent --version
"#;

fn install_extensions_script(layout: &IdeLayout, extensions: &[ExtensionSpec]) -> String {
    let extensions_blob = extensions
        .iter()
        .map(|ext| format!("{}|{}|{}", ext.publisher, ext.name, ext.version))
        .collect::<Vec<_>>()
        .join("\n");
    let IdeLayout {
        server_root,
        bin_path,
        extensions_dir,
        user_data_dir,
    } = layout;
    format!(
        r#"set -eux
export HOME=/root
server_root="{server_root}"
bin_path="{bin_path}"
if [ ! -x "${{bin_path}}" ]; then
  echo "IDE binary not found at ${{bin_path}}" >&2
  exit 1
fi
extensions_dir="{extensions_dir}"
user_data_dir="{user_data_dir}"
mkdir -p "${{extensions_dir}}" "${{user_data_dir}}"
cmux_vsix="/tmp/cmux-vscode-extension.vsix"
if [ ! -f "${{cmux_vsix}}" ]; then
  echo "cmux extension package missing at ${{cmux_vsix}}" >&2
  exit 1
fi
install_from_file() {{
  local package_path="$1"
  "${{bin_path}}" \
    --install-extension "${{package_path}}" \
    --force \
    --extensions-dir "${{extensions_dir}}" \
    --user-data-dir "${{user_data_dir}}"
}}
install_from_file "${{cmux_vsix}}"
rm -f "${{cmux_vsix}}"
download_dir="$(mktemp -d)"
cleanup() {{
  rm -rf "${{download_dir}}"
}}
trap cleanup EXIT
download_extension() {{
  local publisher="$1"
  local name="$2"
  local version="$3"
  local destination="$4"
  local tmpfile="${{destination}}.download"
  local curl_stderr="${{tmpfile}}.stderr"
  local url="https://marketplace.visualstudio.com/_apis/public/gallery/publishers/${{publisher}}/vsextensions/${{name}}/${{version}}/vspackage"
  local attempt=1
  local max_attempts=3
  while [ "${{attempt}}" -le "${{max_attempts}}" ]; do
    if curl -fSL --retry 6 --retry-all-errors --retry-delay 2 --connect-timeout 20 --max-time 600 -o "${{tmpfile}}" "${{url}}" 2>"${{curl_stderr}}"; then
      rm -f "${{curl_stderr}}"
      break
    fi
    echo "Download attempt ${{attempt}}/${{max_attempts}} failed for ${{publisher}}.${{name}}@${{version}}; retrying..." >&2
    if [ -s "${{curl_stderr}}" ]; then
      cat "${{curl_stderr}}" >&2
    fi
    rm -f "${{tmpfile}}"
    attempt=$((attempt + 1))
    sleep $((attempt * 2))
  done
  if [ "${{attempt}}" -gt "${{max_attempts}}" ]; then
    echo "Failed to download ${{publisher}}.${{name}}@${{version}} after ${{max_attempts}} attempts" >&2
    if [ -s "${{curl_stderr}}" ]; then
      cat "${{curl_stderr}}" >&2
    fi
    rm -f "${{curl_stderr}}"
    return 1
  fi
  if gzip -t "${{tmpfile}}" >/dev/null 2>&1; then
    gunzip -c "${{tmpfile}}" > "${{destination}}"
    rm -f "${{tmpfile}}"
  else
    mv "${{tmpfile}}" "${{destination}}"
  fi
}}
while IFS='|' read -r publisher name version; do
  [ -z "${{publisher}}" ] && continue
  download_extension "${{publisher}}" "${{name}}" "${{version}}" "${{download_dir}}/${{publisher}}.${{name}}.vsix" &
done <<'EXTENSIONS'
{extensions_blob}
EXTENSIONS
wait
set -- "${{download_dir}}"/*.vsix
for vsix in "$@"; do
  if [ -f "${{vsix}}" ]; then
    install_from_file "${{vsix}}"
  fi
done
"#
    )
}

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("install-openvscode")
            .deps(["apt-bootstrap"])
            .describe("Install OpenVSCode server"),
        |ctx: Arc<TaskContext>| async move {
            if ctx.ide_provider != IdeProvider::Openvscode {
                info!("skipping install-openvscode (IDE provider is not openvscode)");
                return Ok(());
            }
            ctx.run("install-openvscode", INSTALL_OPENVSCODE).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-coder")
            .deps(["apt-bootstrap"])
            .describe("Install Coder (code-server)"),
        |ctx: Arc<TaskContext>| async move {
            if ctx.ide_provider != IdeProvider::Coder {
                info!("skipping install-coder (IDE provider is not coder)");
                return Ok(());
            }
            ctx.run("install-coder", INSTALL_CODER).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-cmux-code")
            .deps(["apt-bootstrap"])
            .describe("Install Cmux Code (VSCode fork with OpenVSIX)"),
        |ctx: Arc<TaskContext>| async move {
            if ctx.ide_provider != IdeProvider::CmuxCode {
                info!("skipping install-cmux-code (IDE provider is not cmux-code)");
                return Ok(());
            }
            ctx.run("install-cmux-code", INSTALL_CMUX_CODE).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("package-vscode-extension")
            .deps(["install-repo-dependencies"])
            .describe("Package the cmux VS Code extension for installation"),
        |ctx: Arc<TaskContext>| async move {
            let repo = shlex::try_quote(&ctx.remote_repo_root)
                .map(|q| q.into_owned())
                .unwrap_or_else(|_| ctx.remote_repo_root.clone());
            let cmd = format!(
                r#"set -euo pipefail
export PATH="/usr/local/bin:$PATH"
cd {repo}/packages/vscode-extension
bun run package
latest_vsix="$(ls -1t cmux-vscode-extension-*.vsix 2>/dev/null | head -n 1)"
if [ -z "${{latest_vsix}}" ] || [ ! -f "${{latest_vsix}}" ]; then
  echo "cmux VS Code extension package not found" >&2
  exit 1
fi
install -Dm0644 "${{latest_vsix}}" /tmp/cmux-vscode-extension.vsix
"#
            );
            ctx.run("package-vscode-extension", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-ide-extensions")
            .deps([
                "install-openvscode",
                "install-coder",
                "install-cmux-code",
                "package-vscode-extension",
            ])
            .describe("Preinstall language extensions for the IDE"),
        |ctx: Arc<TaskContext>| async move {
            let deps = load_ide_deps(&ctx.repo_root).await?;
            let layout = ide_layout(ctx.ide_provider);
            let script = install_extensions_script(&layout, &deps.extensions);
            ctx.run("install-ide-extensions", script).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-cursor-cli")
            .deps(["apt-bootstrap"])
            .describe("Install Cursor CLI"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("install-cursor-cli", INSTALL_CURSOR).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-global-cli")
            .deps(["install-bun", "install-node-runtime"])
            .describe("Install global agent CLIs with bun"),
        |ctx: Arc<TaskContext>| async move {
            let deps = load_ide_deps(&ctx.repo_root).await?;
            let packages = deps
                .packages
                .iter()
                .map(|(name, version)| format!("{name}@{version}"))
                .collect::<Vec<_>>()
                .join(" ");
            ctx.run("install-global-cli", format!("bun add -g {packages}"))
                .await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("setup-claude-oauth-wrappers")
            .deps(["install-global-cli"])
            .describe("Create wrapper scripts for claude/npx/bunx to support OAuth token injection"),
        |ctx: Arc<TaskContext>| async move {
            // The wrapper script sources /etc/claude-code/env before running
            // claude-code so tokens can be injected at runtime.
            let script_path = ctx.repo_root.join("configs/setup-claude-oauth-wrappers.sh");
            let script = tokio::fs::read_to_string(&script_path)
                .await
                .with_context(|| format!("failed to read {}", script_path.display()))?;
            ctx.run("setup-claude-oauth-wrappers", script).await?;
            Ok(())
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_extensions() -> Vec<ExtensionSpec> {
        vec![
            ExtensionSpec {
                publisher: "rust-lang".to_string(),
                name: "rust-analyzer".to_string(),
                version: "0.3.2000".to_string(),
            },
            ExtensionSpec {
                publisher: "ms-python".to_string(),
                name: "python".to_string(),
                version: "2026.2.0".to_string(),
            },
        ]
    }

    #[test]
    fn extension_script_embeds_the_pin_list() {
        let layout = ide_layout(IdeProvider::CmuxCode);
        let script = install_extensions_script(&layout, &sample_extensions());
        assert!(script.contains("rust-lang|rust-analyzer|0.3.2000"));
        assert!(script.contains("ms-python|python|2026.2.0"));
        assert!(script.contains("/app/cmux-code/bin/code-server-oss"));
        assert!(script.contains("/root/.vscode-server-oss/extensions"));
        assert!(script.contains("marketplace.visualstudio.com"));
    }

    #[test]
    fn layouts_differ_per_provider() {
        assert_eq!(ide_layout(IdeProvider::Coder).server_root, "/app/code-server");
        assert_eq!(
            ide_layout(IdeProvider::Openvscode).bin_path,
            "/app/openvscode-server/bin/openvscode-server"
        );
        assert_eq!(
            ide_layout(IdeProvider::CmuxCode).user_data_dir,
            "/root/.vscode-server-oss/data"
        );
    }

    #[tokio::test]
    async fn ide_deps_parse_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(
            dir.path().join("configs/ide-deps.json"),
            r#"{
                "packages": {"@anthropic-ai/claude-code": "1.0.0"},
                "extensions": [
                    {"publisher": "rust-lang", "name": "rust-analyzer", "version": "0.3.2000"}
                ]
            }"#,
        )
        .unwrap();

        let deps = load_ide_deps(dir.path()).await.unwrap();
        assert_eq!(deps.packages.len(), 1);
        assert_eq!(deps.extensions[0].publisher, "rust-lang");
    }

    #[tokio::test]
    async fn empty_extension_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(
            dir.path().join("configs/ide-deps.json"),
            r#"{"packages": {"a": "1"}, "extensions": []}"#,
        )
        .unwrap();
        let err = load_ide_deps(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("no extensions"));
    }
}
