//! Repo upload and shell/desktop configuration.

use crate::archive;
use crate::context::TaskContext;
use cmux_taskgraph::{GraphResult, TaskRegistry, TaskSpec};
use std::sync::Arc;

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

const CONFIGURE_ZSH: &str = r#"set -eux
zsh_path="$(command -v zsh)"
if [ -z "${zsh_path}" ]; then
  echo "zsh not found" >&2
  exit 1
fi
current_shell="$(getent passwd root | cut -d: -f7 || true)"
if [ "${current_shell}" != "${zsh_path}" ]; then
  if command -v chsh >/dev/null 2>&1; then
    chsh -s "${zsh_path}" root
  else
    usermod -s "${zsh_path}" root
  fi
fi
mkdir -p /root
autosuggestions="/usr/share/zsh-autosuggestions/zsh-autosuggestions.zsh"
cat > /root/.zshrc <<EOF
export SHELL="${zsh_path}"
export PATH="/usr/local/bin:/usr/local/cargo/bin:\$HOME/.local/bin:\$HOME/.bun/bin:\$PATH"
export XDG_RUNTIME_DIR="/run/user/0"
export NVM_DIR="\$HOME/.nvm"
if [ -s /etc/profile.d/nvm.sh ]; then
  . /etc/profile.d/nvm.sh
fi

alias code='/usr/local/bin/code'
alias c='code'
alias g='git'

autoload -Uz colors vcs_info
colors
setopt PROMPT_SUBST

zstyle ':vcs_info:*' enable git
zstyle ':vcs_info:*' check-for-changes true
zstyle ':vcs_info:git*:*' formats '%F{yellow}git:%b%f'
zstyle ':vcs_info:git*:*' actionformats '%F{yellow}git:%b*%f'

precmd() {
  vcs_info
}

PROMPT='%F{cyan}%n%f %F{green}%~%f\${vcs_info_msg_0_:+ \${vcs_info_msg_0_}} %# '
EOF
if [ -f "${autosuggestions}" ]; then
  cat >> /root/.zshrc <<'EOF'

if [ -f "${autosuggestions}" ]; then
  source "${autosuggestions}"
  bindkey '^ ' autosuggest-accept
fi
EOF
fi
cat >> /root/.zshrc <<'EOF'
HISTFILE=~/.zsh_history
setopt HIST_IGNORE_DUPS HIST_VERIFY
EOF
cat > /root/.zprofile <<'EOF'
[[ -f ~/.zshrc ]] && source ~/.zshrc
EOF
mkdir -p /etc/profile.d
cat <<'EOF' > /etc/profile.d/cmux-paths.sh
export RUSTUP_HOME=/usr/local/rustup
export CARGO_HOME=/usr/local/cargo
export PATH="/usr/local/bin:/usr/local/cargo/bin:$HOME/.local/bin:$HOME/.bun/bin:$PATH"
EOF
if ! grep -q "alias g='git'" /root/.bashrc 2>/dev/null; then
  echo "alias g='git'" >> /root/.bashrc
fi
"#;

pub(super) fn register(registry: &mut TaskRegistry<TaskContext>) -> GraphResult<()> {
    registry.register(
        TaskSpec::new("upload-repo")
            .deps(["apt-bootstrap"])
            .describe("Upload repository to the instance"),
        |ctx: Arc<TaskContext>| async move { archive::upload_and_extract(&ctx).await },
    )?;

    registry.register(
        TaskSpec::new("install-repo-dependencies")
            .deps(["upload-repo", "install-bun", "install-node-runtime"])
            .describe("Install workspace dependencies via bun"),
        |ctx: Arc<TaskContext>| async move {
            let cmd = format!(
                "export PATH=\"/usr/local/bin:$PATH\"\ncd {}\nbun install --frozen-lockfile",
                quote(&ctx.remote_repo_root)
            );
            ctx.run("install-repo-dependencies", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-service-scripts")
            .deps(["upload-repo", "install-base-packages"])
            .describe("Install VNC startup script (includes Chrome DevTools)"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"install -d /usr/local/lib/cmux
install -m 0755 {repo}/configs/systemd/bin/cmux-start-chrome /usr/local/lib/cmux/cmux-start-chrome
install -m 0755 {repo}/configs/systemd/bin/cmux-manage-dockerd /usr/local/lib/cmux/cmux-manage-dockerd
install -m 0755 {repo}/configs/systemd/bin/cmux-stop-dockerd /usr/local/lib/cmux/cmux-stop-dockerd
install -m 0755 {repo}/configs/systemd/bin/cmux-configure-memory /usr/local/sbin/cmux-configure-memory
"#
            );
            ctx.run("install-service-scripts", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-prompt-wrapper")
            .deps(["upload-repo"])
            .describe("Install prompt-wrapper helper"),
        |ctx: Arc<TaskContext>| async move {
            let cmd = format!(
                "install -m 0755 {}/prompt-wrapper.sh /usr/local/bin/prompt-wrapper",
                quote(&ctx.remote_repo_root)
            );
            ctx.run("install-prompt-wrapper", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-tmux-conf")
            .deps(["upload-repo"])
            .describe("Install tmux configuration"),
        |ctx: Arc<TaskContext>| async move {
            let cmd = format!(
                "install -Dm0644 {}/configs/tmux.conf /etc/tmux.conf",
                quote(&ctx.remote_repo_root)
            );
            ctx.run("install-tmux-conf", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("install-collect-scripts")
            .deps(["upload-repo"])
            .describe("Install worker helper scripts"),
        |ctx: Arc<TaskContext>| async move {
            let repo = quote(&ctx.remote_repo_root);
            let cmd = format!(
                r#"install -Dm0755 {repo}/apps/worker/scripts/collect-relevant-diff.sh /usr/local/bin/cmux-collect-relevant-diff.sh
install -Dm0755 {repo}/apps/worker/scripts/collect-crown-diff.sh /usr/local/bin/cmux-collect-crown-diff.sh
"#
            );
            ctx.run("install-collect-scripts", cmd).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("configure-zsh")
            .deps(["install-base-packages"])
            .describe("Install zsh configuration and default prompt"),
        |ctx: Arc<TaskContext>| async move {
            ctx.run("configure-zsh", CONFIGURE_ZSH).await?;
            Ok(())
        },
    )?;

    registry.register(
        TaskSpec::new("configure-openbox")
            .deps(["upload-repo", "install-base-packages"])
            .describe("Install openbox configuration for desktop menu"),
        |ctx: Arc<TaskContext>| async move {
            let cmd = format!(
                "set -eux\nmkdir -p /root/.config/openbox\ninstall -Dm0644 {}/configs/openbox/menu.xml /root/.config/openbox/menu.xml",
                quote(&ctx.remote_repo_root)
            );
            ctx.run("configure-openbox", cmd).await?;
            Ok(())
        },
    )?;

    Ok(())
}
