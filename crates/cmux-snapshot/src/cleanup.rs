//! Pre-snapshot disk cleanup and usage reporting.

use crate::context::TaskContext;
use tracing::info;

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Remove the uploaded repo and all toolchain caches, re-creating the cache
/// directories empty with mode 0755 so the snapshot stays lean but usable.
pub fn cleanup_script(remote_repo_root: &str, remote_repo_tar: &str) -> String {
    let repo = quote(remote_repo_root);
    let tar_path = quote(remote_repo_tar);
    format!(
        r#"set -euo pipefail
rm -rf {repo}
rm -f {tar_path}
if [ -d /usr/local/cargo ]; then
    rm -rf /usr/local/cargo/registry
    rm -rf /usr/local/cargo/git
    install -d -m 0755 /usr/local/cargo/registry
    install -d -m 0755 /usr/local/cargo/git
fi
if [ -d /usr/local/rustup ]; then
    rm -rf /usr/local/rustup/tmp
    rm -rf /usr/local/rustup/downloads
    install -d -m 0755 /usr/local/rustup/tmp
    install -d -m 0755 /usr/local/rustup/downloads
fi
if [ -d /root/.cache ]; then
    rm -rf /root/.cache/go-build
    rm -rf /root/.cache/pip
    rm -rf /root/.cache/uv
    rm -rf /root/.cache/bun
fi
if [ -d /root/.bun ]; then
    rm -rf /root/.bun/install/cache
fi
rm -rf /root/.npm
rm -rf /root/.pnpm-store
rm -rf /root/go
rm -rf /usr/local/go-workspace/bin
rm -rf /usr/local/go-workspace/pkg/mod
rm -rf /usr/local/go-workspace/pkg/sumdb
rm -rf /usr/local/go-cache
install -d -m 0755 /root/.cache
install -d -m 0755 /root/.cache/go-build
install -d -m 0755 /root/.cache/pip
install -d -m 0755 /root/.cache/uv
install -d -m 0755 /root/.cache/bun
install -d -m 0755 /usr/local/go-workspace
install -d -m 0755 /usr/local/go-workspace/bin
install -d -m 0755 /usr/local/go-workspace/pkg/mod
install -d -m 0755 /usr/local/go-workspace/pkg/sumdb
install -d -m 0755 /usr/local/go-cache
if [ -d /var/cache/apt ]; then
    rm -rf /var/cache/apt/archives/*.deb
    rm -rf /var/cache/apt/archives/partial
    install -d -m 0755 /var/cache/apt/archives/partial
fi
if [ -d /var/lib/apt/lists ]; then
    find /var/lib/apt/lists -mindepth 1 -maxdepth 1 -type f -delete
    rm -rf /var/lib/apt/lists/partial
    install -d -m 0755 /var/lib/apt/lists/partial
fi"#
    )
}

/// Run the disk cleanup against the instance.
pub async fn cleanup_instance_disk(ctx: &TaskContext) -> anyhow::Result<()> {
    info!("cleaning up build artifacts before snapshot");
    let script = cleanup_script(&ctx.remote_repo_root, &ctx.remote_repo_tar);
    ctx.run("cleanup-disk-artifacts", script).await?;
    Ok(())
}

/// Log a disk usage summary for the filesystem and key directories.
pub async fn report_disk_usage(ctx: &TaskContext) -> anyhow::Result<()> {
    info!("collecting disk usage statistics");
    let script = r#"set -euo pipefail
echo "==== Disk usage (df -h /) ===="
df -h /
echo
echo "==== Key directories ===="
for path in /var/swap /cmux /usr/local /usr/local/go-workspace /usr/local/cargo /root; do
    if [ -e "$path" ]; then
        du -sh "$path" 2>/dev/null || true
    fi
done
echo"#;
    ctx.run("disk-usage-summary", script).await?;
    Ok(())
}
