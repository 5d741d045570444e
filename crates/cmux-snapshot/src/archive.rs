//! Repository archive creation and upload.
//!
//! The repo is shipped to the VM as one uncompressed tar of git-tracked
//! files (cached + untracked, ignores excluded). When git is unavailable a
//! filesystem walk stands in, skipping anything under a `.git` segment.

use crate::context::TaskContext;
use anyhow::{bail, Context as _};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Enumerate repo files relative to `repo_root`.
pub fn list_repo_files(repo_root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let candidates = [
        std::env::var("GIT_EXE").ok(),
        std::env::var("GIT_BINARY").ok(),
        Some("git".to_string()),
    ];

    let mut errors: Vec<String> = Vec::new();
    let mut spawned_any = false;
    for candidate in candidates.iter().flatten() {
        let output = match std::process::Command::new(candidate)
            .args(["ls-files", "--cached", "--others", "--exclude-standard", "-z"])
            .current_dir(repo_root)
            .env("LC_ALL", "C")
            .output()
        {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                errors.push(format!("{candidate}: not found"));
                continue;
            }
            Err(err) => {
                spawned_any = true;
                errors.push(format!("{candidate}: {err}"));
                continue;
            }
        };
        spawned_any = true;
        if output.status.success() {
            let listing = String::from_utf8_lossy(&output.stdout);
            return Ok(listing
                .split('\0')
                .filter(|entry| !entry.is_empty())
                .map(PathBuf::from)
                .collect());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        errors.push(if stderr.trim().is_empty() {
            format!("{candidate}: exit code {:?}", output.status.code())
        } else {
            stderr.trim().to_string()
        });
    }

    if spawned_any {
        bail!("git ls-files failed: {}", errors.join("; "));
    }

    // No usable git binary at all: walk the tree.
    debug!("git unavailable, walking the filesystem instead");
    let mut files = Vec::new();
    walk(repo_root, repo_root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path
            .components()
            .any(|component| component.as_os_str() == ".git")
        {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, files)?;
        } else if path.is_file() {
            files.push(
                path.strip_prefix(root)
                    .unwrap_or(path.as_path())
                    .to_path_buf(),
            );
        }
    }
    Ok(())
}

/// Write an uncompressed tar of the repo to a temp file. Entries use their
/// repo-relative paths; files that vanish between listing and archiving are
/// skipped.
pub fn create_repo_archive_sync(repo_root: &Path) -> anyhow::Result<NamedTempFile> {
    let files = list_repo_files(repo_root)?;
    let tmp = tempfile::Builder::new()
        .prefix("cmux-repo-")
        .suffix(".tar")
        .tempfile()
        .context("creating archive temp file")?;

    let mut builder = tar::Builder::new(tmp.reopen().context("reopening archive temp file")?);
    for rel_path in files {
        let full_path = repo_root.join(&rel_path);
        if !full_path.exists() {
            continue;
        }
        builder
            .append_path_with_name(&full_path, &rel_path)
            .with_context(|| format!("archiving {}", rel_path.display()))?;
    }
    builder.finish().context("finalizing repo archive")?;
    Ok(tmp)
}

/// Blocking-thread wrapper around [`create_repo_archive_sync`].
pub async fn create_repo_archive(repo_root: PathBuf) -> anyhow::Result<NamedTempFile> {
    tokio::task::spawn_blocking(move || create_repo_archive_sync(&repo_root))
        .await
        .context("archive task aborted")?
}

/// Upload the archive and unpack it at the remote repo root. The local temp
/// file is removed on all exit paths (temp file drop).
pub async fn upload_and_extract(ctx: &TaskContext) -> anyhow::Result<()> {
    let archive = create_repo_archive(ctx.repo_root.clone()).await?;
    ctx.instance
        .upload(archive.path(), &ctx.remote_repo_tar)
        .await
        .context("uploading repo archive")?;

    let quote = |s: &str| {
        shlex::try_quote(s)
            .map(|q| q.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    let root = quote(&ctx.remote_repo_root);
    let tar_path = quote(&ctx.remote_repo_tar);
    let extract = format!(
        "rm -rf {root}\nmkdir -p {root}\ntar -xf {tar_path} -C {root}\nrm -f {tar_path}"
    );
    ctx.run("extract-repo", extract).await?;
    Ok(())
}
