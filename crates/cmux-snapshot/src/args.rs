//! CLI surface of the provisioner.

use clap::{Parser, ValueEnum};
use cmux_cloud::TtlAction;
use std::path::PathBuf;

/// Which IDE server the image ships. Selects which IDE task bodies are
/// active; the value travels in the task context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdeProvider {
    Coder,
    Openvscode,
    #[value(name = "cmux-code")]
    CmuxCode,
}

impl std::fmt::Display for IdeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdeProvider::Coder => write!(f, "coder"),
            IdeProvider::Openvscode => write!(f, "openvscode"),
            IdeProvider::CmuxCode => write!(f, "cmux-code"),
        }
    }
}

/// Provision Morph instances with parallel setup and snapshot each preset.
#[derive(Debug, Parser)]
#[command(name = "cmux-snapshot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision Morph VM snapshots for cmux workspace presets", long_about = None)]
pub struct Cli {
    /// Base snapshot id to boot from
    #[arg(long, default_value = "snapshot_3fjuvxbs")]
    pub snapshot_id: String,

    /// Repository root to upload (default: current directory)
    #[arg(long, default_value = ".")]
    pub repo_root: PathBuf,

    /// vCPU count for the standard preset
    #[arg(long, alias = "vcpus", default_value_t = 4)]
    pub standard_vcpus: u32,

    /// Memory (MiB) for the standard preset
    #[arg(long, alias = "memory", default_value_t = 16_384)]
    pub standard_memory: u64,

    /// Disk size (MiB) for the standard preset
    #[arg(long, alias = "disk-size", default_value_t = 49_152)]
    pub standard_disk_size: u64,

    /// vCPU count for the boosted preset
    #[arg(long, default_value_t = 8)]
    pub boosted_vcpus: u32,

    /// Memory (MiB) for the boosted preset
    #[arg(long, default_value_t = 32_768)]
    pub boosted_memory: u64,

    /// Disk size (MiB) for the boosted preset
    #[arg(long, default_value_t = 49_152)]
    pub boosted_disk_size: u64,

    /// TTL seconds for created instances
    #[arg(long, default_value_t = 3600)]
    pub ttl_seconds: u64,

    /// Action when TTL expires
    #[arg(long, default_value = "pause")]
    pub ttl_action: TtlAction,

    /// Print dependency graph and exit
    #[arg(long)]
    pub print_deps: bool,

    /// Require manual verification (VS Code/VNC) before snapshotting each preset
    #[arg(long)]
    pub require_verify: bool,

    /// IDE provider to install
    #[arg(long, value_enum, default_value_t = IdeProvider::CmuxCode)]
    pub ide_provider: IdeProvider,

    /// Update configs/ide-deps.json to latest versions before snapshotting
    #[arg(long, overrides_with = "no_bump_ide_deps")]
    pub bump_ide_deps: bool,

    /// Skip the host-side IDE dependency refresh
    #[arg(long)]
    pub no_bump_ide_deps: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    pub json: bool,
}

impl Cli {
    /// Effective bump toggle: on by default, disabled by
    /// `--no-bump-ide-deps`.
    pub fn bump_ide_deps_enabled(&self) -> bool {
        !self.no_bump_ide_deps
    }
}
