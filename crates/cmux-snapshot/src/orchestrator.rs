//! Preset-parallel provisioning pipeline.
//!
//! Per preset: boot -> expose -> task graph -> verify -> cleanup ->
//! snapshot. Presets run concurrently and fail independently; successful
//! results are merged into the manifest in declaration order and written
//! once.

use crate::args::{Cli, IdeProvider};
use crate::cgroup::build_resource_profile;
use crate::cleanup::{cleanup_instance_disk, report_disk_usage};
use crate::context::TaskContext;
use crate::execd::EXEC_HTTP_PORT;
use crate::notify;
use crate::presets::{build_preset_plans, SnapshotPresetPlan};
use crate::report::render_verification_table;
use crate::tasks;
use crate::verify::verify_devtools_via_exposed_url;
use anyhow::{bail, Context as _};
use cmux_cloud::{BootSpec, CloudClient, InstanceHandle, TtlAction};
use cmux_manifest::{iso_timestamp_now, load_manifest, write_manifest};
use cmux_taskgraph::{format_dependency_graph, run_task_graph, TaskRegistry};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub const WORKER_HTTP_PORT: u16 = 39377;
pub const VSCODE_HTTP_PORT: u16 = 39378;
pub const PROXY_HTTP_PORT: u16 = 39379;
pub const VNC_HTTP_PORT: u16 = 39380;
pub const CDP_HTTP_PORT: u16 = 39381;
pub const XTERM_HTTP_PORT: u16 = 39383;

/// TTL applied to surviving instances after a successful non-verify run so
/// operators can still attach briefly.
const POST_SNAPSHOT_TTL_SECONDS: u64 = 600;

/// Outcome of one preset's provisioning run.
#[derive(Debug, Clone)]
pub struct SnapshotRunResult {
    pub preset: SnapshotPresetPlan,
    pub snapshot_id: String,
    pub captured_at: String,
    pub vscode_url: String,
    pub vnc_url: String,
    pub instance_id: String,
}

/// Run-wide configuration distilled from the CLI.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_snapshot_id: String,
    pub repo_root: PathBuf,
    pub manifest_path: PathBuf,
    pub ttl_seconds: u64,
    pub ttl_action: TtlAction,
    pub require_verify: bool,
    pub ide_provider: IdeProvider,
    pub bump_ide_deps: bool,
    /// Probe the CDP endpoint through the public URL after provisioning.
    /// Always on for real runs; fakes have no reachable URL.
    pub probe_devtools: bool,
    pub presets: Vec<SnapshotPresetPlan>,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        let repo_root = cli.repo_root.clone();
        Self {
            base_snapshot_id: cli.snapshot_id.clone(),
            manifest_path: repo_root.join("packages/shared/src/morph-snapshots.json"),
            repo_root,
            ttl_seconds: cli.ttl_seconds,
            ttl_action: cli.ttl_action,
            require_verify: cli.require_verify,
            ide_provider: cli.ide_provider,
            bump_ide_deps: cli.bump_ide_deps_enabled(),
            probe_devtools: true,
            presets: build_preset_plans(cli),
        }
    }
}

/// Expose the standard cmux HTTP service ports concurrently; returns
/// port -> public URL.
pub async fn expose_standard_ports(
    instance: &Arc<dyn InstanceHandle>,
) -> anyhow::Result<HashMap<u16, String>> {
    let ports = [
        EXEC_HTTP_PORT,
        WORKER_HTTP_PORT,
        VSCODE_HTTP_PORT,
        PROXY_HTTP_PORT,
        XTERM_HTTP_PORT,
        VNC_HTTP_PORT,
        CDP_HTTP_PORT,
    ];
    info!("exposing standard HTTP services");
    let exposures = ports.map(|port| {
        let instance = Arc::clone(instance);
        async move {
            let url = instance
                .expose_http_service(&format!("port-{port}"), port)
                .await?;
            Ok::<(u16, String), cmux_cloud::CloudError>((port, url))
        }
    });
    let exposed = futures::future::try_join_all(exposures).await?;
    let mut mapping = HashMap::new();
    for (port, url) in exposed {
        info!("exposed port {port} -> {url}");
        mapping.insert(port, url);
    }
    Ok(mapping)
}

async fn prompt_verification(preset_id: &str, vscode_url: &str, vnc_url: &str) -> anyhow::Result<()> {
    println!("\nVerify preset {preset_id} (VS Code: {vscode_url}, VNC: {vnc_url})");
    println!("Press Enter after verification to proceed with snapshotting.");
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(drop)
    })
    .await
    .context("verification prompt aborted")?
    .context("reading verification confirmation")?;
    Ok(())
}

async fn provision_and_snapshot_for_preset(
    config: Arc<RunConfig>,
    preset: SnapshotPresetPlan,
    client: Arc<dyn CloudClient>,
    registry: Arc<TaskRegistry<TaskContext>>,
    started_instances: Arc<Mutex<Vec<Arc<dyn InstanceHandle>>>>,
    show_dependency_graph: bool,
) -> anyhow::Result<SnapshotRunResult> {
    println!(
        "\n=== Provisioning preset {} ({}) ===",
        preset.preset_id, preset.label
    );

    let instance = client
        .boot(&BootSpec {
            snapshot_id: config.base_snapshot_id.clone(),
            vcpus: preset.vcpus,
            memory_mib: preset.memory_mib,
            disk_size_mib: preset.disk_size_mib,
            ttl_seconds: config.ttl_seconds,
            ttl_action: config.ttl_action,
        })
        .await
        .context("booting instance from base snapshot")?;
    instance.set_wake_on(true).await?;
    started_instances.lock().unwrap().push(Arc::clone(&instance));

    info!("waiting for instance {} to become ready", instance.id());
    instance.wait_until_ready().await?;
    println!(
        "[{}] Dashboard: https://cloud.morph.so/web/instances/{}?ssh=true",
        preset.preset_id,
        instance.id()
    );

    let port_map = expose_standard_ports(&instance).await?;
    let exec_service_url = port_map
        .get(&EXEC_HTTP_PORT)
        .context("failed to expose exec service port on primary instance")?
        .clone();

    let resource_profile = build_resource_profile(preset.vcpus, preset.memory_mib);
    let ctx = Arc::new(TaskContext::new(
        Arc::clone(&instance),
        config.repo_root.clone(),
        exec_service_url,
        Some(resource_profile),
        config.ide_provider,
    ));

    run_task_graph(registry.as_ref(), Arc::clone(&ctx), ctx.timings.as_ref()).await?;

    if config.probe_devtools {
        let cdp_url = port_map
            .get(&CDP_HTTP_PORT)
            .context("failed to expose DevTools service URL")?;
        verify_devtools_via_exposed_url(cdp_url).await?;
    }

    if show_dependency_graph {
        let graph = format_dependency_graph(registry.as_ref());
        if !graph.is_empty() {
            println!("\nDependency Graph");
            println!("{graph}");
        }
    }

    let entries = ctx.timings.entries();
    if !entries.is_empty() {
        println!("\nTiming Summary");
        for line in ctx.timings.summary().render(&entries) {
            println!("{line}");
        }
    }

    report_disk_usage(&ctx).await?;

    let vscode_url = port_map
        .get(&VSCODE_HTTP_PORT)
        .context("failed to expose VS Code service URL")?
        .clone();
    let vnc_url = format!(
        "{}/vnc.html",
        port_map
            .get(&VNC_HTTP_PORT)
            .context("failed to expose VNC service URL")?
            .trim_end_matches('/')
    );
    println!("[{}] VS Code: {vscode_url}", preset.preset_id);
    println!("[{}] VNC: {vnc_url}", preset.preset_id);

    notify::send_macos_notification(
        &format!("Verify cmux workspace – {}", preset.label),
        &format!("VS Code: {vscode_url} / VNC: {vnc_url}"),
    )
    .await;

    if config.require_verify {
        prompt_verification(&preset.preset_id, &vscode_url, &vnc_url).await?;
    }

    cleanup_instance_disk(&ctx).await?;
    info!("snapshotting instance {}", instance.id());
    let snapshot = instance.snapshot().await.context("snapshot call failed")?;
    let captured_at = iso_timestamp_now();

    println!(
        "[{}] Snapshot created: {} (instance {})",
        preset.preset_id,
        snapshot.id,
        instance.id()
    );

    Ok(SnapshotRunResult {
        preset,
        snapshot_id: snapshot.id,
        captured_at,
        vscode_url,
        vnc_url,
        instance_id: instance.id().to_string(),
    })
}

/// Host-side dependency refresh: `bun run bump-ide-deps` in the repo root.
async fn bump_ide_deps(repo_root: &std::path::Path) -> anyhow::Result<()> {
    println!("Bumping IDE deps to latest (bun run bump-ide-deps)...");
    let status = tokio::process::Command::new("bun")
        .args(["run", "bump-ide-deps"])
        .current_dir(repo_root)
        .status()
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => anyhow::anyhow!(
                "bun not found on host; install bun or rerun with --no-bump-ide-deps"
            ),
            _ => anyhow::Error::new(err).context("spawning bun run bump-ide-deps"),
        })?;
    if !status.success() {
        bail!(
            "bun run bump-ide-deps failed with exit code {:?}",
            status.code()
        );
    }
    Ok(())
}

/// Schedule every preset, await them all, and persist the manifest.
///
/// One preset's failure does not cancel its siblings; successful results
/// are still recorded, and the overall run fails afterwards.
pub async fn provision_and_snapshot(
    config: RunConfig,
    client: Arc<dyn CloudClient>,
) -> anyhow::Result<Vec<SnapshotRunResult>> {
    let registry = Arc::new(tasks::build_registry()?);
    provision_and_snapshot_with_registry(config, client, registry).await
}

/// Like [`provision_and_snapshot`] with an explicit task registry.
pub async fn provision_and_snapshot_with_registry(
    config: RunConfig,
    client: Arc<dyn CloudClient>,
    registry: Arc<TaskRegistry<TaskContext>>,
) -> anyhow::Result<Vec<SnapshotRunResult>> {
    let config = Arc::new(config);
    let now = iso_timestamp_now();
    let mut manifest = load_manifest(&config.manifest_path, &now)?;

    if config.bump_ide_deps {
        bump_ide_deps(&config.repo_root).await?;
    }

    println!(
        "Starting snapshot runs for presets {} from base snapshot {} (IDE provider: {})",
        config
            .presets
            .iter()
            .map(|plan| plan.preset_id.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        config.base_snapshot_id,
        config.ide_provider
    );

    let started_instances: Arc<Mutex<Vec<Arc<dyn InstanceHandle>>>> =
        Arc::new(Mutex::new(Vec::new()));

    if config.require_verify {
        // Interrupted verify runs must not leak instances; the TTL only
        // covers the non-verify mode.
        let started = Arc::clone(&started_instances);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let instances: Vec<_> = started.lock().unwrap().drain(..).collect();
                for instance in instances {
                    warn!("stopping instance {} after interrupt", instance.id());
                    if let Err(err) = instance.stop().await {
                        error!("failed to stop instance {}: {err}", instance.id());
                    }
                }
                std::process::exit(1);
            }
        });
    }

    let mut join_set: JoinSet<(usize, anyhow::Result<SnapshotRunResult>)> = JoinSet::new();
    for (index, preset) in config.presets.iter().cloned().enumerate() {
        let config = Arc::clone(&config);
        let client = Arc::clone(&client);
        let registry = Arc::clone(&registry);
        let started = Arc::clone(&started_instances);
        join_set.spawn(async move {
            let result = provision_and_snapshot_for_preset(
                config,
                preset,
                client,
                registry,
                started,
                index == 0,
            )
            .await;
            (index, result)
        });
    }

    let mut outcomes: Vec<(usize, anyhow::Result<SnapshotRunResult>)> = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        outcomes.push(joined.context("preset task aborted")?);
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut results: Vec<SnapshotRunResult> = Vec::new();
    let mut failures: Vec<(String, anyhow::Error)> = Vec::new();
    for (index, outcome) in outcomes {
        let preset_id = config
            .presets
            .get(index)
            .map(|plan| plan.preset_id.clone())
            .unwrap_or_default();
        match outcome {
            Ok(result) => results.push(result),
            Err(err) => {
                error!("[{preset_id}] provisioning failed: {err:#}");
                failures.push((preset_id, err));
            }
        }
    }

    if !config.require_verify {
        for result in &results {
            match client.get_instance(&result.instance_id).await {
                Ok(instance) => {
                    if let Err(err) = instance
                        .set_ttl(POST_SNAPSHOT_TTL_SECONDS, TtlAction::Pause)
                        .await
                    {
                        println!(
                            "[{}] Failed to set TTL on instance {}: {err}",
                            result.preset.preset_id, result.instance_id
                        );
                    } else {
                        println!(
                            "[{}] Instance {} will pause in ~10 minutes (TTL set).",
                            result.preset.preset_id, result.instance_id
                        );
                    }
                }
                Err(err) => println!(
                    "[{}] Failed to set TTL on instance {}: {err}",
                    result.preset.preset_id, result.instance_id
                ),
            }
        }
    }

    for result in &results {
        manifest.record_snapshot(
            &result.preset.display(),
            result.snapshot_id.clone(),
            result.captured_at.clone(),
        );
    }
    write_manifest(&config.manifest_path, &manifest, &now)?;

    let table = render_verification_table(&results);
    if !table.is_empty() {
        println!("\nSnapshot verification URLs:");
        for line in table {
            println!("{line}");
        }
    }

    println!(
        "\nUpdated morph snapshot manifest at {}",
        config.manifest_path.display()
    );
    for result in &results {
        println!(
            "[{}] Snapshot {} captured at {}",
            result.preset.preset_id, result.snapshot_id, result.captured_at
        );
    }

    if config.require_verify {
        let instances: Vec<_> = started_instances.lock().unwrap().drain(..).collect();
        for instance in instances {
            info!("stopping instance {}", instance.id());
            if let Err(err) = instance.stop().await {
                println!("Failed to stop instance {}: {err}", instance.id());
            }
        }
    }

    if !failures.is_empty() {
        bail!(
            "{} of {} preset runs failed ({})",
            failures.len(),
            config.presets.len(),
            failures
                .iter()
                .map(|(preset_id, _)| preset_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    Ok(results)
}
