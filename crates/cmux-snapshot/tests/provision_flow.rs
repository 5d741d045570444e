//! End-to-end provisioning flow against the in-memory cloud fakes: boot,
//! task graph over the SSH fallback, disk cleanup, snapshot, TTL, and
//! manifest merge.

use clap::Parser;
use cmux_cloud::fakes::FakeCloud;
use cmux_cloud::{CloudClient, TtlAction};
use cmux_manifest::load_manifest;
use cmux_snapshot::args::Cli;
use cmux_snapshot::context::TaskContext;
use cmux_snapshot::orchestrator::{provision_and_snapshot_with_registry, RunConfig};
use cmux_taskgraph::{TaskRegistry, TaskSpec};
use std::sync::Arc;

fn test_config(manifest_dir: &std::path::Path) -> RunConfig {
    let cli = Cli::parse_from(["cmux-snapshot", "--no-bump-ide-deps"]);
    let mut config = RunConfig::from_cli(&cli);
    config.manifest_path = manifest_dir.join("morph-snapshots.json");
    config.probe_devtools = false;
    config
}

/// A minimal registry standing in for the full catalog: one install step
/// and one check depending on it.
fn tiny_registry() -> Arc<TaskRegistry<TaskContext>> {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            TaskSpec::new("install-things"),
            |ctx: Arc<TaskContext>| async move {
                ctx.run("install-things", "echo installing").await?;
                Ok(())
            },
        )
        .unwrap();
    registry
        .register(
            TaskSpec::new("check-things").deps(["install-things"]),
            |ctx: Arc<TaskContext>| async move {
                ctx.run("check-things", "echo checking").await?;
                Ok(())
            },
        )
        .unwrap();
    Arc::new(registry)
}

/// Registry whose single task fails on the boosted preset (detected via the
/// derived cpu quota) and succeeds elsewhere.
fn boosted_failing_registry() -> Arc<TaskRegistry<TaskContext>> {
    let boosted_quota = 8u64 * 100_000 * 9 / 10;
    let mut registry = TaskRegistry::new();
    registry
        .register(
            TaskSpec::new("install-things"),
            move |ctx: Arc<TaskContext>| async move {
                let quota = ctx
                    .resource_profile
                    .as_ref()
                    .and_then(|profile| profile.cpu_quota);
                if quota == Some(boosted_quota) {
                    anyhow::bail!("install-things failed with exit code 2\nstderr:\nboom");
                }
                ctx.run("install-things", "echo installing").await?;
                Ok(())
            },
        )
        .unwrap();
    Arc::new(registry)
}

#[tokio::test]
async fn full_run_snapshots_every_preset_and_writes_the_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let manifest_path = config.manifest_path.clone();
    let cloud = FakeCloud::new();

    let client: Arc<dyn CloudClient> = cloud.clone();
    let results = provision_and_snapshot_with_registry(config, client, tiny_registry())
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].preset.preset_id, "4vcpu_16gb_48gb");
    assert_eq!(results[1].preset.preset_id, "8vcpu_32gb_48gb");
    assert!(results[0].vnc_url.ends_with("/vnc.html"));

    // Both instances booted from the base snapshot with their preset's
    // hardware, were snapshotted once, and got the post-run TTL.
    let specs = cloud.boot_specs();
    assert_eq!(specs.len(), 2);
    assert!(specs.iter().any(|s| s.vcpus == 4 && s.memory_mib == 16_384));
    assert!(specs.iter().any(|s| s.vcpus == 8 && s.memory_mib == 32_768));
    assert!(specs.iter().all(|s| s.snapshot_id == "snapshot_3fjuvxbs"));

    for instance in cloud.instances() {
        assert_eq!(instance.snapshot_count(), 1);
        assert!(instance.wake_on_http());
        assert_eq!(instance.current_ttl(), Some((600, TtlAction::Pause)));
        assert!(!instance.is_stopped(), "TTL handles cleanup in this mode");

        // Seven named services exposed per VM.
        let ports: Vec<u16> = instance
            .exposed_services()
            .iter()
            .map(|(_, port, _)| *port)
            .collect();
        for port in [39375, 39377, 39378, 39379, 39380, 39381, 39383] {
            assert!(ports.contains(&port), "port {port} not exposed");
        }

        // Tasks ran in dependency order, and the disk cleanup ran before
        // the snapshot.
        let commands = instance.commands();
        let install_at = commands
            .iter()
            .position(|c| c.contains("echo installing"))
            .expect("install task ran");
        let check_at = commands
            .iter()
            .position(|c| c.contains("echo checking"))
            .expect("check task ran");
        let cleanup_at = commands
            .iter()
            .position(|c| c.contains("rm -rf /cmux"))
            .expect("disk cleanup ran");
        assert!(install_at < check_at);
        assert!(check_at < cleanup_at);
    }

    // Manifest: one entry per preset, version 1 each, updatedAt stamped.
    let manifest = load_manifest(&manifest_path, "2026-01-01T00:00:00Z").unwrap();
    assert_eq!(manifest.presets.len(), 2);
    assert_eq!(manifest.presets[0].preset_id, "4vcpu_16gb_48gb");
    assert_eq!(manifest.presets[0].versions.len(), 1);
    assert_eq!(manifest.presets[0].versions[0].version, 1);
    assert_eq!(manifest.presets[1].preset_id, "8vcpu_32gb_48gb");
    assert_eq!(
        manifest.updated_at,
        manifest.presets[1].versions[0].captured_at
    );
}

#[tokio::test]
async fn preset_failure_does_not_block_sibling_results() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let manifest_path = config.manifest_path.clone();
    let cloud = FakeCloud::new();

    let client: Arc<dyn CloudClient> = cloud.clone();
    let err = provision_and_snapshot_with_registry(config, client, boosted_failing_registry())
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("1 of 2 preset runs failed"), "{message}");
    assert!(message.contains("8vcpu_32gb_48gb"), "{message}");

    // The standard preset still snapshotted and landed in the manifest.
    let manifest = load_manifest(&manifest_path, "2026-01-01T00:00:00Z").unwrap();
    assert_eq!(manifest.presets.len(), 1);
    assert_eq!(manifest.presets[0].preset_id, "4vcpu_16gb_48gb");
    assert_eq!(manifest.presets[0].versions.len(), 1);

    let total_snapshots: u32 = cloud
        .instances()
        .iter()
        .map(|instance| instance.snapshot_count())
        .sum();
    assert_eq!(total_snapshots, 1, "failed preset was never snapshotted");
}

#[tokio::test]
async fn second_run_appends_the_next_version() {
    let dir = tempfile::tempdir().unwrap();

    for _ in 0..2 {
        let config = test_config(dir.path());
        let cloud = FakeCloud::new();
        let client: Arc<dyn CloudClient> = cloud;
        provision_and_snapshot_with_registry(config, client, tiny_registry())
        .await
        .unwrap();
    }

    let manifest = load_manifest(
        &dir.path().join("morph-snapshots.json"),
        "2026-01-01T00:00:00Z",
    )
    .unwrap();
    assert_eq!(manifest.presets.len(), 2);
    for preset in &manifest.presets {
        assert_eq!(
            preset
                .versions
                .iter()
                .map(|version| version.version)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}
