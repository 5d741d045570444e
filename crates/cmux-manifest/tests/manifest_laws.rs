//! Manifest laws: normalization idempotence, round-trips, monotonic
//! versioning, and update isolation across a run with multiple presets.

use cmux_manifest::{
    load_manifest, normalize_value, write_manifest, Manifest, PresetDisplay,
    CURRENT_SCHEMA_VERSION,
};
use serde_json::json;

const T0: &str = "2026-03-01T00:00:00Z";
const T1: &str = "2026-03-02T09:30:00Z";
const T2: &str = "2026-03-02T11:45:00Z";

fn standard() -> PresetDisplay {
    PresetDisplay {
        preset_id: "4vcpu_16gb_48gb".to_string(),
        label: "Standard workspace".to_string(),
        cpu: "4 vCPU".to_string(),
        memory: "16 GB RAM".to_string(),
        disk: "48 GB SSD".to_string(),
    }
}

fn boosted() -> PresetDisplay {
    PresetDisplay {
        preset_id: "8vcpu_32gb_48gb".to_string(),
        label: "Performance workspace".to_string(),
        cpu: "8 vCPU".to_string(),
        memory: "32 GB RAM".to_string(),
        disk: "48 GB SSD".to_string(),
    }
}

#[test]
fn normalize_is_idempotent_over_messy_inputs() {
    let inputs = vec![
        json!({}),
        json!({"presets": "not-an-array"}),
        json!({"presets": [1, null, {"presetId": "x"}]}),
        json!({
            "schemaVersion": "2",
            "updatedAt": 17,
            "presets": [{
                "presetId": "4vcpu_16gb_48gb",
                "versions": [
                    {"version": "9"},
                    {"version": 1, "snapshotId": "s1", "capturedAt": T0},
                    "junk"
                ]
            }]
        }),
    ];
    for raw in inputs {
        let once = normalize_value(&raw, T0);
        let twice = normalize_value(&serde_json::to_value(&once).unwrap(), T0);
        assert_eq!(once, twice, "normalize not idempotent for {raw}");
    }
}

#[test]
fn parse_of_write_equals_normalize() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("morph-snapshots.json");

    let raw = json!({
        "schemaVersion": 1,
        "updatedAt": T0,
        "presets": [{
            "presetId": "4vcpu_16gb_48gb",
            "label": "Standard workspace",
            "cpu": "4 vCPU",
            "memory": "16 GB RAM",
            "disk": "48 GB SSD",
            "versions": [
                {"version": 2, "snapshotId": "s2", "capturedAt": T1},
                {"version": 1, "snapshotId": "s1", "capturedAt": T0}
            ]
        }]
    });
    let manifest = normalize_value(&raw, T0);
    write_manifest(&path, &manifest, T0).unwrap();
    let reloaded = load_manifest(&path, T0).unwrap();
    assert_eq!(reloaded, manifest);
}

#[test]
fn n_updates_yield_versions_one_through_n() {
    let mut manifest = Manifest::empty(T0);
    for i in 1..=6 {
        manifest.record_snapshot(&standard(), format!("snap_{i}"), T0);
    }
    let versions = &manifest.presets[0].versions;
    assert_eq!(versions.len(), 6);
    assert_eq!(
        versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        (1..=6).collect::<Vec<_>>()
    );
}

#[test]
fn two_preset_run_updates_in_declaration_order() {
    // Scenario: one run snapshots both presets; updates apply in
    // declaration order into a single manifest value, written once.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("morph-snapshots.json");

    let mut manifest = load_manifest(&path, T0).unwrap();
    manifest.record_snapshot(&standard(), "snapshot_std_1", T1);
    manifest.record_snapshot(&boosted(), "snapshot_boost_1", T2);
    write_manifest(&path, &manifest, T0).unwrap();

    let loaded = load_manifest(&path, T0).unwrap();
    assert_eq!(loaded.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(loaded.updated_at, T2, "updatedAt is the latest capturedAt");
    assert_eq!(loaded.presets.len(), 2);
    assert_eq!(loaded.presets[0].preset_id, "4vcpu_16gb_48gb");
    assert_eq!(loaded.presets[1].preset_id, "8vcpu_32gb_48gb");
    assert_eq!(loaded.presets[0].versions[0].snapshot_id, "snapshot_std_1");

    // A second run appends version 2 for the standard preset only.
    let mut manifest = load_manifest(&path, T0).unwrap();
    manifest.record_snapshot(&standard(), "snapshot_std_2", T2);
    write_manifest(&path, &manifest, T0).unwrap();

    let loaded = load_manifest(&path, T0).unwrap();
    let std_preset = &loaded.presets[0];
    assert_eq!(
        std_preset
            .versions
            .iter()
            .map(|v| (v.version, v.snapshot_id.as_str()))
            .collect::<Vec<_>>(),
        vec![(1, "snapshot_std_1"), (2, "snapshot_std_2")]
    );
    let boost_preset = &loaded.presets[1];
    assert_eq!(boost_preset.versions.len(), 1, "sibling preset untouched");
}
