//! Manifest data model and normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// One recorded snapshot of a preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub version: i64,
    pub snapshot_id: String,
    pub captured_at: String,
}

/// One hardware preset and its version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetEntry {
    pub preset_id: String,
    pub label: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    /// Sorted ascending by `version`.
    pub versions: Vec<VersionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The whole manifest file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: i64,
    pub updated_at: String,
    pub presets: Vec<PresetEntry>,
}

/// Display fields for a preset, supplied by the current run's plan. The
/// plan always wins over what the manifest previously recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetDisplay {
    pub preset_id: String,
    pub label: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
}

impl Manifest {
    /// Empty manifest at the current schema version.
    pub fn empty(updated_at: impl Into<String>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            updated_at: updated_at.into(),
            presets: Vec::new(),
        }
    }

    /// Append a new snapshot for `preset`, creating the preset entry when
    /// absent. Assigns `max(existing version) + 1` (1 for a fresh preset),
    /// refreshes display fields from the plan, re-sorts versions, and stamps
    /// `schemaVersion`/`updatedAt`.
    pub fn record_snapshot(
        &mut self,
        preset: &PresetDisplay,
        snapshot_id: impl Into<String>,
        captured_at: impl Into<String>,
    ) {
        let captured_at = captured_at.into();
        let index = match self
            .presets
            .iter()
            .position(|candidate| candidate.preset_id == preset.preset_id)
        {
            Some(index) => index,
            None => {
                self.presets.push(PresetEntry {
                    preset_id: preset.preset_id.clone(),
                    label: String::new(),
                    cpu: String::new(),
                    memory: String::new(),
                    disk: String::new(),
                    versions: Vec::new(),
                    description: None,
                });
                self.presets.len() - 1
            }
        };
        let entry = &mut self.presets[index];
        entry.label = preset.label.clone();
        entry.cpu = preset.cpu.clone();
        entry.memory = preset.memory.clone();
        entry.disk = preset.disk.clone();

        let next_version = entry
            .versions
            .iter()
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        entry.versions.push(VersionEntry {
            version: next_version,
            snapshot_id: snapshot_id.into(),
            captured_at: captured_at.clone(),
        });
        entry.versions.sort_by_key(|v| v.version);

        self.schema_version = CURRENT_SCHEMA_VERSION;
        self.updated_at = captured_at;
    }
}

fn coalesce_str(value: Option<&Value>, default: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => default.to_string(),
    }
}

fn coalesce_int(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

/// Normalize arbitrary JSON into a well-formed manifest: coerce
/// missing/invalid fields to typed defaults, drop non-object entries, and
/// sort every preset's versions ascending.
///
/// `fallback_timestamp` fills in missing `updatedAt`/`capturedAt` fields so
/// normalization stays deterministic for a given input.
pub fn normalize_value(raw: &Value, fallback_timestamp: &str) -> Manifest {
    let mut presets = Vec::new();
    if let Some(raw_presets) = raw.get("presets").and_then(Value::as_array) {
        for raw_preset in raw_presets {
            if !raw_preset.is_object() {
                continue;
            }
            let mut versions = Vec::new();
            if let Some(raw_versions) = raw_preset.get("versions").and_then(Value::as_array) {
                for raw_version in raw_versions {
                    if !raw_version.is_object() {
                        continue;
                    }
                    versions.push(VersionEntry {
                        version: coalesce_int(raw_version.get("version"), 0),
                        snapshot_id: coalesce_str(raw_version.get("snapshotId"), ""),
                        captured_at: coalesce_str(
                            raw_version.get("capturedAt"),
                            fallback_timestamp,
                        ),
                    });
                }
            }
            versions.sort_by_key(|v| v.version);

            let description = match raw_preset.get("description") {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                _ => None,
            };
            presets.push(PresetEntry {
                preset_id: coalesce_str(raw_preset.get("presetId"), ""),
                label: coalesce_str(raw_preset.get("label"), ""),
                cpu: coalesce_str(raw_preset.get("cpu"), ""),
                memory: coalesce_str(raw_preset.get("memory"), ""),
                disk: coalesce_str(raw_preset.get("disk"), ""),
                versions,
                description,
            });
        }
    }

    Manifest {
        schema_version: coalesce_int(raw.get("schemaVersion"), CURRENT_SCHEMA_VERSION),
        updated_at: coalesce_str(raw.get("updatedAt"), fallback_timestamp),
        presets,
    }
}
