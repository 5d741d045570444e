//! Manifest file I/O.

use crate::model::{normalize_value, Manifest, CURRENT_SCHEMA_VERSION};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Errors for manifest reads and writes.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write manifest at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Read and normalize the manifest. A missing file yields an empty manifest
/// at the current schema version; a schema-version mismatch warns but
/// proceeds.
pub fn load_manifest(path: &Path, now: &str) -> Result<Manifest, ManifestError> {
    if !path.exists() {
        return Ok(Manifest::empty(now));
    }
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw: serde_json::Value =
        serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    let manifest = normalize_value(&raw, now);
    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        warn!(
            found = manifest.schema_version,
            expected = CURRENT_SCHEMA_VERSION,
            "manifest schema version differs from expected"
        );
    }
    Ok(manifest)
}

/// Normalize and write the manifest with two-space indentation.
pub fn write_manifest(path: &Path, manifest: &Manifest, now: &str) -> Result<(), ManifestError> {
    let normalized = normalize_value(&serde_json::to_value(manifest)?, now);
    let text = serde_json::to_string_pretty(&normalized)?;
    std::fs::write(path, text).map_err(|source| ManifestError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2026-01-01T00:00:00Z";

    #[test]
    fn missing_file_synthesizes_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph-snapshots.json");
        let manifest = load_manifest(&path, T0).unwrap();
        assert_eq!(manifest.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(manifest.presets.is_empty());
        assert_eq!(manifest.updated_at, T0);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph-snapshots.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_manifest(&path, T0).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("morph-snapshots.json");

        let mut manifest = Manifest::empty(T0);
        manifest.record_snapshot(
            &crate::PresetDisplay {
                preset_id: "4vcpu_16gb_48gb".to_string(),
                label: "Standard workspace".to_string(),
                cpu: "4 vCPU".to_string(),
                memory: "16 GB RAM".to_string(),
                disk: "48 GB SSD".to_string(),
            },
            "snapshot_abc",
            "2026-01-02T00:00:00Z",
        );
        write_manifest(&path, &manifest, T0).unwrap();

        let loaded = load_manifest(&path, T0).unwrap();
        assert_eq!(loaded, manifest);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("  \"schemaVersion\": 1"), "two-space indent");
    }
}
