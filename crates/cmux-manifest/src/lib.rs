//! Snapshot manifest: the durable record of every preset and its snapshot
//! lineage.
//!
//! The manifest is a single JSON file committed to the repository. Its
//! schema is the normative interface for downstream consumers, so reading
//! is lossy-tolerant (`normalize` coerces anything it can and drops the
//! rest) while writing is strict and deterministic.

mod model;
mod store;

pub use model::{
    normalize_value, Manifest, PresetDisplay, PresetEntry, VersionEntry, CURRENT_SCHEMA_VERSION,
};
pub use store::{load_manifest, write_manifest, ManifestError};

use chrono::{SecondsFormat, Utc};

/// Current time as an ISO-8601 UTC timestamp with a `Z` suffix, second
/// precision (the format used for `capturedAt` and `updatedAt`).
pub fn iso_timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
