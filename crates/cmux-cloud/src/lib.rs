//! Morph cloud SDK interface for the cmux snapshot provisioner.
//!
//! This crate defines the seam between the provisioner and the cloud
//! provider:
//! - [`CloudClient`] / [`InstanceHandle`]: async traits covering boot, ready
//!   wait, HTTP service exposure, file upload, SSH-backed exec, snapshot,
//!   TTL and wake policies, and stop
//! - [`MorphRestClient`]: reqwest-backed implementation against the Morph
//!   REST API (`MORPH_API_KEY` bearer auth)
//! - [`value`]: tolerant field access over SDK response JSON, which arrives
//!   either as flat records or wrapped maps depending on endpoint
//! - [`fakes`]: in-memory implementations for tests

mod api;
mod error;
pub mod fakes;
mod rest;
pub mod value;

pub use api::{BootSpec, CloudClient, ExecResult, InstanceHandle, SnapshotInfo, TtlAction};
pub use error::CloudError;
pub use rest::MorphRestClient;

/// Result type for cloud operations.
pub type CloudResult<T> = std::result::Result<T, CloudError>;
