//! Dependency-graph task engine for cmux snapshot provisioning.
//!
//! Tasks are ordinary values registered by name with an explicit dependency
//! list. The scheduler executes the whole registry in topological layers,
//! running every task of a layer concurrently and recording per-task and
//! per-layer wall times.
//!
//! - [`TaskRegistry`]: name -> task map, rejects duplicates
//! - [`run_task_graph`]: layered concurrent execution with cycle detection
//! - [`TimingsCollector`]: thread-safe `(label, duration)` sink
//! - [`format_dependency_graph`]: diagnostic forest rendering

mod error;
mod registry;
mod render;
mod scheduler;
mod timings;

pub use error::GraphError;
pub use registry::{TaskDefinition, TaskRegistry, TaskSpec};
pub use render::format_dependency_graph;
pub use scheduler::{run_task_graph, TimingSink};
pub use timings::{TimingEntry, TimingSummary, TimingsCollector};

/// Result alias for scheduler operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;
