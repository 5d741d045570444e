//! Error types for the task graph engine.

use thiserror::Error;

/// Errors produced by task registration and scheduling.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A task name was registered twice.
    #[error("duplicate task registration: {name}")]
    DuplicateTask { name: String },

    /// A task depends on a name that is not registered.
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// No task became ready while work remained: the remaining tasks form
    /// (or depend on) a dependency cycle.
    #[error("dependency cycle detected among tasks: {}", .stuck.join(", "))]
    Cycle { stuck: Vec<String> },

    /// A task body returned an error.
    #[error("task '{name}' failed: {source:#}")]
    TaskFailed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A task panicked or was aborted mid-flight.
    #[error("task '{name}' panicked")]
    TaskPanicked { name: String },
}

impl GraphError {
    /// Name of the task this error is attributed to, if any.
    pub fn task_name(&self) -> Option<&str> {
        match self {
            GraphError::DuplicateTask { name }
            | GraphError::TaskFailed { name, .. }
            | GraphError::TaskPanicked { name } => Some(name),
            GraphError::UnknownDependency { task, .. } => Some(task),
            GraphError::Cycle { .. } => None,
        }
    }
}
