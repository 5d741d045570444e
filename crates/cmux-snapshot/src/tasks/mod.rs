//! The provisioning task catalog.
//!
//! Tasks are grouped by concern; [`build_registry`] assembles the full
//! dependency graph for one preset run. The graph is validated at build
//! time so configuration mistakes surface before any VM boots.

mod bootstrap;
mod checks;
mod ide;
mod services;
mod toolchains;
mod workspace;

use crate::context::TaskContext;
use cmux_taskgraph::{GraphResult, TaskRegistry};

/// Assemble and validate the complete task registry.
pub fn build_registry() -> GraphResult<TaskRegistry<TaskContext>> {
    let mut registry = TaskRegistry::new();
    bootstrap::register(&mut registry)?;
    toolchains::register(&mut registry)?;
    workspace::register(&mut registry)?;
    ide::register(&mut registry)?;
    services::register(&mut registry)?;
    checks::register(&mut registry)?;
    registry.validate()?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmux_taskgraph::format_dependency_graph;

    #[test]
    fn registry_builds_and_validates() {
        let registry = build_registry().expect("registry builds");
        assert!(registry.len() > 35, "full catalog registered");
        for name in [
            "build-setup-exec-binary",
            "configure-provisioning-cgroup",
            "apt-bootstrap",
            "install-base-packages",
            "ensure-docker",
            "install-node-runtime",
            "install-bun",
            "install-go-toolchain",
            "install-rust-toolchain",
            "install-uv-python",
            "upload-repo",
            "install-repo-dependencies",
            "install-systemd-units",
            "build-rust-binaries",
            "cleanup-build-artifacts",
            "check-cargo",
            "check-devtools",
            "check-worker",
        ] {
            assert!(registry.get(name).is_some(), "missing task {name}");
        }
    }

    #[test]
    fn bootstrap_layer_has_no_dependencies() {
        let registry = build_registry().unwrap();
        for name in [
            "build-setup-exec-binary",
            "configure-provisioning-cgroup",
            "apt-bootstrap",
        ] {
            let task = registry.get(name).unwrap();
            assert!(
                task.dependencies.is_empty(),
                "{name} must run in the first layer"
            );
        }
    }

    #[test]
    fn checks_run_after_cleanup() {
        let registry = build_registry().unwrap();
        for name in registry.names() {
            if name.starts_with("check-") {
                let task = registry.get(&name).unwrap();
                assert!(
                    task.dependencies
                        .iter()
                        .any(|dep| dep == "cleanup-build-artifacts"),
                    "{name} must depend on cleanup-build-artifacts"
                );
            }
        }
    }

    #[test]
    fn dependency_graph_renders_without_cycles() {
        let registry = build_registry().unwrap();
        let rendered = format_dependency_graph(&registry);
        assert!(rendered.contains("apt-bootstrap"));
        assert!(!rendered.contains("(cycle)"));
    }
}
