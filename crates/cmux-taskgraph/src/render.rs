//! Diagnostic rendering of the dependency graph.

use crate::registry::TaskRegistry;
use std::collections::BTreeMap;

/// Render the registry as an indented forest.
///
/// Roots are tasks with no dependencies; each task's dependents are listed
/// beneath it. A task reached again along the current path is marked
/// `(cycle)` and not expanded further. Output is deterministic (name order).
pub fn format_dependency_graph<C>(registry: &TaskRegistry<C>) -> String
where
    C: Send + Sync + 'static,
{
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for task in registry.tasks() {
        dependents.entry(&task.name).or_default();
        for dep in &task.dependencies {
            dependents.entry(dep.as_str()).or_default().push(&task.name);
        }
    }
    for children in dependents.values_mut() {
        children.sort_unstable();
    }

    let roots: Vec<&str> = registry
        .tasks()
        .filter(|task| task.dependencies.is_empty())
        .map(|task| task.name.as_str())
        .collect();

    let mut out = String::new();
    let mut path: Vec<&str> = Vec::new();
    for root in roots {
        render_node(root, &dependents, 0, &mut path, &mut out);
    }
    out.trim_end().to_string()
}

fn render_node<'a>(
    name: &'a str,
    dependents: &BTreeMap<&'a str, Vec<&'a str>>,
    depth: usize,
    path: &mut Vec<&'a str>,
    out: &mut String,
) {
    let indent = "  ".repeat(depth);
    if path.contains(&name) {
        out.push_str(&format!("{indent}{name} (cycle)\n"));
        return;
    }
    out.push_str(&format!("{indent}{name}\n"));
    path.push(name);
    if let Some(children) = dependents.get(name) {
        for child in children {
            render_node(child, dependents, depth + 1, path, out);
        }
    }
    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{TaskRegistry, TaskSpec};

    struct Ctx;

    fn noop() -> impl Fn(
        std::sync::Arc<Ctx>,
    ) -> futures::future::BoxFuture<'static, anyhow::Result<()>>
           + Send
           + Sync {
        |_ctx| Box::pin(async { Ok(()) })
    }

    #[test]
    fn renders_diamond_as_forest() {
        let mut registry: TaskRegistry<Ctx> = TaskRegistry::new();
        registry.register(TaskSpec::new("a"), noop()).unwrap();
        registry
            .register(TaskSpec::new("b").deps(["a"]), noop())
            .unwrap();
        registry
            .register(TaskSpec::new("c").deps(["a"]), noop())
            .unwrap();
        registry
            .register(TaskSpec::new("d").deps(["b", "c"]), noop())
            .unwrap();

        let rendered = format_dependency_graph(&registry);
        let expected = "a\n  b\n    d\n  c\n    d";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn marks_cycles_instead_of_recursing() {
        let mut registry: TaskRegistry<Ctx> = TaskRegistry::new();
        registry.register(TaskSpec::new("root"), noop()).unwrap();
        registry
            .register(TaskSpec::new("x").deps(["root", "y"]), noop())
            .unwrap();
        registry
            .register(TaskSpec::new("y").deps(["x"]), noop())
            .unwrap();

        let rendered = format_dependency_graph(&registry);
        assert!(rendered.contains("(cycle)"), "rendered: {rendered}");
    }

    #[test]
    fn empty_registry_renders_empty() {
        let registry: TaskRegistry<Ctx> = TaskRegistry::new();
        assert_eq!(format_dependency_graph(&registry), "");
    }
}
