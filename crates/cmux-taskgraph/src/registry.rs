//! Task registration.
//!
//! A [`TaskRegistry`] owns every task of one provisioning run. Tasks are
//! registered up front as plain values (name, dependency list, async
//! closure); scheduling happens separately in [`crate::run_task_graph`].

use crate::error::GraphError;
use crate::GraphResult;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Boxed async task body, generic over the per-run context.
pub type TaskFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Declarative half of a task registration: name, dependencies, description.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
    name: String,
    deps: Vec<String>,
    description: Option<String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deps: Vec::new(),
            description: None,
        }
    }

    /// Declare dependencies. Duplicate entries are deduplicated while
    /// preserving first-seen order (the order only matters for diagnostics).
    pub fn deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.deps.contains(&dep) {
                self.deps.push(dep);
            }
        }
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A registered task: spec plus executable body.
pub struct TaskDefinition<C> {
    pub name: String,
    pub dependencies: Vec<String>,
    pub description: Option<String>,
    pub(crate) func: TaskFn<C>,
}

impl<C> TaskDefinition<C> {
    pub(crate) fn func(&self) -> TaskFn<C> {
        Arc::clone(&self.func)
    }
}

impl<C> std::fmt::Debug for TaskDefinition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Name -> task map for one provisioning run.
///
/// Registering an already-present name is a configuration error and is
/// rejected immediately rather than at schedule time.
pub struct TaskRegistry<C> {
    tasks: BTreeMap<String, TaskDefinition<C>>,
}

impl<C: Send + Sync + 'static> Default for TaskRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> TaskRegistry<C> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Register a task. The body is any async closure over the shared
    /// context; it is boxed here so callers can use plain `async move`
    /// blocks.
    pub fn register<F, Fut>(&mut self, spec: TaskSpec, func: F) -> GraphResult<()>
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(&spec.name) {
            return Err(GraphError::DuplicateTask { name: spec.name });
        }
        let boxed: TaskFn<C> = Arc::new(move |ctx| Box::pin(func(ctx)));
        self.tasks.insert(
            spec.name.clone(),
            TaskDefinition {
                name: spec.name,
                dependencies: spec.deps,
                description: spec.description,
                func: boxed,
            },
        );
        Ok(())
    }

    /// Verify every declared dependency resolves to a registered task.
    pub fn validate(&self) -> GraphResult<()> {
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition<C>> {
        self.tasks.get(name)
    }

    /// All registered tasks in name order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskDefinition<C>> {
        self.tasks.values()
    }

    /// Registered task names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
