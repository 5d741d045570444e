//! Layered topological execution.
//!
//! Scheduling contract:
//! 1. `pending` starts as every registered task, `done` empty.
//! 2. Each round, `ready` = pending tasks whose dependencies are all done.
//!    An empty `ready` with work remaining is a cycle.
//! 3. All ready tasks start concurrently; the layer's wall time and each
//!    task's own duration are recorded.
//! 4. If any task in a layer fails, in-flight siblings run to completion
//!    but no further layers start.

use crate::error::GraphError;
use crate::registry::TaskRegistry;
use crate::GraphResult;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Receiver for task and layer wall times.
///
/// Implemented by [`crate::TimingsCollector`]; kept as a trait so the
/// scheduler stays independent of any particular collector.
pub trait TimingSink: Send + Sync {
    fn record(&self, label: &str, duration: Duration);
}

/// Execute every registered task exactly once, obeying dependencies and
/// maximizing intra-layer concurrency.
pub async fn run_task_graph<C>(
    registry: &TaskRegistry<C>,
    ctx: Arc<C>,
    timings: &dyn TimingSink,
) -> GraphResult<()>
where
    C: Send + Sync + 'static,
{
    registry.validate()?;

    let mut pending: BTreeSet<String> = registry.names().into_iter().collect();
    let mut done: HashSet<String> = HashSet::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready: Vec<_> = pending
            .iter()
            .filter_map(|name| {
                let task = registry.get(name)?;
                task.dependencies
                    .iter()
                    .all(|dep| done.contains(dep))
                    .then(|| (name.clone(), task.func()))
            })
            .collect();

        if ready.is_empty() {
            return Err(GraphError::Cycle {
                stuck: pending.into_iter().collect(),
            });
        }
        let ready_names: Vec<String> = ready.iter().map(|(name, _)| name.clone()).collect();
        let layer_label = ready_names.join("+");

        debug!(layer = %layer_label, "starting layer");
        let layer_started = Instant::now();
        let mut join_set: JoinSet<(String, Duration, anyhow::Result<()>)> = JoinSet::new();
        for (task_name, func) in ready {
            let ctx = Arc::clone(&ctx);
            join_set.spawn(async move {
                let started = Instant::now();
                info!(task = %task_name, "task started");
                let result = func(ctx).await;
                (task_name, started.elapsed(), result)
            });
        }

        // Drain the whole layer before acting on failures so in-flight
        // siblings run to completion.
        let mut failures: Vec<GraphError> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, duration, result)) => {
                    timings.record(&format!("task:{name}"), duration);
                    match result {
                        Ok(()) => {
                            info!(task = %name, secs = duration.as_secs_f64(), "task finished");
                        }
                        Err(source) => {
                            error!(task = %name, error = %format!("{source:#}"), "task failed");
                            failures.push(GraphError::TaskFailed { name, source });
                        }
                    }
                }
                Err(join_err) => {
                    // The task name is lost when the future panics; attribute
                    // the failure to the layer instead.
                    error!(error = %join_err, "task panicked");
                    failures.push(GraphError::TaskPanicked {
                        name: layer_label.clone(),
                    });
                }
            }
        }
        timings.record(&format!("layer:{layer_label}"), layer_started.elapsed());

        if !failures.is_empty() {
            // Deterministic report: first failed task in name order.
            failures.sort_by(|a, b| a.task_name().cmp(&b.task_name()));
            let first = failures.remove(0);
            for extra in failures {
                error!(error = %extra, "additional task failure in layer");
            }
            return Err(first);
        }

        for name in ready_names {
            pending.remove(&name);
            done.insert(name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaskSpec;
    use crate::timings::TimingsCollector;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct RecordingCtx {
        events: Mutex<Vec<(String, Instant)>>,
    }

    impl RecordingCtx {
        fn mark(&self, label: &str) {
            self.events
                .lock()
                .unwrap()
                .push((label.to_string(), Instant::now()));
        }

        fn at(&self, label: &str) -> Instant {
            self.events
                .lock()
                .unwrap()
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, t)| *t)
                .unwrap_or_else(|| panic!("no event {label}"))
        }
    }

    fn marker(
        label: &'static str,
    ) -> impl Fn(Arc<RecordingCtx>) -> futures::future::BoxFuture<'static, anyhow::Result<()>>
           + Send
           + Sync {
        move |ctx: Arc<RecordingCtx>| {
            Box::pin(async move {
                ctx.mark(&format!("{label}:start"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.mark(&format!("{label}:end"));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn empty_registry_returns_immediately() {
        let registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        let timings = TimingsCollector::new();
        run_task_graph(&registry, Arc::new(RecordingCtx::default()), &timings)
            .await
            .unwrap();
        assert_eq!(timings.summary().layer_count, 0);
    }

    #[tokio::test]
    async fn linear_chain_runs_in_order() {
        let mut registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        registry.register(TaskSpec::new("a"), marker("a")).unwrap();
        registry
            .register(TaskSpec::new("b").deps(["a"]), marker("b"))
            .unwrap();
        registry
            .register(TaskSpec::new("c").deps(["b"]), marker("c"))
            .unwrap();

        let ctx = Arc::new(RecordingCtx::default());
        let timings = TimingsCollector::new();
        run_task_graph(&registry, Arc::clone(&ctx), &timings)
            .await
            .unwrap();

        assert!(ctx.at("a:end") <= ctx.at("b:start"));
        assert!(ctx.at("b:end") <= ctx.at("c:start"));
        let summary = timings.summary();
        assert_eq!(summary.layer_count, 3);
        assert_eq!(summary.task_count, 3);
    }

    #[tokio::test]
    async fn diamond_produces_three_layers() {
        let mut registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        registry.register(TaskSpec::new("a"), marker("a")).unwrap();
        registry
            .register(TaskSpec::new("b").deps(["a"]), marker("b"))
            .unwrap();
        registry
            .register(TaskSpec::new("c").deps(["a"]), marker("c"))
            .unwrap();
        registry
            .register(TaskSpec::new("d").deps(["b", "c"]), marker("d"))
            .unwrap();

        let ctx = Arc::new(RecordingCtx::default());
        let timings = TimingsCollector::new();
        run_task_graph(&registry, Arc::clone(&ctx), &timings)
            .await
            .unwrap();

        let layers: Vec<String> = timings
            .entries()
            .into_iter()
            .filter(|e| e.label.starts_with("layer:"))
            .map(|e| e.label)
            .collect();
        assert_eq!(layers, vec!["layer:a", "layer:b+c", "layer:d"]);

        // b and c overlap: both start before either ends.
        assert!(ctx.at("b:start") <= ctx.at("c:end"));
        assert!(ctx.at("c:start") <= ctx.at("b:end"));
        assert!(ctx.at("a:end") <= ctx.at("b:start"));
        assert!(ctx.at("b:end") <= ctx.at("d:start"));
        assert!(ctx.at("c:end") <= ctx.at("d:start"));
    }

    #[tokio::test]
    async fn cycle_reports_stuck_tasks() {
        let mut registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        registry.register(TaskSpec::new("root"), marker("root")).unwrap();
        registry
            .register(TaskSpec::new("x").deps(["y", "root"]), marker("x"))
            .unwrap();
        registry
            .register(TaskSpec::new("y").deps(["x"]), marker("y"))
            .unwrap();

        let timings = TimingsCollector::new();
        let err = run_task_graph(&registry, Arc::new(RecordingCtx::default()), &timings)
            .await
            .unwrap_err();
        match err {
            GraphError::Cycle { stuck } => assert_eq!(stuck, vec!["x", "y"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[tokio::test]
    async fn failure_stops_downstream_layers() {
        let mut registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        registry.register(TaskSpec::new("a"), marker("a")).unwrap();
        registry
            .register(TaskSpec::new("b").deps(["a"]), |ctx: Arc<RecordingCtx>| async move {
                ctx.mark("b:start");
                anyhow::bail!("b failed with exit code 2: boom")
            })
            .unwrap();
        registry
            .register(TaskSpec::new("d").deps(["b"]), marker("d"))
            .unwrap();

        let ctx = Arc::new(RecordingCtx::default());
        let timings = TimingsCollector::new();
        let err = run_task_graph(&registry, Arc::clone(&ctx), &timings)
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("'b'"), "unexpected error: {message}");
        assert!(message.contains("boom"), "unexpected error: {message}");

        // d never started; recorded task set is {a, b}.
        let recorded: Vec<String> = timings
            .entries()
            .into_iter()
            .filter(|e| e.label.starts_with("task:"))
            .map(|e| e.label)
            .collect();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains(&"task:a".to_string()));
        assert!(recorded.contains(&"task:b".to_string()));
        assert!(ctx
            .events
            .lock()
            .unwrap()
            .iter()
            .all(|(label, _)| !label.starts_with("d:")));
    }

    #[tokio::test]
    async fn sibling_in_failing_layer_runs_to_completion() {
        let mut registry: TaskRegistry<RecordingCtx> = TaskRegistry::new();
        registry
            .register(TaskSpec::new("fails"), |_ctx: Arc<RecordingCtx>| async move {
                anyhow::bail!("immediate failure")
            })
            .unwrap();
        registry
            .register(TaskSpec::new("slow"), |ctx: Arc<RecordingCtx>| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.mark("slow:end");
                Ok(())
            })
            .unwrap();

        let ctx = Arc::new(RecordingCtx::default());
        let timings = TimingsCollector::new();
        let err = run_task_graph(&registry, Arc::clone(&ctx), &timings)
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::TaskFailed { ref name, .. } if name == "fails"));
        // The slow sibling finished even though the layer failed.
        ctx.at("slow:end");
    }
}
