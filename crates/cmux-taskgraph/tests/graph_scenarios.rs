//! Scheduler invariants exercised over synthetic registries.

use cmux_taskgraph::{run_task_graph, GraphError, TaskRegistry, TaskSpec, TimingsCollector};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Spans {
    inner: Mutex<Vec<(String, Instant, Instant)>>,
}

impl Spans {
    fn record(&self, name: &str, start: Instant, end: Instant) {
        self.inner
            .lock()
            .unwrap()
            .push((name.to_string(), start, end));
    }

    fn span(&self, name: &str) -> (Instant, Instant) {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, s, e)| (*s, *e))
            .unwrap_or_else(|| panic!("no span for {name}"))
    }

    fn names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _, _)| n.clone())
            .collect()
    }
}

fn spanned(
    registry: &mut TaskRegistry<Spans>,
    name: &'static str,
    deps: &[&'static str],
    work: Duration,
) {
    registry
        .register(
            TaskSpec::new(name).deps(deps.iter().copied()),
            move |ctx: Arc<Spans>| async move {
                let start = Instant::now();
                tokio::time::sleep(work).await;
                ctx.record(name, start, Instant::now());
                Ok(())
            },
        )
        .unwrap();
}

/// Build a registry from `(name, deps)` pairs with uniform task duration.
fn build(pairs: &[(&'static str, &[&'static str])]) -> TaskRegistry<Spans> {
    let mut registry = TaskRegistry::new();
    for (name, deps) in pairs {
        spanned(&mut registry, name, deps, Duration::from_millis(15));
    }
    registry
}

#[tokio::test]
async fn every_task_runs_exactly_once() {
    let registry = build(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["a"]),
        ("d", &["b", "c"]),
        ("e", &["a"]),
        ("f", &["d", "e"]),
    ]);
    let ctx = Arc::new(Spans::default());
    let timings = TimingsCollector::new();
    run_task_graph(&registry, Arc::clone(&ctx), &timings)
        .await
        .unwrap();

    let mut ran = ctx.names();
    ran.sort();
    assert_eq!(ran, vec!["a", "b", "c", "d", "e", "f"]);

    let mut timed: Vec<String> = timings
        .entries()
        .into_iter()
        .filter(|e| e.label.starts_with("task:"))
        .map(|e| e.label)
        .collect();
    timed.sort();
    timed.dedup();
    assert_eq!(timed.len(), 6, "each task timed exactly once");
}

#[tokio::test]
async fn dependencies_are_honored() {
    let pairs: &[(&'static str, &[&'static str])] = &[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["a"]),
        ("d", &["b", "c"]),
    ];
    let registry = build(pairs);
    let ctx = Arc::new(Spans::default());
    let timings = TimingsCollector::new();
    run_task_graph(&registry, Arc::clone(&ctx), &timings)
        .await
        .unwrap();

    for (name, deps) in pairs {
        let (start, _) = ctx.span(name);
        for dep in *deps {
            let (_, dep_end) = ctx.span(dep);
            assert!(
                start >= dep_end,
                "{name} started before dependency {dep} finished"
            );
        }
    }
}

#[tokio::test]
async fn layer_count_equals_longest_chain() {
    // Longest chain a -> b -> d -> f has length 4; the wide fan does not
    // add layers.
    let registry = build(&[
        ("a", &[]),
        ("b", &["a"]),
        ("c", &["a"]),
        ("d", &["b"]),
        ("e", &["a"]),
        ("f", &["d", "c", "e"]),
    ]);
    let timings = TimingsCollector::new();
    run_task_graph(&registry, Arc::new(Spans::default()), &timings)
        .await
        .unwrap();
    assert_eq!(timings.summary().layer_count, 4);
}

#[tokio::test]
async fn diamond_wall_time_tracks_critical_path() {
    let mut registry = TaskRegistry::new();
    spanned(&mut registry, "a", &[], Duration::from_millis(20));
    spanned(&mut registry, "b", &["a"], Duration::from_millis(60));
    spanned(&mut registry, "c", &["a"], Duration::from_millis(20));
    spanned(&mut registry, "d", &["b", "c"], Duration::from_millis(20));

    let timings = TimingsCollector::new();
    run_task_graph(&registry, Arc::new(Spans::default()), &timings)
        .await
        .unwrap();

    let summary = timings.summary();
    // task_time ~ 120ms, wall ~ 100ms (b and c overlap).
    assert!(summary.task_time > summary.wall_time);
    assert!(summary.effective_parallelism() > 1.0);
    assert_eq!(summary.layer_count, 3);
    assert_eq!(summary.task_count, 4);
}

#[tokio::test]
async fn cycle_error_lists_exactly_the_stuck_component() {
    let mut registry: TaskRegistry<Spans> = TaskRegistry::new();
    spanned(&mut registry, "free", &[], Duration::from_millis(1));
    spanned(&mut registry, "p", &["q"], Duration::from_millis(1));
    spanned(&mut registry, "q", &["r"], Duration::from_millis(1));
    spanned(&mut registry, "r", &["p"], Duration::from_millis(1));

    let timings = TimingsCollector::new();
    let err = run_task_graph(&registry, Arc::new(Spans::default()), &timings)
        .await
        .unwrap_err();
    match err {
        GraphError::Cycle { stuck } => assert_eq!(stuck, vec!["p", "q", "r"]),
        other => panic!("expected cycle error, got {other}"),
    }
}

#[tokio::test]
async fn failing_task_reports_name_and_skips_dependents() {
    let mut registry: TaskRegistry<Spans> = TaskRegistry::new();
    spanned(&mut registry, "a", &[], Duration::from_millis(5));
    registry
        .register(
            TaskSpec::new("b").deps(["a"]),
            |_ctx: Arc<Spans>| async move {
                anyhow::bail!("b failed with exit code 2\nstderr:\nboom")
            },
        )
        .unwrap();
    spanned(&mut registry, "d", &["b"], Duration::from_millis(5));

    let ctx = Arc::new(Spans::default());
    let timings = TimingsCollector::new();
    let err = run_task_graph(&registry, Arc::clone(&ctx), &timings)
        .await
        .unwrap_err();

    let message = format!("{err}");
    assert!(message.contains("'b'"));
    assert!(message.contains("exit code 2"));
    assert!(message.contains("boom"));
    assert_eq!(ctx.names(), vec!["a"], "only a completed successfully");

    let recorded: Vec<String> = timings
        .entries()
        .into_iter()
        .filter(|e| e.label.starts_with("task:"))
        .map(|e| e.label)
        .collect();
    assert_eq!(recorded.len(), 2, "a and b recorded, d never ran");
}
