// tests/caching.rs

mod common;
use crate::common::builders::{
    make_runner, read_run_document, CommandNodeBuilder, FanInNodeBuilder, FanOutNodeBuilder,
    WorkflowBuilder,
};
use crate::common::init_tracing;

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use tokio::time::{timeout, Duration};

use rundag::dag::{NodeStatus, Workflow};
use rundag::engine::RunReport;
use rundag::exec::AgentRegistry;

type TestResult = Result<(), Box<dyn Error>>;

async fn fresh_run(
    state: &Path,
    workflow: Workflow,
    overrides: BTreeMap<String, Value>,
) -> anyhow::Result<RunReport> {
    let mut runner = make_runner(state, workflow, AgentRegistry::with_builtins())?;
    timeout(Duration::from_secs(5), runner.run_fresh(overrides))
        .await
        .expect("run did not finish within 5 seconds")
}

fn marker_lines(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn deterministic_node_is_served_from_cache_on_rerun() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    fs::create_dir_all(&work)?;
    let state = dir.path().join("state");

    let build = || {
        WorkflowBuilder::new("cached")
            .with_node(
                CommandNodeBuilder::new("a", "echo ran >> marker")
                    .cwd(&work)
                    .deterministic()
                    .build(),
            )
            .build()
    };

    let first = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert!(first.succeeded());
    assert_eq!(first.statuses["a"], NodeStatus::Success);
    assert_eq!(marker_lines(&work.join("marker")), 1);

    let second = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert!(second.succeeded());
    assert_eq!(second.statuses["a"], NodeStatus::Cached);
    // The command did not run again.
    assert_eq!(marker_lines(&work.join("marker")), 1);

    let doc = read_run_document(&state, "cached");
    let output = doc.nodes["a"].output.as_ref().expect("cached output");
    assert!(output.cached);
    assert!(output.cache_key.is_some());
    assert_eq!(output.result["stdout"], json!(""));
    Ok(())
}

#[tokio::test]
async fn changed_variable_changes_the_cache_key() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    fs::create_dir_all(&work)?;
    let state = dir.path().join("state");

    let build = || {
        WorkflowBuilder::new("var-keyed")
            .with_var("target", json!("debug"))
            .with_node(
                CommandNodeBuilder::new("a", "echo {{ vars.target }} >> marker")
                    .cwd(&work)
                    .deterministic()
                    .build(),
            )
            .build()
    };

    fresh_run(&state, build(), BTreeMap::new()).await?;
    assert_eq!(marker_lines(&work.join("marker")), 1);

    // Different variable, different fingerprint: runs again.
    let overrides = BTreeMap::from([("target".to_string(), json!("release"))]);
    let report = fresh_run(&state, build(), overrides.clone()).await?;
    assert_eq!(report.statuses["a"], NodeStatus::Success);
    assert_eq!(marker_lines(&work.join("marker")), 2);

    // Same variable again: cache hit.
    let report = fresh_run(&state, build(), overrides).await?;
    assert_eq!(report.statuses["a"], NodeStatus::Cached);
    assert_eq!(marker_lines(&work.join("marker")), 2);
    Ok(())
}

#[tokio::test]
async fn non_deterministic_node_runs_every_time() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let work = dir.path().join("work");
    fs::create_dir_all(&work)?;
    let state = dir.path().join("state");

    let build = || {
        WorkflowBuilder::new("always-runs")
            .with_node(
                CommandNodeBuilder::new("a", "echo ran >> marker")
                    .cwd(&work)
                    .build(),
            )
            .build()
    };

    fresh_run(&state, build(), BTreeMap::new()).await?;
    let report = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert_eq!(report.statuses["a"], NodeStatus::Success);
    assert_eq!(marker_lines(&work.join("marker")), 2);
    Ok(())
}

#[tokio::test]
async fn downstream_of_cached_node_sees_identical_inputs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("state");

    // The fan-in's resolved spec embeds the fan-out's results. With the
    // fan-out cached, the second run resolves to the same spec and the
    // fan-in is cached too.
    let build = || {
        WorkflowBuilder::new("chained-cache")
            .with_var("xs", json!(["one", "two"]))
            .with_node(
                FanOutNodeBuilder::over_command("fan", "{{ vars.xs }}", "echo {{ item }}")
                    .deterministic()
                    .build(),
            )
            .with_node(
                FanInNodeBuilder::command("gather", "echo {{ outputs.fan.result.0.stdout }}")
                    .after(&["fan"])
                    .deterministic()
                    .build(),
            )
            .build()
    };

    let first = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert!(first.succeeded());

    let second = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert_eq!(second.statuses["fan"], NodeStatus::Cached);
    assert_eq!(second.statuses["gather"], NodeStatus::Cached);
    Ok(())
}

#[tokio::test]
async fn cached_output_flows_into_downstream_templates() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("state");

    let build = || {
        WorkflowBuilder::new("cache-flow")
            .with_node(
                CommandNodeBuilder::new("emit", "echo payload")
                    .deterministic()
                    .build(),
            )
            .with_node(
                CommandNodeBuilder::new("use", "echo got {{ outputs.emit.result.stdout }}")
                    .after(&["emit"])
                    .build(),
            )
            .build()
    };

    fresh_run(&state, build(), BTreeMap::new()).await?;
    let report = fresh_run(&state, build(), BTreeMap::new()).await?;
    assert!(report.succeeded());
    assert_eq!(report.statuses["emit"], NodeStatus::Cached);

    let doc = read_run_document(&state, "cache-flow");
    let output = doc.nodes["use"].output.as_ref().expect("downstream output");
    assert_eq!(output.result["stdout"], json!("got payload\n"));
    Ok(())
}
