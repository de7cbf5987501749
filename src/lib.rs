// src/lib.rs

pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod store;
pub mod template;
pub mod workflow;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::debug;

use crate::cli::{parse_var_overrides, CliArgs, CliCommand};
use crate::dag::{NodeSpec, Workflow};
use crate::engine::{RunReport, Runner};
use crate::exec::{AgentRegistry, NodeExecutor};
use crate::store::{FsCacheStore, FsCheckpointStore, RunStore};
use crate::workflow::load_workflow;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow loading and validation
/// - run store, cache and checkpoint persistence
/// - the node executor with the built-in capability registry
/// - the tick loop
pub async fn run(args: CliArgs) -> Result<()> {
    run_with_registry(args, AgentRegistry::with_builtins()).await
}

/// Same as [`run`] but with a caller-supplied registry, for embedders that
/// bring their own agent capabilities.
pub async fn run_with_registry(args: CliArgs, registry: AgentRegistry) -> Result<()> {
    let (run_args, resume) = match args.command {
        CliCommand::Run(a) => (a, false),
        CliCommand::Resume(a) => (a, true),
    };

    let workflow = load_workflow(&run_args.workflow)?;
    let overrides = parse_var_overrides(&run_args.vars)?;

    if run_args.dry_run {
        print_plan(&workflow, &overrides);
        return Ok(());
    }

    let state_dir = PathBuf::from(&run_args.state_dir);
    let run_store = RunStore::open(&state_dir, &workflow)?;
    let cache = Arc::new(FsCacheStore::new(state_dir.join("cache")));
    let checkpoints = Arc::new(FsCheckpointStore::new(run_store.checkpoints_dir()));
    let executor = NodeExecutor::new(registry, cache, run_store.artifacts_root());

    let mut runner = Runner::new(workflow, executor, run_store, checkpoints);
    let report = if resume {
        runner.resume(overrides).await?
    } else {
        runner.run_fresh(overrides).await?
    };

    print_report(runner.workflow(), &report);

    if !report.succeeded() {
        bail!(report
            .error
            .clone()
            .unwrap_or_else(|| "run failed".to_string()));
    }
    Ok(())
}

/// Dry-run output: the validated plan, nothing executed, no state touched.
fn print_plan(workflow: &Workflow, overrides: &BTreeMap<String, Value>) {
    println!("rundag dry-run");
    println!("  workflow: {}", workflow.name);

    let mut vars = workflow.vars.clone();
    vars.extend(overrides.clone());
    if !vars.is_empty() {
        println!("  vars:");
        for (key, value) in vars.iter() {
            println!("    {key} = {value}");
        }
    }

    println!();
    println!("nodes ({}):", workflow.len());
    for node in workflow.nodes() {
        println!("  - {} ({})", node.id, node.spec.kind());
        if !node.after.is_empty() {
            println!("      after: {:?}", node.after);
        }
        if node.deterministic {
            println!("      deterministic: true");
        }
        match &node.spec {
            NodeSpec::Command(cmd) => println!("      cmd: {}", cmd.cmd),
            NodeSpec::Agent(agent) => println!("      agent: {}", agent.agent),
            NodeSpec::FanOut(fan) => {
                println!("      over: {}", fan.over);
                println!("      parallel: {}", fan.parallel);
            }
            NodeSpec::FanIn(_) => {}
        }
    }

    debug!("dry-run complete (no execution)");
}

fn print_report(workflow: &Workflow, report: &RunReport) {
    println!(
        "workflow '{}' {} (thread {})",
        report.workflow, report.status, report.thread_id
    );
    for node in workflow.nodes() {
        if let Some(status) = report.statuses.get(&node.id) {
            println!("  {status:<8} {}", node.id);
        }
    }
    for failure in report.failures.iter() {
        println!("  error in '{}': {}", failure.node, failure.error);
    }
    if !report.stuck.is_empty() {
        println!("  stuck: {}", report.stuck.join(", "));
    }
}
