// src/engine/runtime.rs

//! The run loop.
//!
//! Responsibilities:
//! - Drive the workflow tick by tick: evaluate the scheduler, dispatch the
//!   ready frontier concurrently, fold completions back into run state.
//! - Record every transition in the run store and checkpoint after each
//!   tick so an interrupted run can resume.
//! - Close out with a [`RunReport`] covering statuses, failures and any
//!   deadlocked nodes.
//!
//! One control loop owns all state; executions only ever see immutable
//! borrows of it, so there is no locking anywhere in the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use futures::future;
use serde_json::Value;
use tracing::{info, warn};

use crate::dag::node::{Node, NodeFailure, NodeId, NodeStatus, Workflow};
use crate::dag::scheduler::{evaluate, RunVerdict};
use crate::engine::state::RunState;
use crate::exec::executor::NodeExecutor;
use crate::store::checkpoint::CheckpointStore;
use crate::store::run_store::{RunStatus, RunStore};
use crate::template::Scope;

/// Final account of one run attempt.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Overall error line for failed runs (node failures or deadlock).
    pub error: Option<String>,
    pub statuses: BTreeMap<NodeId, NodeStatus>,
    pub failures: Vec<NodeFailure>,
    /// Nodes that can never run; non-empty only for deadlocked runs.
    pub stuck: Vec<NodeId>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Owns one run of one workflow from initial state to report.
pub struct Runner {
    workflow: Workflow,
    executor: NodeExecutor,
    run_store: RunStore,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Runner {
    pub fn new(
        workflow: Workflow,
        executor: NodeExecutor,
        run_store: RunStore,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            workflow,
            executor,
            run_store,
            checkpoints,
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn thread_id(&self) -> &str {
        self.run_store.thread_id()
    }

    /// Start from scratch: all nodes pending, overrides applied on top of
    /// the workflow's variables.
    pub async fn run_fresh(&mut self, overrides: BTreeMap<String, Value>) -> Result<RunReport> {
        info!(
            workflow = %self.workflow.name,
            thread_id = %self.run_store.thread_id(),
            nodes = self.workflow.len(),
            "starting run"
        );
        let mut state = RunState::fresh(&self.workflow, overrides);
        self.run_store.begin_fresh()?;
        self.checkpoint(&state)?;
        self.drive(&mut state).await
    }

    /// Resume the workflow's thread from its latest checkpoint. Without a
    /// checkpoint this degrades to a fresh run.
    pub async fn resume(&mut self, overrides: BTreeMap<String, Value>) -> Result<RunReport> {
        let snapshot = self.checkpoints.load(self.run_store.thread_id())?;
        let mut state = match snapshot {
            Some(snapshot) => {
                info!(
                    workflow = %self.workflow.name,
                    thread_id = %self.run_store.thread_id(),
                    "resuming from checkpoint"
                );
                if !overrides.is_empty() {
                    warn!("ignoring variable overrides on resume, snapshot variables win");
                }
                let state = RunState::restored(&self.workflow, snapshot);
                self.run_store
                    .begin_resume(&self.workflow, &state.statuses, &state.outputs)?;
                state
            }
            None => {
                warn!(
                    workflow = %self.workflow.name,
                    thread_id = %self.run_store.thread_id(),
                    "no checkpoint for thread, starting fresh"
                );
                let state = RunState::fresh(&self.workflow, overrides);
                self.run_store.begin_fresh()?;
                state
            }
        };
        self.checkpoint(&state)?;
        self.drive(&mut state).await
    }

    /// Tick until the scheduler reports completion or deadlock.
    async fn drive(&mut self, state: &mut RunState) -> Result<RunReport> {
        loop {
            let step = evaluate(&self.workflow, &state.statuses);

            for id in step.newly_skipped.iter() {
                info!(node = %id, "skipping node, upstream failed or was skipped");
                state.set_status(id, NodeStatus::Skipped);
                self.run_store.record_skipped(id)?;
            }

            match step.verdict {
                RunVerdict::Complete => return self.finish(state, Vec::new()),
                RunVerdict::Deadlocked(stuck) => {
                    self.checkpoint(state)?;
                    return self.finish(state, stuck);
                }
                RunVerdict::InProgress => {}
            }

            if step.ready.is_empty() {
                if step.newly_skipped.is_empty() {
                    bail!("scheduler made no progress with nodes still pending");
                }
                // Skip propagation continues on the next tick.
                self.checkpoint(state)?;
                continue;
            }

            for id in step.ready.iter() {
                state.set_status(id, NodeStatus::Running);
                self.run_store.record_started(id)?;
            }

            let nodes: Vec<&Node> = step
                .ready
                .iter()
                .filter_map(|id| self.workflow.node(id))
                .collect();
            let scope = Scope::new(&state.vars, &state.scope_outputs);
            let executor = &self.executor;
            let completions = future::join_all(nodes.into_iter().map(|node| async move {
                (node.id.clone(), executor.execute(node, &scope).await)
            }))
            .await;

            for (id, result) in completions {
                match result {
                    Ok(output) => {
                        let status = if output.cached {
                            NodeStatus::Cached
                        } else {
                            NodeStatus::Success
                        };
                        info!(node = %id, status = %status, "node finished");
                        self.run_store
                            .record_completed(&id, status, Some(&output), None)?;
                        state.record_output(&id, output);
                        state.set_status(&id, status);
                    }
                    Err(err) => {
                        let message = err.to_string();
                        warn!(node = %id, error = %message, "node failed");
                        self.run_store.record_completed(
                            &id,
                            NodeStatus::Failed,
                            None,
                            Some(&message),
                        )?;
                        state.set_status(&id, NodeStatus::Failed);
                        state.record_failure(&id, message);
                    }
                }
            }

            self.checkpoint(state)?;
        }
    }

    fn checkpoint(&self, state: &RunState) -> Result<()> {
        self.checkpoints
            .save(self.run_store.thread_id(), &state.snapshot())
    }

    fn finish(&mut self, state: &RunState, stuck: Vec<NodeId>) -> Result<RunReport> {
        let (status, error) = if !stuck.is_empty() {
            (
                RunStatus::Failed,
                Some(format!(
                    "deadlock: nodes [{}] can never run",
                    stuck.join(", ")
                )),
            )
        } else if !state.failures.is_empty() {
            (
                RunStatus::Failed,
                Some(format!("{} node(s) failed", state.failures.len())),
            )
        } else {
            (RunStatus::Succeeded, None)
        };

        self.run_store.finish(status, error.clone())?;
        info!(
            workflow = %self.workflow.name,
            status = %status,
            "run finished"
        );

        Ok(RunReport {
            workflow: self.workflow.name.clone(),
            thread_id: self.run_store.thread_id().to_string(),
            status,
            error,
            statuses: state
                .statuses
                .iter()
                .map(|(id, s)| (id.clone(), *s))
                .collect(),
            failures: state.failures.clone(),
            stuck,
        })
    }
}
