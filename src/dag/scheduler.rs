// src/dag/scheduler.rs

//! Pure per-tick scheduling.
//!
//! [`evaluate`] looks at the workflow graph and the current statuses and
//! decides, without mutating anything, which pending nodes are ready to
//! dispatch, which must be skipped because an upstream dependency failed,
//! and whether the run is complete or deadlocked. The orchestrator folds
//! the result into its own state and calls again on the next tick.

use std::collections::HashMap;

use tracing::debug;

use crate::dag::node::{NodeId, NodeStatus, Workflow};

/// Overall verdict of one scheduler evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunVerdict {
    /// Work remains and can still make progress.
    InProgress,
    /// Every node has reached a terminal status.
    Complete,
    /// No node is ready or running, nothing was newly skipped, yet nodes
    /// remain pending: their dependencies can never be satisfied. Carries
    /// the stuck node ids in declaration order.
    Deadlocked(Vec<NodeId>),
}

/// Structured result of a single scheduler tick.
///
/// `ready` is the entire frontier, freshly recomputed; it is never carried
/// over between ticks. `newly_skipped` holds pending nodes with a failed or
/// skipped dependency; marking them terminal and re-evaluating propagates
/// skips transitively, one tick per graph level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStep {
    pub ready: Vec<NodeId>,
    pub newly_skipped: Vec<NodeId>,
    pub verdict: RunVerdict,
}

/// Evaluate one tick against the current statuses.
///
/// Nodes absent from `statuses` count as pending; a dependency id that
/// names no node in the workflow can never be satisfied and surfaces as a
/// deadlock rather than a panic.
pub fn evaluate(workflow: &Workflow, statuses: &HashMap<NodeId, NodeStatus>) -> SchedulerStep {
    let mut ready = Vec::new();
    let mut newly_skipped = Vec::new();
    let mut waiting = Vec::new();
    let mut running = 0usize;
    let mut terminal = 0usize;

    for node in workflow.nodes() {
        let status = status_of(statuses, &node.id);
        match status {
            NodeStatus::Running => running += 1,
            s if s.is_terminal() => terminal += 1,
            _ => {
                // Pending: decide between skip, ready and waiting.
                let blocked = node
                    .after
                    .iter()
                    .any(|dep| status_of(statuses, dep).is_blocking());
                if blocked {
                    newly_skipped.push(node.id.clone());
                } else if node
                    .after
                    .iter()
                    .all(|dep| status_of(statuses, dep).is_satisfied())
                {
                    ready.push(node.id.clone());
                } else {
                    waiting.push(node.id.clone());
                }
            }
        }
    }

    let verdict = if terminal == workflow.len() {
        RunVerdict::Complete
    } else if ready.is_empty() && newly_skipped.is_empty() && running == 0 && !waiting.is_empty() {
        RunVerdict::Deadlocked(waiting)
    } else {
        RunVerdict::InProgress
    };

    debug!(
        ready = ?ready,
        newly_skipped = ?newly_skipped,
        verdict = ?verdict,
        "scheduler tick evaluated"
    );

    SchedulerStep {
        ready,
        newly_skipped,
        verdict,
    }
}

fn status_of(statuses: &HashMap<NodeId, NodeStatus>, id: &str) -> NodeStatus {
    statuses.get(id).copied().unwrap_or(NodeStatus::Pending)
}
