// src/engine/state.rs

//! Mutable state of one run: variables, per-node statuses and outputs,
//! recorded failures. This is the in-memory twin of the checkpoint
//! snapshot.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::dag::node::{NodeFailure, NodeId, NodeOutput, NodeStatus, Workflow};
use crate::store::checkpoint::RunSnapshot;

#[derive(Debug)]
pub struct RunState {
    /// Effective variables for this run, fixed at initialisation.
    pub vars: BTreeMap<String, Value>,
    pub statuses: HashMap<NodeId, NodeStatus>,
    pub outputs: BTreeMap<NodeId, NodeOutput>,
    /// Outputs pre-converted for template lookups (`{{ outputs.<id>... }}`).
    pub scope_outputs: BTreeMap<NodeId, Value>,
    pub failures: Vec<NodeFailure>,
}

impl RunState {
    /// Fresh state: every node pending, workflow vars overlaid with the
    /// CLI overrides.
    pub fn fresh(workflow: &Workflow, overrides: BTreeMap<String, Value>) -> Self {
        let mut vars = workflow.vars.clone();
        vars.extend(overrides);

        let statuses = workflow
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), NodeStatus::Pending))
            .collect();

        Self {
            vars,
            statuses,
            outputs: BTreeMap::new(),
            scope_outputs: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    /// State rebuilt from a checkpoint.
    ///
    /// Satisfied nodes (success or cached) keep their status and output.
    /// Everything else goes back to pending: failed and skipped nodes get
    /// another chance, and a node checkpointed as running belongs to an
    /// interrupted attempt that never completed. Failures are cleared and
    /// the snapshot's variables win so the resumed run sees what the
    /// original run saw.
    pub fn restored(workflow: &Workflow, snapshot: RunSnapshot) -> Self {
        let mut state = Self {
            vars: snapshot.vars,
            statuses: HashMap::with_capacity(workflow.len()),
            outputs: BTreeMap::new(),
            scope_outputs: BTreeMap::new(),
            failures: Vec::new(),
        };

        for node in workflow.nodes() {
            let previous = snapshot
                .statuses
                .get(&node.id)
                .copied()
                .unwrap_or(NodeStatus::Pending);
            if previous.is_satisfied() {
                state.statuses.insert(node.id.clone(), previous);
                if let Some(output) = snapshot.outputs.get(&node.id) {
                    state.record_output(&node.id, output.clone());
                }
            } else {
                state.statuses.insert(node.id.clone(), NodeStatus::Pending);
            }
        }

        state
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            vars: self.vars.clone(),
            statuses: self
                .statuses
                .iter()
                .map(|(id, status)| (id.clone(), *status))
                .collect(),
            outputs: self.outputs.clone(),
            failures: self.failures.clone(),
        }
    }

    pub fn status(&self, id: &str) -> NodeStatus {
        self.statuses.get(id).copied().unwrap_or(NodeStatus::Pending)
    }

    pub fn set_status(&mut self, id: &str, status: NodeStatus) {
        self.statuses.insert(id.to_string(), status);
    }

    pub fn record_output(&mut self, id: &str, output: NodeOutput) {
        self.scope_outputs
            .insert(id.to_string(), output.to_scope_value());
        self.outputs.insert(id.to_string(), output);
    }

    pub fn record_failure(&mut self, id: &str, error: String) {
        self.failures.push(NodeFailure {
            node: id.to_string(),
            error,
        });
    }
}
