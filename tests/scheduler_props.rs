// tests/scheduler_props.rs

//! Property tests for the pure scheduler: drive randomly generated acyclic
//! graphs tick by tick and check the run always terminates with the
//! statuses the dependency structure dictates.

mod common;
use crate::common::builders::{CommandNodeBuilder, WorkflowBuilder};

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use rundag::dag::{evaluate, NodeId, NodeStatus, RunVerdict, Workflow};

/// Random acyclic graphs: node `i` may only depend on nodes `0..i`, so the
/// generated edges can never form a cycle.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = Workflow> {
    (1..=max_nodes)
        .prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n)
        })
        .prop_map(|raw_deps| {
            let mut builder = WorkflowBuilder::new("generated");
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let deps: HashSet<usize> = potential
                    .into_iter()
                    .filter_map(|d| (i > 0).then(|| d % i))
                    .collect();
                let dep_ids: Vec<String> = deps.into_iter().map(|d| format!("n{d}")).collect();
                let dep_refs: Vec<&str> = dep_ids.iter().map(String::as_str).collect();
                builder = builder.with_node(
                    CommandNodeBuilder::new(&format!("n{i}"), "true")
                        .after(&dep_refs)
                        .build(),
                );
            }
            builder.build()
        })
}

/// Drive the pure scheduler to a terminal verdict, completing every ready
/// node as Failed when it is in `failing`, Success otherwise. Returns the
/// final statuses, or an error string if the loop did not terminate.
fn simulate(
    workflow: &Workflow,
    failing: &HashSet<NodeId>,
) -> Result<HashMap<NodeId, NodeStatus>, String> {
    let mut statuses: HashMap<NodeId, NodeStatus> = workflow
        .nodes()
        .iter()
        .map(|n| (n.id.clone(), NodeStatus::Pending))
        .collect();

    // Each tick either dispatches or propagates one skip level, so a run
    // over n nodes needs at most 2n + 1 evaluations.
    for _ in 0..(2 * workflow.len() + 1) {
        let step = evaluate(workflow, &statuses);
        for id in &step.newly_skipped {
            statuses.insert(id.clone(), NodeStatus::Skipped);
        }
        match step.verdict {
            RunVerdict::Complete => return Ok(statuses),
            RunVerdict::Deadlocked(stuck) => {
                return Err(format!("unexpected deadlock, stuck: {stuck:?}"))
            }
            RunVerdict::InProgress => {}
        }
        for id in &step.ready {
            let status = if failing.contains(id) {
                NodeStatus::Failed
            } else {
                NodeStatus::Success
            };
            statuses.insert(id.clone(), status);
        }
    }
    Err("scheduler never reported completion".to_string())
}

/// Every node transitively downstream of a node in `roots`.
fn descendants(workflow: &Workflow, roots: &HashSet<NodeId>) -> HashSet<NodeId> {
    let mut reached = HashSet::new();
    // Nodes are declaration-ordered with deps pointing backwards, so one
    // forward pass reaches fixpoint.
    for node in workflow.nodes() {
        if node
            .after
            .iter()
            .any(|dep| roots.contains(dep) || reached.contains(dep))
        {
            reached.insert(node.id.clone());
        }
    }
    reached
}

proptest! {
    #[test]
    fn every_node_completes_when_nothing_fails(workflow in dag_strategy(10)) {
        let statuses = simulate(&workflow, &HashSet::new())
            .map_err(|reason| TestCaseError::fail(reason))?;
        for node in workflow.nodes() {
            prop_assert_eq!(statuses[&node.id], NodeStatus::Success);
        }
    }

    #[test]
    fn failures_skip_exactly_their_descendants(
        workflow in dag_strategy(10),
        failing_indices in proptest::collection::hash_set(0..10usize, 1..4),
    ) {
        let failing: HashSet<NodeId> = failing_indices
            .into_iter()
            .filter(|&i| i < workflow.len())
            .map(|i| format!("n{i}"))
            .collect();
        prop_assume!(!failing.is_empty());

        let statuses = simulate(&workflow, &failing).map_err(|reason| TestCaseError::fail(reason))?;
        let downstream = descendants(&workflow, &failing);

        for node in workflow.nodes() {
            let status = statuses[&node.id];
            if downstream.contains(&node.id) {
                prop_assert_eq!(status, NodeStatus::Skipped, "descendant {} of a failure", node.id);
            } else if failing.contains(&node.id) {
                prop_assert_eq!(status, NodeStatus::Failed, "failing node {}", node.id);
            } else {
                prop_assert_eq!(status, NodeStatus::Success, "unaffected node {}", node.id);
            }
        }
    }
}
