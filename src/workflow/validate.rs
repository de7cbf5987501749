// src/workflow/validate.rs

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::workflow::model::{SpecDef, WorkflowDef};

/// Run basic semantic validation against a loaded workflow definition.
///
/// This checks:
/// - there is at least one node
/// - node ids are unique
/// - all `after` dependencies refer to existing nodes
/// - no node depends on itself
/// - fan-out `parallel` is at least 1
/// - the node graph has no cycles
///
/// It does **not** resolve templates: placeholders like `{{ vars.x }}` are
/// only checked at run time, once upstream outputs exist.
pub fn validate_workflow(def: &WorkflowDef) -> Result<()> {
    ensure_has_nodes(def)?;
    validate_unique_ids(def)?;
    validate_dependencies(def)?;
    validate_specs(def)?;
    validate_dag(def)?;
    Ok(())
}

fn ensure_has_nodes(def: &WorkflowDef) -> Result<()> {
    if def.nodes.is_empty() {
        return Err(anyhow!("workflow '{}' must contain at least one node", def.name));
    }
    Ok(())
}

fn validate_unique_ids(def: &WorkflowDef) -> Result<()> {
    let mut seen = HashSet::new();
    for node in def.nodes.iter() {
        if node.id.is_empty() {
            return Err(anyhow!("workflow '{}' contains a node with an empty id", def.name));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(anyhow!("duplicate node id '{}'", node.id));
        }
    }
    Ok(())
}

fn validate_dependencies(def: &WorkflowDef) -> Result<()> {
    let ids: HashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();
    for node in def.nodes.iter() {
        for dep in node.after.iter() {
            if !ids.contains(dep.as_str()) {
                return Err(anyhow!(
                    "node '{}' has unknown dependency '{}' in `after`",
                    node.id,
                    dep
                ));
            }
            if dep == &node.id {
                return Err(anyhow!("node '{}' cannot depend on itself in `after`", node.id));
            }
        }
    }
    Ok(())
}

fn validate_specs(def: &WorkflowDef) -> Result<()> {
    for node in def.nodes.iter() {
        if let SpecDef::FanOut(fan) = &node.spec {
            if fan.parallel == 0 {
                return Err(anyhow!(
                    "node '{}' has `parallel = 0`; fan-out needs at least 1",
                    node.id
                ));
            }
            if fan.item_var.is_empty() || fan.item_var.contains('.') {
                return Err(anyhow!(
                    "node '{}' has invalid `item_var` '{}'",
                    node.id,
                    fan.item_var
                ));
            }
            // The item binding shadows scope roots, so reserve those names.
            if fan.item_var == "vars" || fan.item_var == "outputs" {
                return Err(anyhow!(
                    "node '{}' cannot use reserved `item_var` '{}'",
                    node.id,
                    fan.item_var
                ));
            }
        }
    }
    Ok(())
}

fn validate_dag(def: &WorkflowDef) -> Result<()> {
    // Build a simple petgraph graph from the nodes and their dependencies.
    //
    // Edge direction: dep -> node
    // For:
    //   - id: b
    //     after: ["a"]
    // we add edge a -> b.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for node in def.nodes.iter() {
        graph.add_node(node.id.as_str());
    }

    for node in def.nodes.iter() {
        for dep in node.after.iter() {
            graph.add_edge(dep.as_str(), node.id.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            let node = cycle.node_id();
            Err(anyhow!("cycle detected in workflow DAG involving node '{}'", node))
        }
    }
}
