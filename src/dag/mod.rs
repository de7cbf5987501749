// src/dag/mod.rs

//! Workflow graph data model and scheduling.
//!
//! - [`node`] holds the immutable node/workflow types, node statuses and
//!   the per-node output record.
//! - [`scheduler`] contains the pure per-tick evaluation that decides
//!   which nodes are ready, which are permanently blocked by upstream
//!   failure, and when the run is complete or deadlocked.

pub mod node;
pub mod scheduler;

pub use node::{
    AgentSpec, CommandSpec, FanInSpec, FanOutSpec, ItemSpec, Node, NodeFailure, NodeId,
    NodeOutput, NodeSpec, NodeStatus, OutputCheck, ResolvedSpec, Workflow,
};
pub use scheduler::{evaluate, RunVerdict, SchedulerStep};
