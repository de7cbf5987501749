// src/dag/node.rs

//! Immutable workflow/node types plus the per-node status and output
//! records that flow through the scheduler and executors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::workflow::model::{
    AgentDef, CommandDef, ItemDef, NodeDef, OutputCheckDef, SpecDef, WorkflowDef,
};

/// Public type alias for node identifiers throughout the engine.
pub type NodeId = String;

/// Lifecycle status of a node within one run.
///
/// `Pending -> Running -> {Success | Cached | Failed}`, or
/// `Pending -> Skipped` when an upstream dependency failed or was skipped.
/// A node leaves `Pending` exactly once and `Skipped` is only ever entered
/// before the node has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Cached,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Terminal statuses are never re-evaluated by the scheduler.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Success | NodeStatus::Cached | NodeStatus::Failed | NodeStatus::Skipped
        )
    }

    /// A dependency in this status counts as satisfied.
    pub fn is_satisfied(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Cached)
    }

    /// A dependency in this status permanently blocks its dependents.
    pub fn is_blocking(self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Success => "success",
            NodeStatus::Cached => "cached",
            NodeStatus::Failed => "failed",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Output record produced by every completed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Opaque result value; shape depends on the node kind and its
    /// output-verification spec.
    pub result: Value,

    /// Paths of artifacts the node produced (as declared/reported).
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Log lines collected during execution, if any.
    #[serde(default)]
    pub logs: Vec<String>,

    /// Cache key the output was (or would be) stored under; present iff
    /// the node is deterministic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    /// True when this output was served from the cache instead of executed.
    #[serde(default)]
    pub cached: bool,
}

impl NodeOutput {
    /// The output as seen from templates (`{{ outputs.<id>... }}`).
    pub fn to_scope_value(&self) -> Value {
        json!({
            "result": self.result,
            "artifacts": self.artifacts,
            "logs": self.logs,
            "cache_key": self.cache_key,
            "cached": self.cached,
        })
    }
}

/// One recorded node failure: the failing node plus its rendered error.
///
/// Kept as a collection on the run state since a tick may complete several
/// failing nodes at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: String,
}

/// Spec for a command node: an external process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSpec {
    /// The command line. Run through the platform shell when `args` is
    /// empty, otherwise spawned directly with `args` as its argv tail.
    pub cmd: String,
    pub args: Vec<String>,
    /// Extra environment variables overlaid on the inherited environment.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Optional output verification applied after a zero exit.
    pub check: Option<OutputCheck>,
}

/// Output-verification spec for command nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputCheck {
    /// Paths (relative to the node's cwd) that must exist after execution.
    pub artifacts: Vec<String>,
    /// Optional artifact parsed as JSON and used as the node's result.
    pub parse_result: Option<String>,
}

/// Spec for a delegated-task node: work handed to a named agent capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSpec {
    /// Registry name of the capability that executes this node.
    pub agent: String,
    pub prompt: String,
    pub inputs: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Per-item sub-spec of a fan-out node, or the aggregation sub-spec of a
/// fan-in node. Deliberately restricted to the two leaf kinds so fan-outs
/// cannot nest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ItemSpec {
    Command(CommandSpec),
    Agent(AgentSpec),
}

/// Spec for a fan-out (map) node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanOutSpec {
    /// Expression that must resolve to an array; one sub-execution per item.
    pub over: String,
    /// Name the current item is bound to in the per-item template scope.
    pub item_var: String,
    /// Concurrency ceiling for the node's own sub-executions.
    pub parallel: usize,
    pub spec: ItemSpec,
}

/// Spec for a fan-in (reduce) node: one aggregation sub-spec, with the
/// upstream fan-out's ordered results reachable through `{{ outputs.<id> }}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanInSpec {
    pub spec: ItemSpec,
}

/// Kind-specific spec of a node, still carrying unresolved templates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeSpec {
    Command(CommandSpec),
    Agent(AgentSpec),
    FanOut(FanOutSpec),
    FanIn(FanInSpec),
}

impl NodeSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeSpec::Command(_) => "command",
            NodeSpec::Agent(_) => "agent",
            NodeSpec::FanOut(_) => "fan-out",
            NodeSpec::FanIn(_) => "fan-in",
        }
    }
}

/// A node spec after template resolution, ready for dispatch.
///
/// Fan-out keeps its sub-spec unresolved: each item re-resolves it with the
/// item bound into the scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolvedSpec {
    Command(CommandSpec),
    Agent(AgentSpec),
    FanOut {
        items: Vec<Value>,
        item_var: String,
        parallel: usize,
        spec: ItemSpec,
    },
    FanIn(ItemSpec),
}

/// One unit of work in the workflow graph. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// Dependency ids: this node waits for all of them.
    pub after: Vec<NodeId>,
    /// Whether the node's output may be cached by content hash.
    pub deterministic: bool,
    pub spec: NodeSpec,
}

/// A validated, in-memory workflow: nodes in declaration order plus an
/// id index for constant-time lookup.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    /// Workflow-level variables, read-only after run initialisation.
    pub vars: BTreeMap<String, Value>,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
}

impl Workflow {
    /// Build a workflow from parts. Assumes node ids are unique (enforced
    /// by `workflow::validate` for loaded definitions).
    pub fn new(name: impl Into<String>, vars: BTreeMap<String, Value>, nodes: Vec<Node>) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self {
            name: name.into(),
            vars,
            nodes,
            index,
        }
    }

    /// Compile a parsed workflow definition into the runtime form.
    pub fn from_def(def: &WorkflowDef) -> Self {
        let nodes = def.nodes.iter().map(compile_node).collect();
        Self::new(def.name.clone(), def.vars.clone(), nodes)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn compile_node(def: &NodeDef) -> Node {
    Node {
        id: def.id.clone(),
        after: def.after.clone(),
        deterministic: def.deterministic,
        spec: compile_spec(&def.spec),
    }
}

fn compile_spec(def: &SpecDef) -> NodeSpec {
    match def {
        SpecDef::Command(c) => NodeSpec::Command(compile_command(c)),
        SpecDef::Agent(a) => NodeSpec::Agent(compile_agent(a)),
        SpecDef::FanOut(f) => NodeSpec::FanOut(FanOutSpec {
            over: f.over.clone(),
            item_var: f.item_var.clone(),
            parallel: f.parallel,
            spec: compile_item(&f.spec),
        }),
        SpecDef::FanIn(f) => NodeSpec::FanIn(FanInSpec {
            spec: compile_item(&f.spec),
        }),
    }
}

fn compile_item(def: &ItemDef) -> ItemSpec {
    match def {
        ItemDef::Command(c) => ItemSpec::Command(compile_command(c)),
        ItemDef::Agent(a) => ItemSpec::Agent(compile_agent(a)),
    }
}

fn compile_command(def: &CommandDef) -> CommandSpec {
    CommandSpec {
        cmd: def.cmd.clone(),
        args: def.args.clone(),
        env: def.env.clone(),
        cwd: def.cwd.clone(),
        timeout_secs: def.timeout_secs,
        check: def.outputs.as_ref().map(compile_check),
    }
}

fn compile_check(def: &OutputCheckDef) -> OutputCheck {
    OutputCheck {
        artifacts: def.artifacts.clone(),
        parse_result: def.parse_result.clone(),
    }
}

fn compile_agent(def: &AgentDef) -> AgentSpec {
    AgentSpec {
        agent: def.agent.clone(),
        prompt: def.prompt.clone(),
        inputs: def.inputs.clone(),
        env: def.env.clone(),
        cwd: def.cwd.clone(),
        timeout_secs: def.timeout_secs,
    }
}
