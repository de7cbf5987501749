//! Builders for assembling in-memory workflows and a wired-up runner in
//! tests, without going through YAML files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use rundag::dag::{
    AgentSpec, CommandSpec, FanInSpec, FanOutSpec, ItemSpec, Node, NodeSpec, Workflow,
};
use rundag::engine::Runner;
use rundag::exec::{AgentRegistry, NodeExecutor};
use rundag::store::{FsCacheStore, FsCheckpointStore, RunStore};

pub struct WorkflowBuilder {
    name: String,
    vars: BTreeMap<String, Value>,
    nodes: Vec<Node>,
}

impl WorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vars: BTreeMap::new(),
            nodes: Vec::new(),
        }
    }

    pub fn with_var(mut self, key: &str, value: Value) -> Self {
        self.vars.insert(key.to_string(), value);
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn build(self) -> Workflow {
        Workflow::new(self.name, self.vars, self.nodes)
    }
}

pub struct CommandNodeBuilder {
    node: Node,
}

impl CommandNodeBuilder {
    pub fn new(id: &str, cmd: &str) -> Self {
        Self {
            node: Node {
                id: id.to_string(),
                after: Vec::new(),
                deterministic: false,
                spec: NodeSpec::Command(command_spec(cmd)),
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.node.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn deterministic(mut self) -> Self {
        self.node.deterministic = true;
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        if let NodeSpec::Command(spec) = &mut self.node.spec {
            spec.cwd = Some(dir.to_string_lossy().to_string());
        }
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        if let NodeSpec::Command(spec) = &mut self.node.spec {
            spec.timeout_secs = Some(secs);
        }
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

pub struct AgentNodeBuilder {
    node: Node,
}

impl AgentNodeBuilder {
    pub fn new(id: &str, agent: &str, prompt: &str) -> Self {
        Self {
            node: Node {
                id: id.to_string(),
                after: Vec::new(),
                deterministic: false,
                spec: NodeSpec::Agent(agent_spec(agent, prompt)),
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.node.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_input(mut self, key: &str, value: Value) -> Self {
        if let NodeSpec::Agent(spec) = &mut self.node.spec {
            spec.inputs.insert(key.to_string(), value);
        }
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        if let NodeSpec::Agent(spec) = &mut self.node.spec {
            spec.timeout_secs = Some(secs);
        }
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

pub struct FanOutNodeBuilder {
    node: Node,
}

impl FanOutNodeBuilder {
    /// Fan-out running a command per item.
    pub fn over_command(id: &str, over: &str, cmd: &str) -> Self {
        Self {
            node: Node {
                id: id.to_string(),
                after: Vec::new(),
                deterministic: false,
                spec: NodeSpec::FanOut(FanOutSpec {
                    over: over.to_string(),
                    item_var: "item".to_string(),
                    parallel: 4,
                    spec: ItemSpec::Command(command_spec(cmd)),
                }),
            },
        }
    }

    /// Fan-out invoking an agent capability per item.
    pub fn over_agent(id: &str, over: &str, agent: &str, prompt: &str) -> Self {
        Self {
            node: Node {
                id: id.to_string(),
                after: Vec::new(),
                deterministic: false,
                spec: NodeSpec::FanOut(FanOutSpec {
                    over: over.to_string(),
                    item_var: "item".to_string(),
                    parallel: 4,
                    spec: ItemSpec::Agent(agent_spec(agent, prompt)),
                }),
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.node.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn parallel(mut self, parallel: usize) -> Self {
        if let NodeSpec::FanOut(spec) = &mut self.node.spec {
            spec.parallel = parallel;
        }
        self
    }

    pub fn deterministic(mut self) -> Self {
        self.node.deterministic = true;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

pub struct FanInNodeBuilder {
    node: Node,
}

impl FanInNodeBuilder {
    pub fn command(id: &str, cmd: &str) -> Self {
        Self {
            node: Node {
                id: id.to_string(),
                after: Vec::new(),
                deterministic: false,
                spec: NodeSpec::FanIn(FanInSpec {
                    spec: ItemSpec::Command(command_spec(cmd)),
                }),
            },
        }
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.node.after = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn deterministic(mut self) -> Self {
        self.node.deterministic = true;
        self
    }

    pub fn build(self) -> Node {
        self.node
    }
}

fn command_spec(cmd: &str) -> CommandSpec {
    CommandSpec {
        cmd: cmd.to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        cwd: None,
        timeout_secs: None,
        check: None,
    }
}

fn agent_spec(agent: &str, prompt: &str) -> AgentSpec {
    AgentSpec {
        agent: agent.to_string(),
        prompt: prompt.to_string(),
        inputs: BTreeMap::new(),
        env: BTreeMap::new(),
        cwd: None,
        timeout_secs: None,
    }
}

/// Wire a runner the same way the CLI does, against a test state dir.
pub fn make_runner(
    state_dir: &Path,
    workflow: Workflow,
    registry: AgentRegistry,
) -> anyhow::Result<Runner> {
    let run_store = RunStore::open(state_dir, &workflow)?;
    let cache = Arc::new(FsCacheStore::new(state_dir.join("cache")));
    let checkpoints = Arc::new(FsCheckpointStore::new(run_store.checkpoints_dir()));
    let executor = NodeExecutor::new(registry, cache, run_store.artifacts_root());
    Ok(Runner::new(workflow, executor, run_store, checkpoints))
}

/// Read the persisted run document for a workflow from a test state dir.
pub fn read_run_document(state_dir: &Path, workflow: &str) -> rundag::store::RunDocument {
    let path = state_dir.join(workflow).join("run.json");
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("reading {path:?}: {err}"));
    serde_json::from_str(&contents).unwrap_or_else(|err| panic!("parsing {path:?}: {err}"))
}
