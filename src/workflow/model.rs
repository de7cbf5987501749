// src/workflow/model.rs

//! Serde models for the workflow file.
//!
//! These structs mirror the YAML layout one to one and stay permissive:
//! defaults fill optional fields and validation happens in a separate
//! pass. The engine compiles them into [`crate::dag::Workflow`] before
//! running anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top level workflow document.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

/// One node entry. The `kind` tag selects the spec variant; the remaining
/// keys of the mapping are the variant's own fields.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeDef {
    pub id: String,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub deterministic: bool,
    #[serde(flatten)]
    pub spec: SpecDef,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SpecDef {
    Command(CommandDef),
    Agent(AgentDef),
    FanOut(FanOutDef),
    FanIn(FanInDef),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CommandDef {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub outputs: Option<OutputCheckDef>,
}

/// Post-run verification for a command node.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OutputCheckDef {
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub parse_result: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AgentDef {
    pub agent: String,
    pub prompt: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Fan-out over a list. The per-item work is given under a `command:` or
/// `agent:` key; nested fan-out is not representable.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FanOutDef {
    pub over: String,
    #[serde(default = "default_item_var")]
    pub item_var: String,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(flatten)]
    pub spec: ItemDef,
}

/// Fan-in runs a single spec once its fan-out partner has finished.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FanInDef {
    #[serde(flatten)]
    pub spec: ItemDef,
}

/// Work description nested under a fan-out or fan-in entry.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ItemDef {
    Command(CommandDef),
    Agent(AgentDef),
}

fn default_item_var() -> String {
    "item".to_string()
}

fn default_parallel() -> usize {
    4
}
