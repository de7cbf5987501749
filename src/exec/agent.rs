// src/exec/agent.rs

//! Delegated-task nodes: work handed to a registered agent capability.
//!
//! A capability is anything implementing [`AgentCapability`]. The engine
//! treats the call as an opaque async operation with the same contract a
//! command has: it either returns a result value or an error, may write
//! artifacts through the handle it is given, and may log lines that end up
//! on the node's output record.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::dag::node::{AgentSpec, NodeOutput};
use crate::errors::NodeError;

pub type CapabilityError = Box<dyn Error + Send + Sync>;

/// Everything a capability gets to see for one invocation.
pub struct AgentRequest {
    /// Id of the node being executed (or `<node>[i]` for a fan-out item).
    pub node: String,
    pub prompt: String,
    pub inputs: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<String>,
    /// Scoped writer for files the capability wants to persist.
    pub artifacts: ArtifactWriter,
    /// Line sink; collected onto the node's output record.
    pub log: AgentLog,
}

/// What a capability hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub result: Value,
}

#[async_trait]
pub trait AgentCapability: Send + Sync {
    /// Registry name, referenced by `agent:` in node specs.
    fn name(&self) -> &str;

    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply, CapabilityError>;
}

/// Name -> capability map, built once at startup and read-only afterwards.
#[derive(Default)]
pub struct AgentRegistry {
    capabilities: HashMap<String, Arc<dyn AgentCapability>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in capabilities.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EchoCapability));
        registry
    }

    pub fn register(&mut self, capability: Arc<dyn AgentCapability>) {
        self.capabilities
            .insert(capability.name().to_string(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentCapability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Writes capability artifacts under one node-scoped directory and records
/// the relative paths written.
#[derive(Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    written: Arc<Mutex<Vec<String>>>,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a file at `rel` below the artifact root.
    ///
    /// Paths may use subdirectories but must stay inside the root: absolute
    /// paths and `..` components are rejected.
    pub fn write(&self, rel: &str, contents: &[u8]) -> Result<PathBuf, CapabilityError> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute()
            || rel_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(format!("artifact path '{rel}' escapes the artifact directory").into());
        }

        let full = self.root.join(rel_path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full, contents)?;

        if let Ok(mut written) = self.written.lock() {
            written.push(rel.to_string());
        }
        debug!(path = ?full, "capability wrote artifact");
        Ok(full)
    }

    fn take_written(&self) -> Vec<String> {
        self.written
            .lock()
            .map(|mut written| std::mem::take(&mut *written))
            .unwrap_or_default()
    }
}

/// Collects log lines emitted by a capability during one invocation.
#[derive(Clone, Default)]
pub struct AgentLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl AgentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    fn take_lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut lines| std::mem::take(&mut *lines))
            .unwrap_or_default()
    }
}

/// Run one resolved agent spec against the registry.
pub async fn run_agent(
    id: &str,
    spec: &AgentSpec,
    registry: &AgentRegistry,
    artifact_root: &Path,
) -> Result<NodeOutput, NodeError> {
    let Some(capability) = registry.get(&spec.agent) else {
        return Err(NodeError::UnknownAgent {
            name: spec.agent.clone(),
        });
    };

    info!(node = %id, agent = %spec.agent, "invoking agent capability");

    let artifacts = ArtifactWriter::new(artifact_root);
    let log = AgentLog::new();
    let request = AgentRequest {
        node: id.to_string(),
        prompt: spec.prompt.clone(),
        inputs: spec.inputs.clone(),
        env: spec.env.clone(),
        cwd: spec.cwd.clone(),
        artifacts: artifacts.clone(),
        log: log.clone(),
    };

    let invocation = capability.invoke(request);
    let reply = match spec.timeout_secs {
        Some(seconds) => match timeout(Duration::from_secs(seconds), invocation).await {
            Ok(reply) => reply,
            Err(_) => return Err(NodeError::Timeout { seconds }),
        },
        None => invocation.await,
    };
    let reply = reply.map_err(|err| NodeError::Capability(err.to_string()))?;

    Ok(NodeOutput {
        result: reply.result,
        artifacts: artifacts.take_written(),
        logs: log.take_lines(),
        cache_key: None,
        cached: false,
    })
}

/// Built-in capability that echoes its prompt and inputs back as the
/// result. Useful for wiring tests and workflow dry runs against a real
/// registry entry.
pub struct EchoCapability;

#[async_trait]
impl AgentCapability for EchoCapability {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply, CapabilityError> {
        request.log.line(format!("echo: {}", request.prompt));
        let inputs: Value = request
            .inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<String, Value>>()
            .into();
        Ok(AgentReply {
            result: serde_json::json!({
                "prompt": request.prompt,
                "inputs": inputs,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent_spec(agent: &str) -> AgentSpec {
        AgentSpec {
            agent: agent.to_string(),
            prompt: "summarize".to_string(),
            inputs: BTreeMap::from([("k".to_string(), json!("v"))]),
            env: BTreeMap::new(),
            cwd: None,
            timeout_secs: None,
        }
    }

    #[tokio::test]
    async fn echo_capability_round_trips_prompt_and_inputs() {
        let registry = AgentRegistry::with_builtins();
        let dir = tempfile::tempdir().unwrap();

        let output = run_agent("n", &agent_spec("echo"), &registry, dir.path())
            .await
            .unwrap();
        assert_eq!(output.result["prompt"], json!("summarize"));
        assert_eq!(output.result["inputs"]["k"], json!("v"));
        assert_eq!(output.logs, vec!["echo: summarize".to_string()]);
    }

    #[tokio::test]
    async fn unknown_agent_is_a_node_error() {
        let registry = AgentRegistry::with_builtins();
        let dir = tempfile::tempdir().unwrap();

        let err = run_agent("n", &agent_spec("ghost"), &registry, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnknownAgent { .. }));
    }

    #[test]
    fn artifact_writer_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        assert!(writer.write("../outside.txt", b"x").is_err());
        assert!(writer.write("/etc/passwd", b"x").is_err());

        writer.write("sub/inside.txt", b"ok").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("sub/inside.txt")).unwrap(),
            "ok"
        );
        assert_eq!(writer.take_written(), vec!["sub/inside.txt".to_string()]);
    }

    struct FailingCapability;

    #[async_trait]
    impl AgentCapability for FailingCapability {
        fn name(&self) -> &str {
            "failing"
        }

        async fn invoke(&self, _request: AgentRequest) -> Result<AgentReply, CapabilityError> {
            Err("model refused".into())
        }
    }

    #[tokio::test]
    async fn capability_errors_surface_with_their_message() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(FailingCapability));
        let dir = tempfile::tempdir().unwrap();

        let err = run_agent("n", &agent_spec("failing"), &registry, dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model refused"));
    }
}
