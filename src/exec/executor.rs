// src/exec/executor.rs

//! Node dispatch: resolve the spec against the run scope, consult the
//! cache for deterministic nodes, then hand off to the kind-specific
//! runner.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::dag::node::{ItemSpec, Node, NodeOutput, ResolvedSpec};
use crate::errors::NodeError;
use crate::exec::agent::{self, AgentRegistry};
use crate::exec::command;
use crate::store::cache::{content_key, CacheStore};
use crate::template::Scope;

pub struct NodeExecutor {
    registry: AgentRegistry,
    cache: Arc<dyn CacheStore>,
    artifacts_root: PathBuf,
}

impl NodeExecutor {
    pub fn new(
        registry: AgentRegistry,
        cache: Arc<dyn CacheStore>,
        artifacts_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            cache,
            artifacts_root: artifacts_root.into(),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Execute one node end to end.
    ///
    /// Deterministic nodes are fingerprinted after template resolution; a
    /// cache hit returns the stored output without side effects, a miss
    /// executes and then stores. Cache read problems degrade to a miss.
    pub async fn execute(&self, node: &Node, scope: &Scope<'_>) -> Result<NodeOutput, NodeError> {
        let resolved = scope.resolve_spec(&node.spec)?;

        let key = if node.deterministic {
            let key = fingerprint(&resolved)?;
            match self.cache.get(&key) {
                Ok(Some(mut output)) => {
                    debug!(node = %node.id, key = %key, "cache hit");
                    output.cached = true;
                    output.cache_key = Some(key);
                    return Ok(output);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(node = %node.id, error = %err, "cache read failed, treating as miss");
                }
            }
            Some(key)
        } else {
            None
        };

        let mut output = self.dispatch(node, scope, resolved).await?;

        if let Some(key) = key {
            // Store a copy without the per-run cache metadata.
            let mut entry = output.clone();
            entry.cached = false;
            entry.cache_key = None;
            if let Err(err) = self.cache.put(&key, &entry) {
                warn!(node = %node.id, error = %err, "cache write failed");
            }
            output.cache_key = Some(key);
        }

        Ok(output)
    }

    async fn dispatch(
        &self,
        node: &Node,
        scope: &Scope<'_>,
        resolved: ResolvedSpec,
    ) -> Result<NodeOutput, NodeError> {
        match resolved {
            ResolvedSpec::Command(spec) => command::run_command(&node.id, &spec).await,
            ResolvedSpec::Agent(spec) => {
                let dir = self.artifacts_root.join(&node.id);
                agent::run_agent(&node.id, &spec, &self.registry, &dir).await
            }
            ResolvedSpec::FanOut {
                items,
                item_var,
                parallel,
                spec,
            } => {
                self.run_fan_out(&node.id, scope, items, &item_var, parallel, &spec)
                    .await
            }
            ResolvedSpec::FanIn(spec) => {
                let dir = self.artifacts_root.join(&node.id);
                self.run_item(&node.id, &dir, &spec).await
            }
        }
    }

    /// Run one already-resolved leaf spec. Shared by fan-out items and
    /// fan-in aggregation.
    pub(crate) async fn run_item(
        &self,
        label: &str,
        artifact_dir: &Path,
        spec: &ItemSpec,
    ) -> Result<NodeOutput, NodeError> {
        match spec {
            ItemSpec::Command(cmd) => command::run_command(label, cmd).await,
            ItemSpec::Agent(agent_spec) => {
                agent::run_agent(label, agent_spec, &self.registry, artifact_dir).await
            }
        }
    }

    pub(crate) fn artifacts_root(&self) -> &Path {
        &self.artifacts_root
    }
}

fn fingerprint(resolved: &ResolvedSpec) -> Result<String, NodeError> {
    content_key(resolved).map_err(|err| NodeError::Process(format!("fingerprinting spec: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::node::{CommandSpec, NodeSpec};
    use crate::store::cache::MemoryCacheStore;
    use std::collections::BTreeMap;
    use serde_json::json;

    fn command_node(id: &str, cmd: &str, deterministic: bool) -> Node {
        Node {
            id: id.to_string(),
            after: Vec::new(),
            deterministic,
            spec: NodeSpec::Command(CommandSpec {
                cmd: cmd.to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
                cwd: None,
                timeout_secs: None,
                check: None,
            }),
        }
    }

    fn executor(cache: Arc<dyn CacheStore>) -> (NodeExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let exec = NodeExecutor::new(
            AgentRegistry::with_builtins(),
            cache,
            dir.path().join("artifacts"),
        );
        (exec, dir)
    }

    #[tokio::test]
    async fn deterministic_node_hits_cache_on_second_run() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (exec, _dir) = executor(cache.clone());
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let scope = Scope::new(&vars, &outputs);
        let node = command_node("n", "echo once", true);

        let first = exec.execute(&node, &scope).await.unwrap();
        assert!(!first.cached);
        assert!(first.cache_key.is_some());

        let second = exec.execute(&node, &scope).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.cache_key, first.cache_key);
        assert_eq!(second.result["stdout"], json!("once\n"));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn non_deterministic_node_never_touches_cache() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (exec, _dir) = executor(cache.clone());
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let scope = Scope::new(&vars, &outputs);
        let node = command_node("n", "echo hi", false);

        let output = exec.execute(&node, &scope).await.unwrap();
        assert!(!output.cached);
        assert!(output.cache_key.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn template_failure_surfaces_before_execution() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (exec, _dir) = executor(cache);
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let scope = Scope::new(&vars, &outputs);
        let node = command_node("n", "echo {{ vars.missing }}", false);

        let err = exec.execute(&node, &scope).await.unwrap_err();
        assert!(matches!(err, NodeError::Template(_)));
    }
}
