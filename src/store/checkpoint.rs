// src/store/checkpoint.rs

//! Checkpoint persistence keyed by thread id.
//!
//! After every tick the engine snapshots the run state and saves it under
//! the workflow's thread id. `resume` loads that snapshot to rebuild the
//! state instead of starting over. Snapshots are whole-file rewrites; the
//! latest one always wins.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dag::node::{NodeFailure, NodeId, NodeOutput, NodeStatus};

/// Everything needed to reconstruct a run: the variables the run started
/// with, per-node statuses and outputs, and the failures recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub vars: BTreeMap<String, Value>,
    pub statuses: BTreeMap<NodeId, NodeStatus>,
    #[serde(default)]
    pub outputs: BTreeMap<NodeId, NodeOutput>,
    #[serde(default)]
    pub failures: Vec<NodeFailure>,
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, thread_id: &str, snapshot: &RunSnapshot) -> Result<()>;
    fn load(&self, thread_id: &str) -> Result<Option<RunSnapshot>>;
}

/// Filesystem-backed checkpoints: `<dir>/<thread-id>.json`.
#[derive(Debug)]
pub struct FsCheckpointStore {
    dir: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn snapshot_path(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{thread_id}.json"))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn save(&self, thread_id: &str, snapshot: &RunSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating checkpoint directory at {:?}", self.dir))?;
        let path = self.snapshot_path(thread_id);
        let contents =
            serde_json::to_string_pretty(snapshot).context("serializing run snapshot")?;
        fs::write(&path, contents)
            .with_context(|| format!("writing checkpoint at {:?}", path))?;
        debug!(thread_id = %thread_id, "saved checkpoint");
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<RunSnapshot>> {
        let path = self.snapshot_path(thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading checkpoint at {:?}", path))?;
        let snapshot: RunSnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parsing checkpoint at {:?}", path))?;
        Ok(Some(snapshot))
    }
}

/// In-memory checkpoints for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<String, RunSnapshot>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, thread_id: &str, snapshot: &RunSnapshot) -> Result<()> {
        let mut snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint mutex poisoned"))?;
        snapshots.insert(thread_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load(&self, thread_id: &str) -> Result<Option<RunSnapshot>> {
        let snapshots = self
            .snapshots
            .lock()
            .map_err(|_| anyhow::anyhow!("checkpoint mutex poisoned"))?;
        Ok(snapshots.get(thread_id).cloned())
    }
}
