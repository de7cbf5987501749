// src/store/run_store.rs

//! Per-workflow run state on disk.
//!
//! Layout under the state directory:
//!
//! ```text
//! <state>/<workflow>/thread            stable thread id for resume
//! <state>/<workflow>/run.json          latest run document
//! <state>/<workflow>/checkpoints/      one snapshot per thread id
//! <state>/<workflow>/artifacts/<node>/ artifact root handed to agents
//! <state>/cache/                       shared content-addressed cache
//! ```
//!
//! The run document is rewritten whole after every state change, the same
//! way checkpoints are; readers always see a complete JSON file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dag::node::{NodeId, NodeOutput, NodeStatus, Workflow};

/// Overall status of a run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Execution record of one node within the run document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRecord {
    fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            output: None,
            error: None,
        }
    }
}

/// The persisted `run.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    pub workflow: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub nodes: BTreeMap<NodeId, NodeRecord>,
}

/// Handle on a workflow's state directory plus the in-memory run document.
#[derive(Debug)]
pub struct RunStore {
    dir: PathBuf,
    thread_id: String,
    document: RunDocument,
}

impl RunStore {
    /// Open (or create) the state directory for a workflow and load its
    /// stable thread id, generating one on first use.
    pub fn open(state_dir: impl AsRef<Path>, workflow: &Workflow) -> Result<Self> {
        let dir = state_dir.as_ref().join(sanitize_component(&workflow.name));
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating run directory at {:?}", dir))?;

        let thread_path = dir.join("thread");
        let existing = if thread_path.exists() {
            let raw = fs::read_to_string(&thread_path)
                .with_context(|| format!("reading thread id at {:?}", thread_path))?;
            let trimmed = raw.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        } else {
            None
        };
        let thread_id = match existing {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                fs::write(&thread_path, &id)
                    .with_context(|| format!("writing thread id at {:?}", thread_path))?;
                info!(workflow = %workflow.name, thread_id = %id, "created workflow thread");
                id
            }
        };

        let document = RunDocument {
            workflow: workflow.name.clone(),
            thread_id: thread_id.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            nodes: workflow
                .nodes()
                .iter()
                .map(|n| (n.id.clone(), NodeRecord::pending()))
                .collect(),
        };

        Ok(Self {
            dir,
            thread_id,
            document,
        })
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.dir.join("checkpoints")
    }

    pub fn artifacts_root(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    pub fn document(&self) -> &RunDocument {
        &self.document
    }

    pub fn node_record(&self, id: &str) -> Option<&NodeRecord> {
        self.document.nodes.get(id)
    }

    /// Start a fresh run: every node pending, previous records discarded.
    pub fn begin_fresh(&mut self) -> Result<()> {
        self.document.status = RunStatus::Running;
        self.document.started_at = Utc::now();
        self.document.finished_at = None;
        self.document.error = None;
        for record in self.document.nodes.values_mut() {
            *record = NodeRecord::pending();
        }
        self.persist()
    }

    /// Start a resumed run. Nodes whose restored status is satisfied keep
    /// their previous record (timestamps included); everything else is
    /// reset to a pending record.
    pub fn begin_resume(
        &mut self,
        workflow: &Workflow,
        statuses: &HashMap<NodeId, NodeStatus>,
        outputs: &BTreeMap<NodeId, NodeOutput>,
    ) -> Result<()> {
        let run_path = self.run_file_path();
        if run_path.exists() {
            let contents = fs::read_to_string(&run_path)
                .with_context(|| format!("reading previous run file at {:?}", run_path))?;
            match serde_json::from_str::<RunDocument>(&contents) {
                Ok(previous) => self.document.nodes = previous.nodes,
                Err(err) => {
                    warn!(error = %err, "previous run file unreadable, starting records fresh")
                }
            }
        }

        self.document.status = RunStatus::Running;
        self.document.started_at = Utc::now();
        self.document.finished_at = None;
        self.document.error = None;

        for node in workflow.nodes() {
            let status = statuses
                .get(&node.id)
                .copied()
                .unwrap_or(NodeStatus::Pending);
            let record = self
                .document
                .nodes
                .entry(node.id.clone())
                .or_insert_with(NodeRecord::pending);
            if status.is_satisfied() {
                record.status = status;
                record.error = None;
                if record.output.is_none() {
                    record.output = outputs.get(&node.id).cloned();
                }
            } else {
                *record = NodeRecord::pending();
            }
        }

        // Nodes removed from the definition no longer belong in the document.
        let known: HashSet<&str> = workflow.nodes().iter().map(|n| n.id.as_str()).collect();
        self.document.nodes.retain(|id, _| known.contains(id.as_str()));

        self.persist()
    }

    pub fn record_started(&mut self, id: &str) -> Result<()> {
        let record = self
            .document
            .nodes
            .entry(id.to_string())
            .or_insert_with(NodeRecord::pending);
        record.status = NodeStatus::Running;
        record.started_at = Some(Utc::now());
        record.finished_at = None;
        record.duration_ms = None;
        record.error = None;
        self.persist()
    }

    pub fn record_completed(
        &mut self,
        id: &str,
        status: NodeStatus,
        output: Option<&NodeOutput>,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let record = self
            .document
            .nodes
            .entry(id.to_string())
            .or_insert_with(NodeRecord::pending);
        record.status = status;
        record.finished_at = Some(now);
        record.duration_ms = record
            .started_at
            .map(|started| u64::try_from((now - started).num_milliseconds()).unwrap_or(0));
        record.output = output.cloned();
        record.error = error.map(str::to_string);
        self.persist()
    }

    pub fn record_skipped(&mut self, id: &str) -> Result<()> {
        let record = self
            .document
            .nodes
            .entry(id.to_string())
            .or_insert_with(NodeRecord::pending);
        record.status = NodeStatus::Skipped;
        // Skipped nodes never ran: date the transition, but leave the
        // duration unset since there is no execution to measure.
        record.finished_at = Some(Utc::now());
        self.persist()
    }

    /// Close out the run document.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) -> Result<()> {
        self.document.status = status;
        self.document.finished_at = Some(Utc::now());
        self.document.error = error;
        self.persist()
    }

    fn run_file_path(&self) -> PathBuf {
        self.dir.join("run.json")
    }

    fn persist(&self) -> Result<()> {
        let path = self.run_file_path();
        let contents =
            serde_json::to_string_pretty(&self.document).context("serializing run document")?;
        fs::write(&path, contents)
            .with_context(|| format!("writing run file at {:?}", path))?;
        debug!(run_file = ?path, "persisted run document");
        Ok(())
    }
}

/// Keep workflow names filesystem-safe when used as directory components.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "workflow".to_string()
    } else {
        cleaned
    }
}
