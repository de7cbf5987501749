// src/errors.rs

//! Crate-wide error types.
//!
//! Fallible plumbing (I/O, parsing, store access) uses `anyhow` with
//! context, re-exported here. Node-level failures carry a typed
//! [`NodeError`] so completions can be folded into run state and reported
//! without string matching; template resolution has its own small
//! [`TemplateError`] since it is also surfaced in isolation.

use thiserror::Error;

pub use anyhow::{Error, Result};

/// Why a template placeholder could not be resolved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The referenced path does not exist in the scope.
    #[error("unknown template reference '{{{{ {path} }}}}'")]
    UnknownPath { path: String },

    /// A path segment tried to index into a value that cannot be indexed
    /// that way (e.g. a field lookup on a number).
    #[error("cannot index '{segment}' in '{{{{ {path} }}}}'")]
    BadSegment { path: String, segment: String },

    /// A fan-out source expression resolved to something other than an array.
    #[error("fan-out source '{expr}' resolved to {actual}, expected an array")]
    NotAnArray { expr: String, actual: &'static str },
}

/// Terminal failure of a single node.
///
/// None of these are retried; the scheduler turns them into a FAILED status
/// and skips every transitive dependent.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The command exited with a non-zero status.
    #[error("command exited with code {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    /// The node exceeded its configured timeout and was killed.
    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// A delegated-task node named a capability nobody registered.
    #[error("unknown agent capability '{name}'")]
    UnknownAgent { name: String },

    /// An artifact declared in the output-verification spec was not produced.
    #[error("declared artifact missing: {path}")]
    MissingArtifact { path: String },

    /// The artifact nominated as the structured result was not valid JSON.
    #[error("could not parse result artifact {path}: {detail}")]
    ResultParse { path: String, detail: String },

    /// Placeholder resolution against the run scope failed.
    #[error("template resolution failed: {0}")]
    Template(#[from] TemplateError),

    /// The agent capability itself reported an error.
    #[error("agent capability failed: {0}")]
    Capability(String),

    /// One item of a fan-out failed; `index` is the item's input position.
    #[error("fan-out item {index} failed: {source}")]
    Item {
        index: usize,
        #[source]
        source: Box<NodeError>,
    },

    /// Spawning or waiting on the external process failed.
    #[error("process error: {0}")]
    Process(String),
}
