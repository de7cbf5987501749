// src/store/cache.rs

//! Content-addressed cache for deterministic node outputs.
//!
//! The key is a blake3 hash over the node's resolved spec, so any change to
//! the command line, environment, inputs or upstream-derived values lands on
//! a different key. Entries are write-once: keys are never updated or
//! invalidated, a changed spec simply hashes elsewhere.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::dag::node::NodeOutput;

/// Compute the cache key for a resolved node spec.
pub fn content_key<S: Serialize>(spec: &S) -> Result<String> {
    // serde_json writes struct fields in declaration order and map keys
    // sorted, so equal specs always serialize to equal bytes.
    let bytes = serde_json::to_vec(spec).context("serializing resolved spec for hashing")?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Key-value store for node outputs.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<NodeOutput>>;
    fn put(&self, key: &str, output: &NodeOutput) -> Result<()>;
}

/// Filesystem-backed cache: one JSON file per key under the cache root.
#[derive(Debug)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl CacheStore for FsCacheStore {
    fn get(&self, key: &str) -> Result<Option<NodeOutput>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading cache entry at {:?}", path))?;
        let output: NodeOutput = serde_json::from_str(&contents)
            .with_context(|| format!("parsing cache entry at {:?}", path))?;
        Ok(Some(output))
    }

    fn put(&self, key: &str, output: &NodeOutput) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            // Write-once: a concurrent or earlier writer already stored
            // this key, and equal keys mean equal specs.
            return Ok(());
        }
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating cache directory at {:?}", self.root))?;
        let contents =
            serde_json::to_string_pretty(output).context("serializing cache entry")?;
        fs::write(&path, contents).with_context(|| format!("writing cache entry at {:?}", path))?;
        debug!(key = %key, "stored cache entry");
        Ok(())
    }
}

/// In-memory cache for tests and embedders that want no persistence.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, NodeOutput>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Result<Option<NodeOutput>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, output: &NodeOutput) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("cache mutex poisoned"))?;
        entries.entry(key.to_string()).or_insert_with(|| output.clone());
        Ok(())
    }
}
