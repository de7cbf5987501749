// src/store/mod.rs

//! Persistence: content-addressed output cache, per-thread checkpoints and
//! the per-workflow run document.

pub mod cache;
pub mod checkpoint;
pub mod run_store;

pub use cache::{content_key, CacheStore, FsCacheStore, MemoryCacheStore};
pub use checkpoint::{CheckpointStore, FsCheckpointStore, MemoryCheckpointStore, RunSnapshot};
pub use run_store::{NodeRecord, RunDocument, RunStatus, RunStore};
