// src/workflow/mod.rs

//! Workflow file loading and validation.
//!
//! Responsibilities:
//! - Define the YAML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate basic invariants like DAG correctness (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_workflow};
pub use model::{NodeDef, SpecDef, WorkflowDef};
pub use validate::validate_workflow;
