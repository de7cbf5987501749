// src/workflow/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::dag::Workflow;
use crate::workflow::model::WorkflowDef;
use crate::workflow::validate::validate_workflow;

/// Load a workflow file from a given path and return the raw `WorkflowDef`.
///
/// This only performs YAML deserialization; it does **not** perform semantic
/// validation (DAG correctness, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<WorkflowDef> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading workflow file at {:?}", path))?;

    let def: WorkflowDef = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing YAML workflow from {:?}", path))?;

    Ok(def)
}

/// Load a workflow file from path and run basic validation.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowDef> {
    let def = load_from_path(&path)?;
    validate_workflow(&def)?;
    Ok(def)
}

/// Load, validate and compile a workflow file into the runtime graph.
///
/// This is the entry point the rest of the application uses.
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow> {
    let def = load_and_validate(&path)?;
    Ok(Workflow::from_def(&def))
}
