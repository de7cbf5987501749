// src/exec/command.rs

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::dag::node::{CommandSpec, NodeOutput, OutputCheck};
use crate::errors::NodeError;

/// Run one resolved command spec to completion and build its output record.
///
/// The command line goes through the platform shell when no argv tail is
/// given, so `cmd: "grep foo *.log | wc -l"` works as written; with `args`
/// present the program is spawned directly. A timeout kills the process via
/// `kill_on_drop`.
pub async fn run_command(id: &str, spec: &CommandSpec) -> Result<NodeOutput, NodeError> {
    info!(node = %id, cmd = %spec.cmd, "starting command");

    let mut cmd = if spec.args.is_empty() {
        if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&spec.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&spec.cmd);
            c
        }
    } else {
        let mut c = Command::new(&spec.cmd);
        c.args(&spec.args);
        c
    };

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .envs(&spec.env);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let child = cmd
        .spawn()
        .map_err(|err| NodeError::Process(format!("spawning '{}': {err}", spec.cmd)))?;

    let waited = match spec.timeout_secs {
        Some(seconds) => match timeout(Duration::from_secs(seconds), child.wait_with_output()).await
        {
            Ok(result) => result,
            // Dropping the wait future drops the child handle, which kills
            // the process thanks to kill_on_drop.
            Err(_) => return Err(NodeError::Timeout { seconds }),
        },
        None => child.wait_with_output().await,
    };
    let output =
        waited.map_err(|err| NodeError::Process(format!("waiting for '{}': {err}", spec.cmd)))?;

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    debug!(node = %id, exit_code, "command exited");

    if !output.status.success() {
        return Err(NodeError::CommandFailed {
            code: exit_code,
            stderr: excerpt(&stderr),
        });
    }

    let mut node_output = NodeOutput {
        result: json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }),
        artifacts: Vec::new(),
        logs: Vec::new(),
        cache_key: None,
        cached: false,
    };

    if let Some(check) = &spec.check {
        verify_outputs(spec.cwd.as_deref(), check, &mut node_output)?;
    }

    Ok(node_output)
}

/// Apply the node's output-verification spec: declared artifacts must
/// exist, and `parse_result` (if set) replaces the default result with the
/// parsed JSON contents of that artifact.
fn verify_outputs(
    cwd: Option<&str>,
    check: &OutputCheck,
    output: &mut NodeOutput,
) -> Result<(), NodeError> {
    for artifact in check.artifacts.iter() {
        let full = artifact_path(cwd, artifact);
        if !full.exists() {
            return Err(NodeError::MissingArtifact {
                path: artifact.clone(),
            });
        }
        output.artifacts.push(artifact.clone());
    }

    if let Some(result_path) = &check.parse_result {
        let full = artifact_path(cwd, result_path);
        let contents = std::fs::read_to_string(&full).map_err(|err| NodeError::ResultParse {
            path: result_path.clone(),
            detail: err.to_string(),
        })?;
        output.result =
            serde_json::from_str(&contents).map_err(|err| NodeError::ResultParse {
                path: result_path.clone(),
                detail: err.to_string(),
            })?;
    }

    Ok(())
}

fn artifact_path(cwd: Option<&str>, rel: &str) -> PathBuf {
    match cwd {
        Some(base) => Path::new(base).join(rel),
        None => PathBuf::from(rel),
    }
}

/// First chunk of stderr for error messages; full output stays on the
/// process, not in the error chain.
fn excerpt(s: &str) -> String {
    const MAX: usize = 2048;
    let trimmed = s.trim_end();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
