// src/cli.rs

//! CLI argument parsing using `clap`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;

/// Command-line arguments for `rundag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rundag",
    version,
    about = "Execute a declarative DAG workflow with caching and resume.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Start a fresh run of the workflow.
    Run(RunArgs),
    /// Resume a previously failed run from its last checkpoint.
    ///
    /// Nodes that succeeded (or were served from cache) are left untouched;
    /// failed and skipped nodes are reset and re-evaluated.
    Resume(RunArgs),
}

/// Arguments shared by `run` and `resume`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the workflow definition file (YAML).
    #[arg(long, value_name = "PATH", default_value = "rundag.yaml")]
    pub workflow: String,

    /// Directory holding run metadata, checkpoints, artifacts and the cache.
    #[arg(long, value_name = "DIR", default_value = ".rundag")]
    pub state_dir: String,

    /// Override a workflow-level variable, e.g. `--var target=release`.
    ///
    /// Values are parsed as JSON where possible and fall back to plain
    /// strings. May be given multiple times. Ignored on resume, where the
    /// checkpointed variables win.
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Parse + validate, print the execution plan, but don't execute.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

/// Parse `--var k=v` pairs into a variable override map.
///
/// `v` is parsed as JSON when it is valid JSON (so `--var n=3` yields a
/// number and `--var xs='[1,2]'` an array), otherwise it is kept verbatim
/// as a string.
pub fn parse_var_overrides(pairs: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut vars = BTreeMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --var '{pair}', expected KEY=VALUE"))?;
        if key.is_empty() {
            return Err(anyhow!("invalid --var '{pair}', empty key"));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        vars.insert(key.to_string(), value);
    }
    Ok(vars)
}
