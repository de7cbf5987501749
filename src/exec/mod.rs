// src/exec/mod.rs

//! Node execution.
//!
//! Responsibilities:
//! - Run command nodes as child processes (`command.rs`).
//! - Run delegated-task nodes through agent capabilities (`agent.rs`).
//! - Dispatch resolved specs and consult the cache (`executor.rs`).
//! - Fan work out over item lists with bounded parallelism (`fanout.rs`).

pub mod agent;
pub mod command;
pub mod executor;
pub mod fanout;

pub use agent::{
    run_agent, AgentCapability, AgentLog, AgentRegistry, AgentReply, AgentRequest, ArtifactWriter,
    CapabilityError, EchoCapability,
};
pub use command::run_command;
pub use executor::NodeExecutor;
