// src/engine/mod.rs

//! Run orchestration: mutable run state plus the tick loop that drives a
//! workflow from pending to a final report.

pub mod runtime;
pub mod state;

pub use runtime::{RunReport, Runner};
pub use state::RunState;
