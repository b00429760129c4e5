//! Isolated command execution.
//!
//! Every pipeline step that shells out goes through [`run_command`] with an
//! explicit [`ExecContext`]. The orchestrator's own environment is never
//! inherited or mutated.

pub mod cmd;
pub mod context;

pub use cmd::{CommandError, CommandOutput, run_command};
pub use context::{ExecContext, default_search_path};
