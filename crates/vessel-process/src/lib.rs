//! Running the sandbox launcher and cleaning up after it.
//!
//! [`run_sync`] waits for the launcher, [`spawn_on_terminal`] starts it on a
//! pseudo-terminal, [`exec_replace`] hands this process over to it, and
//! [`terminate_tree`] makes sure nothing it started outlives the supervisor.

mod error;
mod runner;
mod tree;

pub use error::RunnerError;
pub use runner::{
    Environment, KILLED_BY_SIGNAL, TerminalChild, exec_replace, run_sync, spawn_on_terminal,
};
pub use tree::{become_subreaper, children, terminate_tree};

pub(crate) const PROCESS_TARGET: &str = "vessel_process";
