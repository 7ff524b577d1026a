//! Errors raised while running and reaping child processes.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors reported by the command runner.
#[derive(Debug, Clone, Error)]
pub enum RunnerError {
    /// The argument vector was empty.
    #[error("no command given")]
    EmptyCommand,

    /// The child could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that was requested.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting for the child failed.
    #[error("failed to wait for {program}: {source}")]
    Wait {
        /// Program being waited on.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Replacing the current process image failed.
    #[error("failed to exec {program}: {source}")]
    Exec {
        /// Program that was requested.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Some descendants outlived both termination phases.
    #[error("descendants survived termination: {pids:?}")]
    Survivors {
        /// Process identifiers still present.
        pids: Vec<i32>,
    },

    /// The process could not be made a child subreaper.
    #[error("failed to become a child subreaper: {source}")]
    Subreaper {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}
