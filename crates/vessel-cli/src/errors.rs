//! Error types for the CLI runtime.

use std::io;

use thiserror::Error;
use vessel_config::ConfigError;
use vessel_container::{PlanError, ResolveError};
use vessel_process::RunnerError;
use vessel_pty::PtyError;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to open the host root: {0}")]
    HostRoot(#[from] ResolveError),
    #[error("failed to plan the container: {0}")]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error("terminal bridge failed: {0}")]
    Pty(#[from] PtyError),
    #[error("event loop failed: {0}")]
    EventLoop(io::Error),
    #[error("the pseudo-terminal slave was already handed over")]
    SlaveUnavailable,
    #[error("failed to serialise the plan: {0}")]
    SerialisePlan(serde_json::Error),
    #[error("failed to write the plan: {0}")]
    WritePlan(io::Error),
}
