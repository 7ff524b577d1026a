//! Command-line interface definitions for the `vessel` binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use vessel_config::DEFAULT_MOUNT_POINT;

/// Runs commands inside a `bwrap` container built from a provider's `/usr`.
#[derive(Parser, Debug)]
#[command(
    name = "vessel",
    version,
    disable_help_subcommand = true,
    after_help = CONFIG_HELP
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

const CONFIG_HELP: &str = "\
Configuration flags go before the subcommand:
  --config-path <PATH>          TOML configuration file
  --log-filter <FILTER>         log filter, for example `vessel_container=debug`
  --log-format <FORMAT>         `json` or `compact`
  --sysfs <MODE>                `/sys` access: `read-only` or `read-write`
  --bwrap <PATH>                launcher to use instead of searching PATH
  --terminate-wait-ms <MS>      grace period after SIGTERM
  --terminate-kill-ms <MS>      grace period after SIGKILL
  --symlink-limit <N>           symlink substitutions allowed per lookup

Each flag can also be set as VESSEL_<NAME>, for example VESSEL_LOG_FILTER.";

/// Subcommands of the `vessel` binary.
#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Prints the launcher arguments for a layout without running anything.
    Plan {
        #[command(flatten)]
        layout: LayoutArgs,
        /// Prints a JSON array instead of one argument per line.
        #[arg(long)]
        json: bool,
    },
    /// Builds the container and runs a command inside it.
    Run {
        #[command(flatten)]
        layout: LayoutArgs,
        /// Attaches the command to a new pseudo-terminal.
        #[arg(long, conflicts_with = "exec")]
        interactive: bool,
        /// Replaces this process with the launcher.
        #[arg(long)]
        exec: bool,
        /// Command to run inside the container.
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<OsString>,
    },
}

/// Where the container's `/usr` comes from and what is layered on top.
#[derive(Args, Debug, Clone)]
pub(crate) struct LayoutArgs {
    /// Provider root as the launcher sees it.
    #[arg(long, value_name = "PATH")]
    pub(crate) provider: PathBuf,
    /// Provider root as this process sees it, when different.
    #[arg(long, value_name = "PATH")]
    pub(crate) provider_local: Option<PathBuf>,
    /// Container directory receiving the provider's `/usr`.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MOUNT_POINT)]
    pub(crate) mount_point: PathBuf,
    /// Staged host directory copied into the container, as `SRC:DEST`.
    ///
    /// `SRC` must end with the components of `DEST`, for example
    /// `/tmp/stage/etc/app:/etc/app`.
    #[arg(long = "overlay", value_name = "SRC:DEST")]
    pub(crate) overlays: Vec<Overlay>,
}

impl LayoutArgs {
    /// Provider root as seen locally.
    pub(crate) fn provider_local(&self) -> &Path {
        self.provider_local
            .as_deref()
            .unwrap_or(self.provider.as_path())
    }
}

/// A staged host directory and its destination in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Overlay {
    pub(crate) source: PathBuf,
    pub(crate) dest: PathBuf,
}

/// Reasons an `--overlay` value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum OverlayParseError {
    #[error("expected SRC:DEST, got {0:?}")]
    MissingSeparator(String),
    #[error("overlay source must not be empty")]
    EmptySource,
    #[error("overlay destination {0:?} must be absolute")]
    RelativeDestination(String),
}

impl FromStr for Overlay {
    type Err = OverlayParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (source, dest) = value
            .rsplit_once(':')
            .ok_or_else(|| OverlayParseError::MissingSeparator(value.to_owned()))?;
        if source.is_empty() {
            return Err(OverlayParseError::EmptySource);
        }
        if !dest.starts_with('/') {
            return Err(OverlayParseError::RelativeDestination(dest.to_owned()));
        }
        Ok(Self {
            source: PathBuf::from(source),
            dest: PathBuf::from(dest),
        })
    }
}
