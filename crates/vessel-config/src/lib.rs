//! Shared configuration model for the `vessel` container launcher.
//!
//! Configuration is layered by `ortho_config`: built-in defaults, then TOML
//! configuration files, then `VESSEL_*` environment variables, then
//! command-line flags. A file may be named explicitly with `--config-path`
//! or `VESSEL_CONFIG_PATH`. Loaded values are validated before use.

mod defaults;
mod error;
mod logging;
mod sysfs;

#[cfg(test)]
mod tests;

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MOUNT_POINT, DEFAULT_SYMLINK_LIMIT, DEFAULT_TERMINATE_KILL,
    DEFAULT_TERMINATE_WAIT, FALLBACK_BWRAP, default_log_filter, default_log_format,
    default_sysfs_mode,
};
pub use error::ConfigError;
pub use logging::LogFormat;
pub use sysfs::SysfsMode;

/// Resolved runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "VESSEL")]
#[serde(default)]
pub struct Config {
    log_filter: String,
    log_format: LogFormat,
    sysfs: SysfsMode,
    bwrap: Option<Utf8PathBuf>,
    terminate_wait_ms: u64,
    terminate_kill_ms: u64,
    symlink_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
            sysfs: default_sysfs_mode(),
            bwrap: None,
            terminate_wait_ms: defaults::default_terminate_wait_ms(),
            terminate_kill_ms: defaults::default_terminate_kill_ms(),
            symlink_limit: defaults::default_symlink_limit(),
        }
    }
}

impl Config {
    /// Loads the layered configuration from `args` and the environment.
    ///
    /// `args` starts with the program name and carries only configuration
    /// flags; command tokens must be split off by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a layer cannot be read or merged,
    /// and [`ConfigError::Invalid`] when a merged value is unusable.
    pub fn load_from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let config = Self::load_from_iter(args).map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "log_filter",
                message: String::from("must not be empty"),
            });
        }
        if self.symlink_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "symlink_limit",
                message: String::from("must be at least 1"),
            });
        }
        if let Some(bwrap) = &self.bwrap
            && !bwrap.is_absolute()
        {
            return Err(ConfigError::Invalid {
                field: "bwrap",
                message: format!("{bwrap} is not an absolute path"),
            });
        }
        Ok(())
    }

    /// Log filter expression understood by `tracing-subscriber`.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// `/sys` access mode inside the container.
    #[must_use]
    pub const fn sysfs(&self) -> SysfsMode {
        self.sysfs
    }

    /// Explicitly configured launcher program, if any.
    #[must_use]
    pub fn bwrap(&self) -> Option<&Utf8Path> {
        self.bwrap.as_deref()
    }

    /// Time descendants get to exit after `SIGTERM`.
    #[must_use]
    pub const fn terminate_wait(&self) -> Duration {
        Duration::from_millis(self.terminate_wait_ms)
    }

    /// Time descendants get to exit after `SIGKILL`.
    #[must_use]
    pub const fn terminate_kill(&self) -> Duration {
        Duration::from_millis(self.terminate_kill_ms)
    }

    /// Maximum number of symlink substitutions during one resolution.
    #[must_use]
    pub const fn symlink_limit(&self) -> u32 {
        self.symlink_limit
    }
}
