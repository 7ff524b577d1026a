use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read or merged.
    #[error("{0}")]
    Load(Arc<OrthoError>),

    /// A value was syntactically valid but semantically unusable.
    #[error("invalid configuration value for {field}: {message}")]
    Invalid {
        /// Field name as spelled in the configuration file.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}
