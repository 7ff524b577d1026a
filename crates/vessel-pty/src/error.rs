//! Errors raised while setting up a terminal bridge.
//!
//! Runtime I/O failures inside the bridge are handled locally by closing the
//! affected direction, so only construction and registration surface here.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors reported by [`crate::PtyBridge`] and [`crate::SignalRelay`].
#[derive(Debug, Clone, Error)]
pub enum PtyError {
    /// A system call needed to build the bridge failed.
    #[error("{operation} failed: {source}")]
    Setup {
        /// System call that failed.
        operation: &'static str,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A descriptor could not be added to or updated in the event loop.
    #[error("failed to update event registration: {source}")]
    Register {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A signal handler could not be installed.
    #[error("failed to forward signal {signal}: {source}")]
    Signal {
        /// Signal number.
        signal: i32,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl PtyError {
    pub(crate) fn setup(operation: &'static str, source: impl Into<io::Error>) -> Self {
        Self::Setup {
            operation,
            source: Arc::new(source.into()),
        }
    }

    pub(crate) fn register(source: io::Error) -> Self {
        Self::Register {
            source: Arc::new(source),
        }
    }
}
