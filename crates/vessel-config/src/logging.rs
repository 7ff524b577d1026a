//! Log rendering selected for the launcher's stderr diagnostics.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How diagnostics are rendered on stderr.
///
/// The launcher never logs to stdout, so either format can be mixed with
/// plan output or an interactive session without corrupting it.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event with the fields flattened to the top level.
    #[default]
    Json,
    /// Terse single-line text for a person watching the terminal.
    Compact,
}

impl LogFormat {
    /// Returns true when events are emitted as machine-readable records.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }

    /// Returns true when ANSI colouring may be applied on a terminal.
    ///
    /// Escape sequences would corrupt JSON records, so only the text format
    /// honours terminal detection.
    #[must_use]
    pub const fn allows_colour(self) -> bool {
        !self.is_structured()
    }
}
