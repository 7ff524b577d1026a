use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Access mode granted to `/sys` inside the container.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum SysfsMode {
    /// Bind `/sys` read-only.
    #[default]
    ReadOnly,
    /// Bind `/sys` read-write, for tools that need to poke device state.
    ReadWrite,
}

impl SysfsMode {
    /// Returns true when `/sys` should be writable.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}
