//! `--codec [NAME]` handling.

use crate::Compression;
use crate::error::Error;

/// What clap hands back for a flag whose value is optional.
pub type Flag = Option<Option<String>>;

/// The user's codec choice, before configuration is consulted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preference {
    /// `--codec zstd`
    Explicit(Compression),
    /// `--codec` alone: use the best encoder this machine has.
    Implicit,
    /// No flag: whatever the configuration says.
    NotSpecified,
}

impl TryFrom<Flag> for Preference {
    type Error = Error;

    fn try_from(flag: Flag) -> Result<Self, Self::Error> {
        Ok(match flag {
            None => Self::NotSpecified,
            Some(None) => Self::Implicit,
            Some(Some(name)) if name.is_empty() => Self::Implicit,
            Some(Some(name)) => Self::Explicit(name.parse()?),
        })
    }
}

impl Preference {
    /// Codec to use given the configured one. `None` asks the caller to probe.
    pub fn resolve(&self, configured: Option<Compression>) -> Option<Compression> {
        match *self {
            Self::Explicit(codec) => Some(codec),
            Self::Implicit => None,
            Self::NotSpecified => configured,
        }
    }
}
