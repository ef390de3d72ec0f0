//! Storage tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retrieval tier of a storage location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Bytes are immediately readable.
    Online,
    /// Bytes must be restored into the cache before they can be read.
    Nearline,
    /// Reference only; the bytes are not locally retrievable.
    Offline,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Nearline => "nearline",
            Self::Offline => "offline",
        }
    }

    /// Whether the engine can physically write and delete bytes here.
    pub fn is_physical(&self) -> bool {
        matches!(self, Self::Online | Self::Nearline)
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "nearline" => Ok(Self::Nearline),
            // "reference" is accepted as a synonym of the offline tier
            "offline" | "reference" => Ok(Self::Offline),
            other => Err(crate::Error::UnknownTier(other.to_string())),
        }
    }
}
