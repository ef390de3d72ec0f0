//! File checksums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum checksum length (covers SHA-512 hex digests with room to spare).
pub const MAX_CHECKSUM_LEN: usize = 256;

/// A file checksum, the content identity of a file reference.
///
/// Checksums are opaque alphanumeric strings; the algorithm that produced
/// them travels separately in [`crate::FileMeta::algorithm`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Parse and validate a checksum.
    pub fn parse(s: impl Into<String>) -> crate::Result<Self> {
        let s = s.into();
        if s.is_empty() {
            return Err(crate::Error::InvalidChecksum("checksum is empty".to_string()));
        }
        if s.len() > MAX_CHECKSUM_LEN {
            return Err(crate::Error::InvalidChecksum(format!(
                "checksum exceeds {MAX_CHECKSUM_LEN} characters"
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(crate::Error::InvalidChecksum(format!(
                "checksum must be alphanumeric: {s}"
            )));
        }
        Ok(Self(s))
    }

    /// Get the checksum as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used in storage key layouts.
    pub fn shard(&self) -> &str {
        let end = self.0.len().min(2);
        &self.0[..end]
    }
}

impl TryFrom<String> for Checksum {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.0
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.0)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
