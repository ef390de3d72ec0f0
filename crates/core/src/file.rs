//! File metadata carried by references and storage requests.

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};

/// Descriptive metadata of a file, independent of where it is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub checksum: Checksum,
    /// Name of the algorithm that produced `checksum` (e.g. "SHA-256").
    pub algorithm: String,
    pub file_name: String,
    /// Size in bytes, when known before the file is stored.
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

impl FileMeta {
    /// Create metadata with the default mime type and no image dimensions.
    pub fn new(checksum: Checksum, algorithm: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            checksum,
            algorithm: algorithm.into(),
            file_name: file_name.into(),
            file_size: None,
            mime_type: default_mime_type(),
            height: None,
            width: None,
        }
    }

    /// Builder-style size setter.
    pub fn with_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    /// Validate fields that the checksum newtype does not cover.
    pub fn validate(&self) -> crate::Result<()> {
        if self.algorithm.trim().is_empty() {
            return Err(crate::Error::InvalidFileMeta(
                "checksum algorithm is empty".to_string(),
            ));
        }
        if self.file_name.trim().is_empty() {
            return Err(crate::Error::InvalidFileMeta("file name is empty".to_string()));
        }
        Ok(())
    }

    /// Whether `algorithm` names SHA-256.
    pub fn is_sha256(&self) -> bool {
        matches!(
            self.algorithm.to_ascii_lowercase().as_str(),
            "sha-256" | "sha256"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_algorithm_and_name() {
        let c = Checksum::parse("abc").unwrap();
        assert!(FileMeta::new(c.clone(), "SHA-256", "a.dat").validate().is_ok());
        assert!(FileMeta::new(c.clone(), "", "a.dat").validate().is_err());
        assert!(FileMeta::new(c, "MD5", " ").validate().is_err());
    }

    #[test]
    fn sha256_detection_is_case_insensitive() {
        let c = Checksum::parse("abc").unwrap();
        assert!(FileMeta::new(c.clone(), "SHA-256", "a").is_sha256());
        assert!(FileMeta::new(c.clone(), "sha256", "a").is_sha256());
        assert!(!FileMeta::new(c, "MD5", "a").is_sha256());
    }
}
