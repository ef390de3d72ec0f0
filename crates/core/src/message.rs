//! Inbound flow messages.
//!
//! Delivery is at-least-once; every handler consuming these must be idempotent.

use crate::checksum::Checksum;
use crate::file::FileMeta;
use crate::request::RequestKind;
use crate::tenant::TenantId;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

fn new_group_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Reference a file, storing it at `dest_storage` unless it already lives there.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddFileReference {
    pub file_name: String,
    pub checksum: Checksum,
    pub algorithm: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: Option<u64>,
    pub owner: String,
    pub origin_storage: String,
    pub origin_url: String,
    pub dest_storage: String,
    #[serde(default)]
    pub dest_url: Option<String>,
    #[serde(default = "new_group_id")]
    pub group_id: String,
}

impl AddFileReference {
    /// File metadata described by the message.
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            checksum: self.checksum.clone(),
            algorithm: self.algorithm.clone(),
            file_name: self.file_name.clone(),
            file_size: self.size,
            mime_type: self.mime_type.clone(),
            height: None,
            width: None,
        }
    }

    /// Whether the file already resides at its destination.
    pub fn is_in_place(&self) -> bool {
        self.origin_storage == self.dest_storage
    }

    /// URL the reference points at when the file is already in place.
    pub fn in_place_url(&self) -> &str {
        self.dest_url.as_deref().unwrap_or(&self.origin_url)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.meta().validate()?;
        require_non_empty("owner", &self.owner)?;
        require_non_empty("originStorage", &self.origin_storage)?;
        require_non_empty("destStorage", &self.dest_storage)?;
        require_non_empty("originUrl", &self.origin_url)
    }
}

/// One file to copy onto a storage location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFile {
    pub file_name: String,
    pub checksum: Checksum,
    pub algorithm: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    pub owner: String,
    pub origin_url: String,
    pub dest_storage: String,
}

impl StoreFile {
    pub fn meta(&self) -> FileMeta {
        FileMeta {
            checksum: self.checksum.clone(),
            algorithm: self.algorithm.clone(),
            file_name: self.file_name.clone(),
            file_size: self.size,
            mime_type: self.mime_type.clone(),
            height: self.height,
            width: self.width,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.meta().validate()?;
        require_non_empty("owner", &self.owner)?;
        require_non_empty("originUrl", &self.origin_url)?;
        require_non_empty("destStorage", &self.dest_storage)
    }
}

/// A single or batched store submission sharing one correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreFiles {
    #[serde(default = "new_group_id")]
    pub group_id: String,
    pub files: Vec<StoreFile>,
}

impl StoreFiles {
    pub fn single(group_id: impl Into<String>, file: StoreFile) -> Self {
        Self {
            group_id: group_id.into(),
            files: vec![file],
        }
    }
}

/// Remove an owner from the reference at `storage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileReference {
    pub checksum: Checksum,
    pub storage: String,
    pub owner: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "new_group_id")]
    pub group_id: String,
}

/// Make files readable until `expiration_date`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAvailability {
    pub checksums: Vec<Checksum>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_date: OffsetDateTime,
    #[serde(default = "new_group_id")]
    pub group_id: String,
}

/// One referenced file to copy onto `dest_storage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFile {
    pub checksum: Checksum,
    pub dest_storage: String,
}

/// Copy files the tenant already references onto another location.
///
/// The copy keeps the owners of the existing references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyFiles {
    #[serde(default = "new_group_id")]
    pub group_id: String,
    pub files: Vec<CopyFile>,
}

/// Reset every errored request of a group and kind to TODO.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRequests {
    pub group_id: String,
    pub kind: RequestKind,
}

/// Any inbound message, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowMessage {
    AddFileReference(AddFileReference),
    StoreFiles(StoreFiles),
    DeleteFileReference(DeleteFileReference),
    RequestAvailability(RequestAvailability),
    CopyFiles(CopyFiles),
    RetryRequests(RetryRequests),
}

impl FlowMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddFileReference(_) => "add_file_reference",
            Self::StoreFiles(_) => "store_files",
            Self::DeleteFileReference(_) => "delete_file_reference",
            Self::RequestAvailability(_) => "request_availability",
            Self::CopyFiles(_) => "copy_files",
            Self::RetryRequests(_) => "retry_requests",
        }
    }
}

/// A message addressed to one tenant, as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEnvelope {
    pub tenant: TenantId,
    pub message: FlowMessage,
}

impl FlowEnvelope {
    /// Parse one newline-delimited JSON record.
    pub fn from_json_line(line: &str) -> crate::Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| crate::Error::InvalidMessage(e.to_string()))
    }
}

fn require_non_empty(field: &str, value: &str) -> crate::Result<()> {
    if value.trim().is_empty() {
        return Err(crate::Error::InvalidMessage(format!("{field} is empty")));
    }
    Ok(())
}
