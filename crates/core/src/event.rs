//! Outbound file reference notifications.

use crate::checksum::Checksum;
use crate::tenant::TenantId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Outcome notified to the rest of the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileReferenceEventType {
    Stored,
    StoreError,
    DeletedForOwner,
    FullyDeleted,
    DeletionError,
    Available,
    AvailabilityError,
    Copied,
    CopyError,
}

impl FileReferenceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "STORED",
            Self::StoreError => "STORE_ERROR",
            Self::DeletedForOwner => "DELETED_FOR_OWNER",
            Self::FullyDeleted => "FULLY_DELETED",
            Self::DeletionError => "DELETION_ERROR",
            Self::Available => "AVAILABLE",
            Self::AvailabilityError => "AVAILABILITY_ERROR",
            Self::Copied => "COPIED",
            Self::CopyError => "COPY_ERROR",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::StoreError | Self::DeletionError | Self::AvailabilityError | Self::CopyError
        )
    }
}

impl fmt::Display for FileReferenceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification about a file reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReferenceEvent {
    pub tenant: TenantId,
    pub checksum: Checksum,
    #[serde(rename = "type")]
    pub event_type: FileReferenceEventType,
    /// Storage location the event concerns, when there is one.
    pub storage: Option<String>,
    pub owners: Vec<String>,
    pub message: String,
    /// Business request groups the event answers.
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub emitted_at: OffsetDateTime,
}

impl FileReferenceEvent {
    pub fn new(
        tenant: TenantId,
        checksum: Checksum,
        event_type: FileReferenceEventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant,
            checksum,
            event_type,
            storage: None,
            owners: Vec::new(),
            message: message.into(),
            group_ids: Vec::new(),
            emitted_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    pub fn with_owners<I, S>(mut self, owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owners = owners.into_iter().map(Into::into).collect();
        self.owners.sort();
        self.owners.dedup();
        self
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        self.group_ids.sort();
        self.group_ids.dedup();
        self
    }
}
