//! Request kinds, request status and job state.
//!
//! Per-status behaviour is expressed as closed enums matched exhaustively.
//! There is no persisted RUNNING request status: a request owned by an
//! in-flight job is recognised by its job id and excluded from the TODO pool.

use crate::event::FileReferenceEventType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of asynchronous work the engine tracks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Copy a file onto a storage location.
    Storage,
    /// Physically remove a file from a storage location.
    Deletion,
    /// Restore a NEARLINE file into the local cache.
    Cache,
    /// Copy an already referenced file onto another storage location.
    Copy,
}

impl RequestKind {
    pub const ALL: [RequestKind; 4] = [Self::Storage, Self::Deletion, Self::Cache, Self::Copy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Deletion => "deletion",
            Self::Cache => "cache",
            Self::Copy => "copy",
        }
    }

    /// Event published when a request of this kind completes.
    pub fn success_event(&self) -> FileReferenceEventType {
        match self {
            Self::Storage => FileReferenceEventType::Stored,
            Self::Deletion => FileReferenceEventType::FullyDeleted,
            Self::Cache => FileReferenceEventType::Available,
            Self::Copy => FileReferenceEventType::Copied,
        }
    }

    /// Event published when a request of this kind fails.
    pub fn error_event(&self) -> FileReferenceEventType {
        match self {
            Self::Storage => FileReferenceEventType::StoreError,
            Self::Deletion => FileReferenceEventType::DeletionError,
            Self::Cache => FileReferenceEventType::AvailabilityError,
            Self::Copy => FileReferenceEventType::CopyError,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "storage" | "store" => Ok(Self::Storage),
            "deletion" | "delete" => Ok(Self::Deletion),
            "cache" | "availability" => Ok(Self::Cache),
            "copy" => Ok(Self::Copy),
            other => Err(crate::Error::UnknownRequestKind(other.to_string())),
        }
    }
}

/// Persisted request status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting to be picked into a job.
    Todo,
    /// Last execution failed; kept for retry.
    Error,
}

/// Events that move a request between statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestTransition {
    /// Execution failed, or the executor died.
    Fail,
    /// Explicit retry of an errored request.
    Retry,
    /// The same work was submitted again.
    Resubmit,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Error => "error",
        }
    }

    /// Next status for the given transition.
    pub fn apply(self, transition: RequestTransition) -> crate::Result<Self> {
        match (self, transition) {
            (_, RequestTransition::Fail) => Ok(Self::Error),
            (Self::Error, RequestTransition::Retry) => Ok(Self::Todo),
            (_, RequestTransition::Resubmit) => Ok(Self::Todo),
            (Self::Todo, RequestTransition::Retry) => Err(crate::Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: "todo (retry)".to_string(),
            }),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "todo" | "to_do" => Ok(Self::Todo),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::UnknownRequestStatus(other.to_string())),
        }
    }
}

/// Job state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    /// Whether the job is done and no longer owns its requests.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::UnknownJobState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in RequestKind::ALL {
            assert_eq!(kind.as_str().parse::<RequestKind>().unwrap(), kind);
        }
        assert_eq!("availability".parse::<RequestKind>().unwrap(), RequestKind::Cache);
        assert!("move".parse::<RequestKind>().is_err());
    }

    #[test]
    fn kind_events() {
        assert_eq!(RequestKind::Deletion.success_event(), FileReferenceEventType::FullyDeleted);
        assert_eq!(RequestKind::Cache.error_event(), FileReferenceEventType::AvailabilityError);
        assert_eq!(RequestKind::Copy.success_event(), FileReferenceEventType::Copied);
        assert!(RequestKind::ALL.iter().all(|k| k.error_event().is_error()));
    }

    #[test]
    fn status_transitions() {
        use RequestTransition::*;
        assert_eq!(RequestStatus::Todo.apply(Fail).unwrap(), RequestStatus::Error);
        assert_eq!(RequestStatus::Error.apply(Retry).unwrap(), RequestStatus::Todo);
        assert_eq!(RequestStatus::Error.apply(Resubmit).unwrap(), RequestStatus::Todo);
        assert_eq!(RequestStatus::Error.apply(Fail).unwrap(), RequestStatus::Error);
        assert!(RequestStatus::Todo.apply(Retry).is_err());
    }

    #[test]
    fn job_state_terminal() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Finished.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert_eq!("running".parse::<JobState>().unwrap(), JobState::Running);
    }
}
