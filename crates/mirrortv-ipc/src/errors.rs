//! Persisted error records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ClientId;

/// Category of a logged failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No live window matched a start request.
    ResolutionFailed,

    /// The encoder could not be launched.
    SpawnFailed,

    /// The encoder exited abnormally after it was registered.
    EncoderRuntimeFailure,

    /// The OS window query failed.
    WindowEnumeration,
}

/// One entry in the error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub details: String,
    pub client_id: Option<ClientId>,
}

impl ErrorRecord {
    /// Create a record stamped with a fresh id and the current time.
    pub fn new(kind: ErrorKind, details: impl Into<String>, client_id: Option<ClientId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            details: details.into(),
            client_id,
        }
    }
}

/// The error log as served to the admin panel and persisted to disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLogSnapshot {
    /// Records, oldest first.
    pub errors: Vec<ErrorRecord>,
    pub last_updated: Option<DateTime<Utc>>,
}
