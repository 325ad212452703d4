//! Common types used across engine messages.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::SessionState;

/// Opaque, caller-supplied client key. Never parsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The window a session was asked to capture, and what it resolved to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    /// Free-text target as supplied by the caller.
    pub requested: String,

    /// OS window id the caller supplied alongside the title.
    pub id_hint: Option<String>,

    /// OS window id after resolution.
    pub resolved_id: Option<String>,

    /// Live window title after resolution.
    pub resolved_title: Option<String>,
}

impl TargetDescriptor {
    pub fn new(requested: impl Into<String>, id_hint: Option<String>) -> Self {
        Self {
            requested: requested.into(),
            id_hint,
            resolved_id: None,
            resolved_title: None,
        }
    }
}

/// Serializable view of one session. Carries no process internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub client_id: ClientId,

    /// Resolved OS window id.
    pub window_id: Option<String>,

    /// Target text the session was started with.
    pub window_title: String,

    /// Label shown to observers.
    pub display_label: String,

    pub state: SessionState,

    pub started_at: DateTime<Utc>,

    /// Milliseconds since `started_at`, never negative.
    pub duration_ms: u64,
}

/// Point-in-time view of every active session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub sessions: Vec<SessionSummary>,

    /// Number of entries in `sessions`.
    pub total: usize,

    /// Configured session cap.
    pub max: usize,
}

impl Roster {
    pub fn new(sessions: Vec<SessionSummary>, max: usize) -> Self {
        Self {
            total: sessions.len(),
            sessions,
            max,
        }
    }
}

/// A capturable top-level window as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    /// OS window id.
    pub id: String,

    /// Window title at the time of enumeration.
    pub title: String,
}

/// A scored near-miss for a window target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSuggestion {
    pub id: String,
    pub title: String,

    /// Token overlap score in `(0, 1]`.
    pub score: f64,

    /// Tokens shared between the target and this title.
    pub common_words: Vec<String>,
}
