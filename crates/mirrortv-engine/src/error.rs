//! Error types for the engine.

use thiserror::Error;

use mirrortv_ipc::{ClientId, WindowSuggestion};

/// Request-level failures returned to the caller that issued the action.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request was malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client already has a session (or one is being set up).
    #[error("Stream already running for client {0}")]
    DuplicateSession(ClientId),

    /// The concurrent session cap is reached.
    #[error("Maximum number of streams reached ({max})")]
    CapacityExceeded { max: usize },

    /// No live window matched the target after the full waterfall.
    #[error("Window not found: {target}")]
    ResolutionFailed {
        target: String,
        suggestions: Vec<WindowSuggestion>,
    },

    /// The encoder could not be launched.
    #[error("Failed to start encoder: {message}")]
    SpawnFailed { message: String },

    /// A stop arrived while the start was still resolving its window.
    #[error("Start for client {0} was cancelled by a stop request")]
    StartCancelled(ClientId),

    /// The client has no session.
    #[error("No active stream found for client {0}")]
    SessionNotFound(ClientId),

    /// The engine thread is gone or shutting down.
    #[error("Engine is not running")]
    EngineUnavailable,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
