//! Session state machine types.

use serde::{Deserialize, Serialize};

/// Lifecycle of one capture session.
///
/// `Starting -> Running -> Stopping -> Terminated`. `Running` is advisory
/// (first encoder output); `Terminated` is entered only when the encoder's
/// exit is observed, whatever path led there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Encoder spawned, no output seen yet.
    #[default]
    Starting,

    /// Encoder has produced status output.
    Running,

    /// Graceful termination requested, waiting for exit.
    Stopping,

    /// Encoder exited and resources were released.
    Terminated,
}

impl SessionState {
    /// Returns true if a stop was already requested.
    pub fn is_stopping(self) -> bool {
        matches!(self, Self::Stopping)
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Terminated => "Terminated",
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running)
                | (Self::Starting, Self::Stopping)
                | (Self::Running, Self::Stopping)
                | (Self::Starting, Self::Terminated)
                | (Self::Running, Self::Terminated)
                | (Self::Stopping, Self::Terminated)
        )
    }
}

/// Why a session left the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Client asked to stop.
    UserRequested,

    /// Administrative stop-all sweep.
    StopAll,

    /// Engine shutting down.
    Shutdown,
}

impl StopReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UserRequested => "Stream stopped by client",
            Self::StopAll => "Stream stopped by administrator",
            Self::Shutdown => "Server shutting down",
        }
    }
}

/// How an encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Exited with a code.
    Code(i32),

    /// Ended without a code (killed by a signal).
    Signaled,

    /// Waiting on the process failed.
    WaitFailed(String),
}

impl ExitStatus {
    /// Non-zero codes and wait failures are abnormal; zero and signal
    /// terminations are not.
    pub fn is_abnormal(&self) -> bool {
        match self {
            Self::Code(code) => *code != 0,
            Self::Signaled => false,
            Self::WaitFailed(_) => true,
        }
    }
}
