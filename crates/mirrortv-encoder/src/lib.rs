//! External encoder supervision.
//!
//! Each capture session runs one encoder subprocess (ffmpeg by default)
//! writing an HLS manifest and numbered segments into a private working
//! directory. This crate spawns that process, watches its status and
//! diagnostic output, delivers first-output and exit notifications as
//! [`ProcessEvent`]s, and terminates it gracefully with forced escalation.

mod config;
mod diagnostics;
mod error;
mod process;
mod workdir;

pub use config::EncoderConfig;
pub use diagnostics::{classify_diagnostics, classify_spawn_error, DiagnosticTail, FailureHint};
pub use error::EncoderError;
pub use process::{EncoderProcess, ProcessEvent, SessionId, SpawnContext};
pub use workdir::{prepare_session_dir, remove_session_dir, session_dir};

use std::time::Duration;

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Default time an encoder gets to exit after a graceful stop.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

/// How often the monitor thread checks for exit and control messages.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long the monitor waits for output readers to drain after exit.
pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Longest client id accepted. Its hex-encoded directory name stays within
/// the 255-byte file name limit of common filesystems.
pub const MAX_CLIENT_ID_BYTES: usize = 120;

/// Diagnostic lines kept for the exit report.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Manifest file name the default encoder arguments write.
pub const DEFAULT_PLAYLIST_NAME: &str = "playlist.m3u8";

/// Segment file pattern the default encoder arguments write.
pub const DEFAULT_SEGMENT_PATTERN: &str = "segment_%03d.ts";
