//! Playback readiness for MirrorTV streams.
//!
//! A stream is handed to a player only once its HLS manifest exists and
//! lists enough media to start without an immediate stall.

mod error;
mod gate;
mod manifest;

pub use error::ReadinessError;
pub use gate::{Readiness, ReadinessGate, ReadinessPolicy, ReadinessState};
pub use manifest::{FileManifestSource, ManifestSource, MediaPlaylist};

use std::time::Duration;

/// Result type for readiness operations.
pub type PlaybackResult<T> = Result<T, ReadinessError>;

/// Manifest fetches before a start is declared timed out.
pub const MAX_STARTUP_ATTEMPTS: u32 = 10;

/// Delay between failed manifest fetches.
pub const STARTUP_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Seconds of media wanted before playback starts.
pub const BUFFER_TARGET_SECS: f64 = 2.0;

/// Delay between buffer checks.
pub const BUFFER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest wait for the buffer target.
pub const BUFFER_CEILING: Duration = Duration::from_secs(15);
