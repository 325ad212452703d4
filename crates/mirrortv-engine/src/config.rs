//! Engine settings.

use std::path::PathBuf;
use std::time::Duration;

use mirrortv_capture::DEFAULT_SUGGESTION_LIMIT;
use mirrortv_encoder::EncoderConfig;

use crate::{DEFAULT_MAX_SESSIONS, DEFAULT_SHUTDOWN_TIMEOUT};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cap on concurrent sessions, reservations included.
    pub max_sessions: usize,

    /// Parent of every per-client output directory.
    pub stream_root: PathBuf,

    /// How encoders are launched.
    pub encoder: EncoderConfig,

    /// How long shutdown waits for encoders to exit before killing them.
    pub shutdown_timeout: Duration,

    /// Suggestions attached to a failed resolution.
    pub suggestion_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            stream_root: PathBuf::from("public").join("stream"),
            encoder: EncoderConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            suggestion_limit: DEFAULT_SUGGESTION_LIMIT,
        }
    }
}
