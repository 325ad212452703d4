//! Decides when a freshly started stream is worth handing to a player.

use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::manifest::{ManifestSource, MediaPlaylist};
use crate::{
    PlaybackResult, ReadinessError, BUFFER_CEILING, BUFFER_POLL_INTERVAL, BUFFER_TARGET_SECS,
    MAX_STARTUP_ATTEMPTS, STARTUP_RETRY_INTERVAL,
};

/// Readiness bounds.
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    /// Manifest fetches before giving up.
    pub max_attempts: u32,

    /// Fixed delay after a failed fetch.
    pub retry_interval: Duration,

    /// Seconds of listed media wanted before playback.
    pub buffer_target: f64,

    /// Delay between buffer checks.
    pub buffer_poll_interval: Duration,

    /// Longest time spent waiting for the buffer target.
    pub buffer_ceiling: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_STARTUP_ATTEMPTS,
            retry_interval: STARTUP_RETRY_INTERVAL,
            buffer_target: BUFFER_TARGET_SECS,
            buffer_poll_interval: BUFFER_POLL_INTERVAL,
            buffer_ceiling: BUFFER_CEILING,
        }
    }
}

impl ReadinessPolicy {
    /// Check if more fetch attempts are allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Where a readiness check currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessState {
    /// Waiting for the manifest to appear.
    Waiting { attempt: u32 },

    /// Manifest found, waiting for enough media.
    Buffering { buffered_secs: f64 },

    /// Ready to play.
    Playable,
}

impl ReadinessState {
    /// Status line for a viewer.
    pub fn message(&self, policy: &ReadinessPolicy) -> String {
        match self {
            Self::Waiting { attempt } => {
                format!("Waiting for video ({}/{})", attempt, policy.max_attempts)
            }
            Self::Buffering { buffered_secs } => {
                format!("Buffered: {:.1}s / {:.1}s", buffered_secs, policy.buffer_target)
            }
            Self::Playable => "Ready".to_string(),
        }
    }
}

/// Outcome of a successful readiness check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    /// Manifest fetches used by the first phase.
    pub attempts: u32,

    /// Seconds of media listed when the check finished.
    pub buffered_secs: f64,

    /// The buffer target was not reached before the ceiling.
    pub ceiling_reached: bool,

    pub elapsed_ms: u64,
}

/// Two-phase readiness check over a [`ManifestSource`].
///
/// Phase one fetches the manifest at a fixed interval until it parses or
/// the attempt budget is spent. Phase two re-reads it until the listed
/// media reaches the buffer target or the ceiling elapses; the ceiling
/// still counts as playable.
pub struct ReadinessGate<S> {
    source: S,
    policy: ReadinessPolicy,
}

impl<S: ManifestSource> ReadinessGate<S> {
    pub fn new(source: S, policy: ReadinessPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Block until the stream is playable, calling `on_state` on every
    /// progress change.
    #[instrument(name = "readiness_wait", skip_all)]
    pub fn wait_with(&self, mut on_state: impl FnMut(&ReadinessState)) -> PlaybackResult<Readiness> {
        let started = Instant::now();

        let (attempts, mut playlist) = self.wait_for_manifest(&mut on_state)?;
        let mut buffered_secs = playlist.buffered_secs();
        let buffering_started = Instant::now();
        let mut ceiling_reached = false;

        loop {
            on_state(&ReadinessState::Buffering { buffered_secs });

            if buffered_secs >= self.policy.buffer_target {
                debug!(buffered_secs, "Buffer target reached");
                break;
            }
            if buffering_started.elapsed() >= self.policy.buffer_ceiling {
                warn!(buffered_secs, "Buffer ceiling reached, playing anyway");
                ceiling_reached = true;
                break;
            }

            thread::sleep(self.policy.buffer_poll_interval);

            match self.source.fetch().and_then(|text| MediaPlaylist::parse(&text)) {
                Ok(next) => {
                    playlist = next;
                    buffered_secs = playlist.buffered_secs();
                }
                Err(e) => debug!("Manifest re-read failed while buffering: {}", e),
            }
        }

        on_state(&ReadinessState::Playable);

        let readiness = Readiness {
            attempts,
            buffered_secs,
            ceiling_reached,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(
            attempts,
            buffered_secs,
            ceiling_reached,
            elapsed_ms = readiness.elapsed_ms,
            "Stream playable"
        );
        Ok(readiness)
    }

    /// [`wait_with`](Self::wait_with) without progress reporting.
    pub fn wait(&self) -> PlaybackResult<Readiness> {
        self.wait_with(|_| {})
    }

    fn wait_for_manifest(
        &self,
        on_state: &mut impl FnMut(&ReadinessState),
    ) -> PlaybackResult<(u32, MediaPlaylist)> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            on_state(&ReadinessState::Waiting { attempt });

            match self.source.fetch().and_then(|text| MediaPlaylist::parse(&text)) {
                Ok(playlist) => {
                    debug!(attempt, segments = playlist.segments.len(), "Manifest available");
                    return Ok((attempt, playlist));
                }
                Err(e) => {
                    debug!(attempt, max_attempts = self.policy.max_attempts, "Manifest not ready: {}", e);
                }
            }

            if !self.policy.should_retry(attempt) {
                warn!(attempts = attempt, "Gave up waiting for manifest");
                return Err(ReadinessError::StartupTimeout { attempts: attempt });
            }

            thread::sleep(self.policy.retry_interval);
        }
    }
}
