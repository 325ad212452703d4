//! Error types for playback readiness.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The manifest never became fetchable.
    #[error("Stream did not start after {attempts} attempts")]
    StartupTimeout { attempts: u32 },

    /// One manifest fetch failed.
    #[error("Manifest unavailable at {path}: {source}")]
    ManifestUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest was fetched but is not an HLS playlist.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}
