//! Error types for the encoder module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while launching an encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder executable could not be started.
    #[error("Failed to spawn encoder {program}: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The session working directory could not be prepared.
    #[error("Failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A monitor thread could not be started.
    #[error("Failed to start monitor thread: {0}")]
    Monitor(std::io::Error),
}

impl EncoderError {
    /// The underlying IO error kind, for choosing a remediation hint.
    pub fn io_kind(&self) -> std::io::ErrorKind {
        match self {
            Self::SpawnFailed { source, .. } | Self::OutputDir { source, .. } => source.kind(),
            Self::Monitor(source) => source.kind(),
        }
    }
}
