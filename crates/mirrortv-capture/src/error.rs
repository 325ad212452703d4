//! Error types for the capture module.

use thiserror::Error;

/// Errors that can occur while querying or resolving windows.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The window query helper could not be run.
    #[error("Window query failed: {0}")]
    QueryFailed(String),

    /// No live window matched the target.
    #[error("No window matches \"{0}\"")]
    WindowNotFound(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}
