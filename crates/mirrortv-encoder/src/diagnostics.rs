//! Encoder diagnostic classification.
//!
//! Classification only picks the remediation text for the error log. It
//! never changes how a session is handled.

use std::collections::VecDeque;
use std::io;

use crate::DIAGNOSTIC_TAIL_LINES;

/// Most likely cause of an encoder failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureHint {
    /// The capture target window disappeared or was renamed.
    WindowNotFound,

    /// The encoder executable is missing.
    EncoderMissing,

    /// The OS refused access.
    PermissionDenied,

    /// The requested codec or hardware encoder is unavailable.
    CodecUnavailable,

    /// The screen grabber itself failed.
    CaptureUnsupported,

    /// Nothing recognisable.
    Unknown,
}

impl FailureHint {
    /// Human-facing remediation steps.
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::WindowNotFound => {
                "SUGGESTED FIX:\n\
                 1. The window title may have changed (common with video sites)\n\
                 2. The window may be closed or minimized\n\
                 3. Refresh the window list and select the window again\n\
                 4. Make sure the window is visible and not minimized"
            }
            Self::EncoderMissing => {
                "SUGGESTED FIX:\n\
                 1. Install FFmpeg: https://ffmpeg.org/download.html\n\
                 2. Make sure it is on PATH or pass its location with --ffmpeg"
            }
            Self::PermissionDenied => {
                "SUGGESTED FIX:\n\
                 1. Check that the encoder binary is executable\n\
                 2. Check write access to the stream directory\n\
                 3. Try running the server with elevated privileges"
            }
            Self::CodecUnavailable => {
                "SUGGESTED FIX:\n\
                 1. Check that an NVIDIA GPU and current drivers are installed\n\
                 2. Run `ffmpeg -encoders` and look for h264_nvenc\n\
                 3. Switch the encoder arguments to libx264"
            }
            Self::CaptureUnsupported => {
                "SUGGESTED FIX:\n\
                 1. Desktop capture may not be supported on this system\n\
                 2. Try running as administrator\n\
                 3. Check gdigrab: ffmpeg -f gdigrab -list_devices true -i dummy"
            }
            Self::Unknown => "SUGGESTED FIX:\n1. Check the encoder output above and the server log",
        }
    }
}

/// Pick a hint from the encoder's diagnostic lines. Later lines win.
pub fn classify_diagnostics<S: AsRef<str>>(lines: &[S]) -> FailureHint {
    lines
        .iter()
        .rev()
        .map(|line| classify_line(line.as_ref()))
        .find(|hint| *hint != FailureHint::Unknown)
        .unwrap_or(FailureHint::Unknown)
}

fn classify_line(line: &str) -> FailureHint {
    let lower = line.to_lowercase();

    if lower.contains("can't find window") || lower.contains("target not found") {
        FailureHint::WindowNotFound
    } else if lower.contains("unknown encoder")
        || lower.contains("could not find codec")
        || lower.contains("no capable devices found")
        || lower.contains("cannot load nvcuda")
    {
        FailureHint::CodecUnavailable
    } else if lower.contains("permission denied") || lower.contains("access is denied") {
        FailureHint::PermissionDenied
    } else if lower.contains("gdigrab") || lower.contains("desktop") {
        FailureHint::CaptureUnsupported
    } else {
        FailureHint::Unknown
    }
}

/// Pick a hint for a failed spawn.
pub fn classify_spawn_error(kind: io::ErrorKind) -> FailureHint {
    match kind {
        io::ErrorKind::NotFound => FailureHint::EncoderMissing,
        io::ErrorKind::PermissionDenied => FailureHint::PermissionDenied,
        _ => FailureHint::Unknown,
    }
}

/// The last few diagnostic lines an encoder printed.
#[derive(Debug, Clone)]
pub struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    /// Lines oldest first.
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for DiagnosticTail {
    fn default() -> Self {
        Self::new(DIAGNOSTIC_TAIL_LINES)
    }
}
