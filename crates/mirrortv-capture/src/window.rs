//! Window sources.

use tracing::{instrument, warn};

use mirrortv_ipc::WindowInfo;

use crate::platform;
use crate::CaptureResult;

/// A live window seen during one enumeration. Only used for matching,
/// never cached as identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCandidate {
    /// OS window id.
    pub os_id: String,

    /// Title exactly as the OS reports it.
    pub raw_title: String,
}

impl WindowCandidate {
    pub fn new(os_id: impl Into<String>, raw_title: impl Into<String>) -> Self {
        Self {
            os_id: os_id.into(),
            raw_title: raw_title.into(),
        }
    }

    /// Convert to the wire type.
    pub fn to_window_info(&self) -> WindowInfo {
        WindowInfo {
            id: self.os_id.clone(),
            title: self.raw_title.clone(),
        }
    }
}

/// Something that can list the host's visible top-level windows.
pub trait WindowSource: Send + Sync {
    /// Query the current windows. May block for a noticeable time.
    fn list_windows(&self) -> CaptureResult<Vec<WindowCandidate>>;

    /// Like [`list_windows`](Self::list_windows) but treats failure as an
    /// empty desktop.
    fn list_windows_or_empty(&self) -> Vec<WindowCandidate> {
        match self.list_windows() {
            Ok(windows) => windows,
            Err(e) => {
                warn!("Window enumeration failed, treating as no windows: {}", e);
                Vec::new()
            }
        }
    }
}

/// Queries the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWindowSource;

impl WindowSource for SystemWindowSource {
    #[instrument(name = "system_list_windows", skip(self))]
    fn list_windows(&self) -> CaptureResult<Vec<WindowCandidate>> {
        platform::enumerate_windows()
    }
}

/// A fixed window list, for tests and headless demos.
#[derive(Debug, Clone, Default)]
pub struct StaticWindowSource {
    windows: Vec<WindowCandidate>,
}

impl StaticWindowSource {
    pub fn new(windows: Vec<WindowCandidate>) -> Self {
        Self { windows }
    }

    /// Build from titles, numbering ids from 1 in order.
    pub fn from_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let windows = titles
            .into_iter()
            .enumerate()
            .map(|(i, title)| WindowCandidate::new((i + 1).to_string(), title))
            .collect();
        Self { windows }
    }
}

impl WindowSource for StaticWindowSource {
    fn list_windows(&self) -> CaptureResult<Vec<WindowCandidate>> {
        Ok(self.windows.clone())
    }
}
