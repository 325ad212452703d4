//! Window enumeration through `wmctrl -l` on X11 desktops.

use std::process::Command;

use tracing::{debug, instrument};

use crate::error::CaptureError;
use crate::window::WindowCandidate;
use crate::CaptureResult;

#[instrument(name = "enumerate_windows")]
pub(crate) fn enumerate_windows() -> CaptureResult<Vec<WindowCandidate>> {
    let output = Command::new("wmctrl")
        .arg("-l")
        .output()
        .map_err(|e| CaptureError::QueryFailed(format!("wmctrl: {}", e)))?;

    if !output.status.success() {
        return Err(CaptureError::QueryFailed(format!(
            "wmctrl exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let windows = parse_wmctrl_list(&String::from_utf8_lossy(&output.stdout));
    debug!(count = windows.len(), "Enumerated windows");
    Ok(windows)
}

/// Parse `wmctrl -l` lines: `<id> <desktop> <host> <title...>`.
fn parse_wmctrl_list(stdout: &str) -> Vec<WindowCandidate> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim_start();
            let mut fields = [""; 3];
            for field in fields.iter_mut() {
                let end = rest.find(char::is_whitespace)?;
                *field = &rest[..end];
                rest = rest[end..].trim_start();
            }
            let [id, desktop, _host] = fields;
            // Desktop -1 marks sticky panels and docks.
            if desktop == "-1" || rest.trim().is_empty() {
                return None;
            }
            Some(WindowCandidate::new(id, rest.trim_end()))
        })
        .collect()
}
