//! Window enumeration via `EnumWindows`.

use tracing::{debug, instrument};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowRect, GetWindowTextLengthW, GetWindowTextW, IsIconic, IsWindowVisible,
};

use crate::error::CaptureError;
use crate::window::WindowCandidate;
use crate::CaptureResult;

/// Windows narrower or shorter than this are tool tips and the like.
const MIN_WINDOW_EDGE: i32 = 100;

/// Enumerate visible, titled top-level windows.
#[instrument(name = "enumerate_windows")]
pub(crate) fn enumerate_windows() -> CaptureResult<Vec<WindowCandidate>> {
    let mut windows: Vec<WindowCandidate> = Vec::new();

    unsafe {
        EnumWindows(
            Some(enum_window_callback),
            LPARAM(&mut windows as *mut Vec<WindowCandidate> as isize),
        )
        .map_err(|e| CaptureError::WindowsApi {
            message: format!("Failed to enumerate windows: {}", e.message()),
            source: Some(e),
        })?;
    }

    debug!(count = windows.len(), "Enumerated windows");
    Ok(windows)
}

unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowCandidate>);

    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL::from(true);
    }

    let title_length = GetWindowTextLengthW(hwnd);
    if title_length == 0 {
        return BOOL::from(true);
    }

    let mut title_buffer: Vec<u16> = vec![0; (title_length + 1) as usize];
    let actual_length = GetWindowTextW(hwnd, &mut title_buffer);
    if actual_length == 0 {
        return BOOL::from(true);
    }

    let title = String::from_utf16_lossy(&title_buffer[..actual_length as usize]);
    if title.trim().is_empty() {
        return BOOL::from(true);
    }

    // Minimized windows report a bogus rect but gdigrab can still find them
    // by title, so only size-filter restored ones.
    if !IsIconic(hwnd).as_bool() {
        let mut rect = RECT::default();
        if GetWindowRect(hwnd, &mut rect).is_err() {
            return BOOL::from(true);
        }
        if rect.right - rect.left < MIN_WINDOW_EDGE || rect.bottom - rect.top < MIN_WINDOW_EDGE {
            return BOOL::from(true);
        }
    }

    windows.push(WindowCandidate::new((hwnd.0 as isize).to_string(), title));
    BOOL::from(true)
}
