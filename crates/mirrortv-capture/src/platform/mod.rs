//! Per-OS window enumeration.

#[cfg(windows)]
mod win32;
#[cfg(not(windows))]
mod wmctrl;

#[cfg(windows)]
pub(crate) use win32::enumerate_windows;
#[cfg(not(windows))]
pub(crate) use wmctrl::enumerate_windows;
