//! Per-session working directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use mirrortv_ipc::ClientId;

/// Directory a client's manifest and segments live in.
///
/// The client id is hex-encoded so an arbitrary caller-supplied key can
/// never escape `root` or collide with another client's directory. Ids
/// longer than [`MAX_CLIENT_ID_BYTES`](crate::MAX_CLIENT_ID_BYTES) do not
/// fit in a file name and must be rejected before getting here.
pub fn session_dir(root: &Path, client_id: &ClientId) -> PathBuf {
    root.join(hex::encode(client_id.as_str()))
}

/// Create an empty working directory for a new session, clearing anything
/// a previous run left behind.
pub fn prepare_session_dir(root: &Path, client_id: &ClientId) -> io::Result<PathBuf> {
    let dir = session_dir(root, client_id);
    if remove_session_dir(&dir)? {
        debug!(path = %dir.display(), "Removed stale session directory");
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Recursively delete a session directory. Returns whether anything was
/// removed; an absent directory is not an error.
pub fn remove_session_dir(dir: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
