//! Shared state for HTTP handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mirrortv_capture::WindowSource;
use mirrortv_encoder::session_dir;
use mirrortv_engine::{EngineHandle, ErrorLog};
use mirrortv_ipc::ClientId;
use mirrortv_playback::ReadinessPolicy;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub windows: Arc<dyn WindowSource>,
    pub error_log: Arc<ErrorLog>,
    pub stream_root: Arc<PathBuf>,
    pub playlist_name: Arc<str>,
    pub readiness: ReadinessPolicy,
}

impl AppState {
    /// Output directory of a client's session.
    pub fn session_dir(&self, client_id: &ClientId) -> PathBuf {
        session_dir(&self.stream_root, client_id)
    }

    /// Manifest path of a client's session.
    pub fn playlist_path(&self, client_id: &ClientId) -> PathBuf {
        self.session_dir(client_id).join(Path::new(&*self.playlist_name))
    }
}
