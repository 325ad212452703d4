//! Core orchestrator for MirrorTV.
//!
//! This crate owns the session registry, drives window resolution and
//! encoder supervision, fans session events out to observers and keeps
//! the error log.

mod config;
mod error;
mod error_log;
mod hub;
mod orchestrator;
mod registry;

pub use config::EngineConfig;
pub use error::EngineError;
pub use error_log::ErrorLog;
pub use hub::BroadcastHub;
pub use orchestrator::{Engine, EngineHandle};
pub use registry::{Reservation, Session, SessionRegistry};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mirrortv_capture::WindowSource;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Default cap on concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Default time shutdown waits for encoders before killing them.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Records kept by the error log.
pub const MAX_ERROR_RECORDS: usize = 100;

/// Depth of the engine command queue.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// How long the engine loop waits before re-checking shutdown progress.
pub const IDLE_TICK: Duration = Duration::from_millis(100);

/// Create an engine and run it on its own thread.
pub fn spawn_engine(
    config: EngineConfig,
    windows: Arc<dyn WindowSource>,
    error_log: Arc<ErrorLog>,
) -> EngineResult<(EngineHandle, JoinHandle<()>)> {
    let (engine, handle) = Engine::new(config, windows, error_log);
    let thread = thread::Builder::new()
        .name("mirrortv-engine".into())
        .spawn(move || engine.run())?;
    Ok((handle, thread))
}
