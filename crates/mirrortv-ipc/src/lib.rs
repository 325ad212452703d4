//! Typed messages shared between the MirrorTV engine and its front ends.
//!
//! This crate defines the request payloads, session snapshots, hub events
//! and error records that cross the boundary between the orchestrator core
//! and the HTTP/SSE surface.

mod commands;
mod errors;
mod events;
mod state;
mod types;

pub use commands::StartRequest;
pub use errors::{ErrorKind, ErrorLogSnapshot, ErrorRecord};
pub use events::HubEvent;
pub use state::{ExitStatus, SessionState, StopReason};
pub use types::{ClientId, Roster, SessionSummary, TargetDescriptor, WindowInfo, WindowSuggestion};

use crossbeam_channel::{Receiver, Sender};

/// Queue depth for each hub subscriber.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Creates a bounded channel for delivering hub events to one subscriber.
pub fn subscriber_channel() -> (Sender<HubEvent>, Receiver<HubEvent>) {
    crossbeam_channel::bounded(SUBSCRIBER_CHANNEL_CAPACITY)
}
