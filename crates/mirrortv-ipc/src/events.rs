//! Events broadcast from the engine to every observer.

use serde::{Deserialize, Serialize};

use crate::types::{ClientId, Roster};

/// Lifecycle notifications published through the broadcast hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum HubEvent {
    /// The set of active sessions changed.
    RosterChanged(Roster),

    /// A session was torn down.
    SessionStopped { client_id: ClientId },

    /// A session failed.
    SessionError { client_id: ClientId, message: String },
}

impl HubEvent {
    /// Event name used on the wire (SSE `event:` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::RosterChanged(_) => "roster-changed",
            Self::SessionStopped { .. } => "session-stopped",
            Self::SessionError { .. } => "session-error",
        }
    }

    /// Client the event concerns, if any.
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Self::RosterChanged(_) => None,
            Self::SessionStopped { client_id } | Self::SessionError { client_id, .. } => {
                Some(client_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_wire_format() {
        let event = HubEvent::SessionError {
            client_id: ClientId::from("c1"),
            message: "boom".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "session-error");
        assert_eq!(value["clientId"], "c1");
        assert_eq!(value["message"], "boom");
        assert_eq!(event.name(), "session-error");
    }
}
