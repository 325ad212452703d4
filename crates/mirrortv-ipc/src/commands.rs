//! Requests sent from front ends to the engine.

use serde::{Deserialize, Serialize};

use crate::types::ClientId;

/// Request to start capturing a window for one client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Caller-supplied client key.
    pub client_id: ClientId,

    /// Free-text window target, usually a title picked from the window list.
    pub window_title: String,

    /// OS window id the caller saw when it picked the title, if any.
    #[serde(default)]
    pub window_id: Option<String>,

    /// Label shown to observers. Defaults to the window title.
    #[serde(default)]
    pub display_label: Option<String>,
}

impl StartRequest {
    /// Create a request with no id hint and the title as its label.
    pub fn new(client_id: impl Into<ClientId>, window_title: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            window_title: window_title.into(),
            window_id: None,
            display_label: None,
        }
    }

    /// The label observers see for this session.
    pub fn label(&self) -> &str {
        self.display_label
            .as_deref()
            .filter(|label| !label.trim().is_empty())
            .unwrap_or(&self.window_title)
    }
}
