//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded, tagged by `type`, and use snake_case for
//! field names.

use grove_engine::Patch;
use serde::{Deserialize, Serialize};

use crate::documents::LoggedPatch;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Request logged patches after a sequence number.
    Pull {
        /// Last sequence number the client has applied (absent for initial sync)
        #[serde(default)]
        since: Option<i64>,
        /// Maximum number of patches to return
        #[serde(default)]
        limit: Option<i64>,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Apply patches to the connection's document.
    Push {
        /// Patches in application order
        patches: Vec<Patch>,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Response to a pull request.
    PullResponse {
        patches: Vec<LoggedPatch>,
        /// Sequence number to pull from next
        seq: i64,
        has_more: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Response to a push request.
    PushResponse {
        /// Document sequence number after the push
        seq: i64,
        /// Number of pushed patches that applied
        applied: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Sent to every other connection on the document after a push.
    PatchesAvailable { patches: Vec<LoggedPatch>, seq: i64 },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Create a patches_available notification. `None` if nothing was logged.
    pub fn patches_available(patches: Vec<LoggedPatch>) -> Option<Self> {
        let seq = patches.last()?.seq;
        Some(ServerMessage::PatchesAvailable { patches, seq })
    }
}
