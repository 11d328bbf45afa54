//! Wire protocol for the activity feed.
//!
//! The feed server pushes JSON text frames tagged by `type`. The client sends
//! a single `auth` message after connecting and periodic `ping` messages while
//! connected. Frames with an unrecognized tag deserialize to
//! [`FeedEvent::Unknown`] so a newer server never breaks an older client.

use serde::{Deserialize, Serialize};

/// Opaque agent identifier as assigned by the feed server.
pub type AgentId = u64;

/// Events pushed by the feed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Auth handshake accepted; the connection is now live.
    Authenticated { tenant_id: String },

    /// Protocol-level failure (bad token, server rejection).
    Error { message: String },

    /// Reply to a client `ping`.
    Pong,

    /// An agent started or finished processing a piece of work.
    AgentProcessing {
        agent_id: AgentId,
        status: ProcessingStatus,
        /// Communication surface the work arrived on, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        /// Display name of the message sender, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_name: Option<String>,
    },

    /// An agent invoked a skill while processing.
    SkillUsed {
        agent_id: AgentId,
        skill_type: String,
        skill_name: String,
    },

    /// An agent queried its knowledge base while processing.
    KbUsed {
        agent_id: AgentId,
        doc_count: u32,
        chunk_count: u32,
    },

    /// Any frame with a tag this client does not know about.
    #[serde(other)]
    Unknown,
}

/// `status` field of an `agent_processing` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Start,
    End,
}

/// Messages the client sends to the feed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once, immediately after the socket opens.
    Auth { token: String },
    /// Heartbeat, sent on a fixed interval while connected.
    Ping,
}

impl ClientMessage {
    /// Serializes the message to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"ping"}"#.to_string())
    }
}
