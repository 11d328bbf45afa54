//! Derived activity view model.
//!
//! An [`ActivitySnapshot`] is a whole, immutable view computed from the
//! aggregator's session map. Consumers (dashboard, tail mode) only ever read
//! the latest snapshot; there is no per-field mutable state to drift out of
//! sync.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::AgentId;

/// Feed connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Protocol failure (auth rejected, server-sent error).
    Error,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Most recent skill invocation attached to an agent's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillUse {
    pub skill_type: String,
    pub skill_name: String,
    pub at: DateTime<Utc>,
}

/// Most recent knowledge-base usage attached to an agent's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbUse {
    pub doc_count: u32,
    pub chunk_count: u32,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of all agent activity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub connection: ConnectionState,
    /// Tenant reported by the auth handshake, while connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Agents actively processing (drive the steady glow).
    pub processing: BTreeSet<AgentId>,
    /// Channels tied to a non-ending session.
    pub active_channels: BTreeSet<String>,
    /// Latest skill use per agent, visible until the owning session fades.
    pub recent_skill_use: BTreeMap<AgentId, SkillUse>,
    /// Latest KB use per agent, visible until the owning session fades.
    pub recent_kb_use: BTreeMap<AgentId, KbUse>,
    /// Agents in their coordinated fade-out.
    pub ending_agents: BTreeSet<AgentId>,
    /// Channels whose only session is fading out.
    pub ending_channels: BTreeSet<String>,
}

impl ActivitySnapshot {
    /// A snapshot with no activity in the given connection state.
    pub fn empty(connection: ConnectionState) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// True when no session (active or fading) is visible.
    pub fn is_idle(&self) -> bool {
        self.processing.is_empty()
            && self.ending_agents.is_empty()
            && self.recent_skill_use.is_empty()
            && self.recent_kb_use.is_empty()
    }
}
