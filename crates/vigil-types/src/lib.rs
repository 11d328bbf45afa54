//! Shared types for vigil (feed wire protocol, activity view model).

pub mod events;
pub mod snapshot;

pub use events::{AgentId, ClientMessage, FeedEvent, ProcessingStatus};
pub use snapshot::{ActivitySnapshot, ConnectionState, KbUse, SkillUse};
