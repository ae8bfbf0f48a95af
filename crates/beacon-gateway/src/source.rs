use std::collections::HashMap;

use beacon_types::status::{RawStatus, Snowflake};

/// Signals the event source feeds into the watcher, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Handshake finished and the guild snapshot is populated.
    Connected,
    /// The session ended; the source is reconnecting on its own.
    Disconnected,
    /// Someone's presence changed. Not necessarily the tracked user.
    PresenceChanged { user_id: Snowflake, status: RawStatus },
}

/// Membership and presence of one guild at a point in time.
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub id: Snowflake,
    pub members: HashMap<Snowflake, RawStatus>,
}

/// Queryable view of every guild the source can see, in a stable order.
pub trait GuildDirectory: Send + Sync {
    fn guilds(&self) -> anyhow::Result<Vec<GuildSnapshot>>;
}
