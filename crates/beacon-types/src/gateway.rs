//! Discord gateway wire models (API v10, JSON encoding).
//!
//! Only the opcodes and dispatches the presence tracker cares about are
//! modelled. Unknown dispatches are still decoded as a [`GatewayPayload`]
//! and simply ignored by the client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::{RawStatus, Snowflake};

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MEMBERS: u64 = 1 << 1;
    pub const GUILD_PRESENCES: u64 = 1 << 8;
}

/// Every frame on the gateway, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn new(op: u8, d: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(d)?,
            s: None,
            t: None,
        })
    }

    pub fn heartbeat(seq: Option<u64>) -> Self {
        Self {
            op: opcode::HEARTBEAT,
            d: seq.map_or(Value::Null, Value::from),
            s: None,
            t: None,
        }
    }
}

// -- Outbound --

#[derive(Debug, Clone, Serialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestGuildMembers {
    pub guild_id: Snowflake,
    pub user_ids: Vec<Snowflake>,
    pub presences: bool,
}

// -- Inbound --

#[derive(Debug, Clone, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Ready {
    pub session_id: String,
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialUser {
    pub id: Snowflake,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub user: Option<PartialUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Presence {
    pub user: PartialUser,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub status: RawStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreate {
    pub id: Snowflake,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildMembersChunk {
    pub guild_id: Snowflake,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(default)]
    pub not_found: Vec<Snowflake>,
}

/// Shared shape of GUILD_MEMBER_ADD and GUILD_MEMBER_REMOVE.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildMemberEvent {
    pub guild_id: Snowflake,
    pub user: PartialUser,
}
