use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};

use beacon_types::gateway::{
    GatewayPayload, GuildCreate, GuildMemberEvent, GuildMembersChunk, Presence, Ready,
    RequestGuildMembers, UnavailableGuild, opcode,
};
use beacon_types::status::Snowflake;

use crate::cache::PresenceCache;
use crate::source::SourceEvent;

/// What the connection loop should do after a dispatch was applied.
#[derive(Debug)]
pub(crate) enum Action {
    Emit(SourceEvent),
    Send(GatewayPayload),
}

#[derive(Debug, Clone)]
pub(crate) struct SessionInfo {
    pub id: String,
    pub resume_url: Option<String>,
}

/// Applies gateway dispatches to the presence cache and decides which
/// source events they produce. Holds no socket, so it is driven directly
/// in tests.
pub(crate) struct DispatchHandler {
    cache: PresenceCache,
    target: Snowflake,
    session: Option<SessionInfo>,
    /// Guilds announced by READY that have not streamed in yet
    pending_guilds: HashSet<Snowflake>,
    awaiting_guilds: bool,
}

impl DispatchHandler {
    pub fn new(cache: PresenceCache, target: Snowflake) -> Self {
        Self {
            cache,
            target,
            session: None,
            pending_guilds: HashSet::new(),
            awaiting_guilds: false,
        }
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn forget_session(&mut self) {
        self.session = None;
    }

    pub fn handle(&mut self, event: &str, data: Value) -> serde_json::Result<Vec<Action>> {
        let mut actions = Vec::new();

        match event {
            "READY" => {
                let ready: Ready = serde_json::from_value(data)?;
                info!(
                    "Gateway session {} ready, {} guilds announced",
                    ready.session_id,
                    ready.guilds.len()
                );
                self.cache.clear();
                self.session = Some(SessionInfo {
                    id: ready.session_id,
                    resume_url: ready.resume_gateway_url,
                });
                self.pending_guilds = ready.guilds.iter().map(|g| g.id).collect();
                self.awaiting_guilds = true;
                self.finish_guild_stream(&mut actions);
            }

            "RESUMED" => {
                info!("Gateway session resumed");
                actions.push(Action::Emit(SourceEvent::Connected));
            }

            "GUILD_CREATE" => {
                let guild: GuildCreate = serde_json::from_value(data)?;
                self.pending_guilds.remove(&guild.id);
                if !guild.unavailable {
                    self.cache.upsert_guild(&guild);
                    debug!(
                        "Guild {} cached with {} members",
                        guild.id,
                        guild.members.len()
                    );
                    if !self.cache.contains_member(guild.id, self.target) {
                        actions.push(Action::Send(GatewayPayload::new(
                            opcode::REQUEST_GUILD_MEMBERS,
                            RequestGuildMembers {
                                guild_id: guild.id,
                                user_ids: vec![self.target],
                                presences: true,
                            },
                        )?));
                    }
                }
                self.finish_guild_stream(&mut actions);
            }

            "GUILD_DELETE" => {
                let guild: UnavailableGuild = serde_json::from_value(data)?;
                self.pending_guilds.remove(&guild.id);
                self.cache.remove_guild(guild.id);
                self.finish_guild_stream(&mut actions);
            }

            "GUILD_MEMBER_ADD" => {
                let member: GuildMemberEvent = serde_json::from_value(data)?;
                self.cache.add_member(member.guild_id, member.user.id);
            }

            "GUILD_MEMBER_REMOVE" => {
                let member: GuildMemberEvent = serde_json::from_value(data)?;
                self.cache.remove_member(member.guild_id, member.user.id);
            }

            "GUILD_MEMBERS_CHUNK" => {
                let chunk: GuildMembersChunk = serde_json::from_value(data)?;
                if chunk.not_found.contains(&self.target) {
                    debug!("Tracked user is not a member of guild {}", chunk.guild_id);
                }
                self.cache.apply_members_chunk(&chunk);
                for presence in &chunk.presences {
                    actions.push(Action::Emit(SourceEvent::PresenceChanged {
                        user_id: presence.user.id,
                        status: presence.status,
                    }));
                }
            }

            "PRESENCE_UPDATE" => {
                let presence: Presence = serde_json::from_value(data)?;
                if let Some(guild_id) = presence.guild_id {
                    self.cache
                        .apply_presence(guild_id, presence.user.id, presence.status);
                }
                actions.push(Action::Emit(SourceEvent::PresenceChanged {
                    user_id: presence.user.id,
                    status: presence.status,
                }));
            }

            _ => {}
        }

        Ok(actions)
    }

    /// Emit `Connected` once every guild READY announced has arrived.
    fn finish_guild_stream(&mut self, actions: &mut Vec<Action>) {
        if self.awaiting_guilds && self.pending_guilds.is_empty() {
            self.awaiting_guilds = false;
            actions.push(Action::Emit(SourceEvent::Connected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::GuildDirectory;
    use beacon_types::status::RawStatus;
    use serde_json::json;

    const TARGET: Snowflake = Snowflake(42);

    fn emitted(actions: &[Action]) -> Vec<SourceEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(ev) => Some(ev.clone()),
                Action::Send(_) => None,
            })
            .collect()
    }

    fn sent(actions: &[Action]) -> Vec<&GatewayPayload> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(p) => Some(p),
                Action::Emit(_) => None,
            })
            .collect()
    }

    #[test]
    fn connected_waits_for_announced_guilds() {
        let cache = PresenceCache::new();
        let mut handler = DispatchHandler::new(cache.clone(), TARGET);

        let actions = handler
            .handle(
                "READY",
                json!({
                    "session_id": "abc",
                    "resume_gateway_url": "wss://resume.example",
                    "guilds": [{ "id": "1", "unavailable": true }, { "id": "2", "unavailable": true }],
                }),
            )
            .unwrap();
        assert!(emitted(&actions).is_empty());
        assert_eq!(handler.session().unwrap().id, "abc");

        let actions = handler
            .handle(
                "GUILD_CREATE",
                json!({
                    "id": "1",
                    "members": [{ "user": { "id": "42" } }],
                    "presences": [{ "user": { "id": "42" }, "status": "online" }],
                }),
            )
            .unwrap();
        assert!(emitted(&actions).is_empty());
        assert!(sent(&actions).is_empty());

        let actions = handler.handle("GUILD_CREATE", json!({ "id": "2" })).unwrap();
        assert_eq!(emitted(&actions), vec![SourceEvent::Connected]);
        assert_eq!(cache.guilds().unwrap().len(), 2);
    }

    #[test]
    fn ready_without_guilds_connects_immediately() {
        let mut handler = DispatchHandler::new(PresenceCache::new(), TARGET);
        let actions = handler
            .handle("READY", json!({ "session_id": "abc", "guilds": [] }))
            .unwrap();
        assert_eq!(emitted(&actions), vec![SourceEvent::Connected]);
    }

    #[test]
    fn guild_without_target_requests_member() {
        let mut handler = DispatchHandler::new(PresenceCache::new(), TARGET);
        let actions = handler
            .handle("GUILD_CREATE", json!({ "id": "7", "members": [] }))
            .unwrap();

        let payloads = sent(&actions);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].op, opcode::REQUEST_GUILD_MEMBERS);
        assert_eq!(payloads[0].d["user_ids"], json!(["42"]));
        assert_eq!(payloads[0].d["presences"], json!(true));
    }

    #[test]
    fn presence_update_emits_and_caches() {
        let cache = PresenceCache::new();
        let mut handler = DispatchHandler::new(cache.clone(), TARGET);
        let actions = handler
            .handle(
                "PRESENCE_UPDATE",
                json!({ "user": { "id": "42" }, "guild_id": "9", "status": "idle" }),
            )
            .unwrap();

        assert_eq!(
            emitted(&actions),
            vec![SourceEvent::PresenceChanged {
                user_id: TARGET,
                status: RawStatus::Idle,
            }]
        );
        assert_eq!(cache.guilds().unwrap()[0].members[&TARGET], RawStatus::Idle);
    }

    #[test]
    fn members_chunk_reports_presences() {
        let cache = PresenceCache::new();
        let mut handler = DispatchHandler::new(cache.clone(), TARGET);
        let actions = handler
            .handle(
                "GUILD_MEMBERS_CHUNK",
                json!({
                    "guild_id": "9",
                    "members": [{ "user": { "id": "42" } }],
                    "presences": [{ "user": { "id": "42" }, "status": "dnd" }],
                    "chunk_index": 0,
                    "chunk_count": 1,
                }),
            )
            .unwrap();
        assert_eq!(emitted(&actions).len(), 1);
        assert!(cache.contains_member(Snowflake(9), TARGET));
    }

    #[test]
    fn member_add_inherits_presence_from_other_guilds() {
        let cache = PresenceCache::new();
        let mut handler = DispatchHandler::new(cache.clone(), TARGET);
        handler.handle("GUILD_CREATE", json!({ "id": "10" })).unwrap();
        handler
            .handle(
                "GUILD_CREATE",
                json!({
                    "id": "20",
                    "members": [{ "user": { "id": "42" } }],
                    "presences": [{ "user": { "id": "42" }, "status": "online" }],
                }),
            )
            .unwrap();
        handler
            .handle(
                "GUILD_MEMBER_ADD",
                json!({ "guild_id": "10", "user": { "id": "42" }, "roles": [] }),
            )
            .unwrap();

        let guilds = cache.guilds().unwrap();
        let first = guilds.iter().find_map(|g| g.members.get(&TARGET).copied());
        assert_eq!(guilds[0].id, Snowflake(10));
        assert_eq!(first, Some(RawStatus::Online));
    }

    #[test]
    fn member_add_without_known_presence_is_offline() {
        let cache = PresenceCache::new();
        let mut handler = DispatchHandler::new(cache.clone(), TARGET);
        handler
            .handle("GUILD_MEMBER_ADD", json!({ "guild_id": "10", "user": { "id": "42" } }))
            .unwrap();
        assert_eq!(cache.guilds().unwrap()[0].members[&TARGET], RawStatus::Offline);
    }

    #[test]
    fn malformed_dispatch_is_an_error() {
        let mut handler = DispatchHandler::new(PresenceCache::new(), TARGET);
        assert!(handler.handle("PRESENCE_UPDATE", json!({ "status": 5 })).is_err());
        assert!(handler.handle("TYPING_START", json!({})).unwrap().is_empty());
    }
}
