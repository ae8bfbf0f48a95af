use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use beacon_types::gateway::{GuildCreate, GuildMembersChunk, Member, Presence};
use beacon_types::status::{RawStatus, Snowflake};

use crate::source::{GuildDirectory, GuildSnapshot};

/// Guild membership and presence as last reported by the gateway.
///
/// Written only by the gateway client, read by the watcher during
/// reconciliation.
#[derive(Clone, Default)]
pub struct PresenceCache {
    inner: Arc<RwLock<CacheInner>>,
}

#[derive(Default)]
struct CacheInner {
    /// Guild IDs in the order the gateway delivered them
    order: Vec<Snowflake>,

    /// guild_id -> (user_id -> status)
    guilds: HashMap<Snowflake, HashMap<Snowflake, RawStatus>>,
}

impl CacheInner {
    fn guild_mut(&mut self, guild_id: Snowflake) -> &mut HashMap<Snowflake, RawStatus> {
        if !self.guilds.contains_key(&guild_id) {
            self.order.push(guild_id);
        }
        self.guilds.entry(guild_id).or_default()
    }
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheInner> {
        // The cache is rebuilt from the gateway on every identify, so a
        // poisoned lock holds nothing worth refusing.
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop everything. Called when a fresh session starts.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.order.clear();
        inner.guilds.clear();
    }

    /// Replace a guild with the contents of GUILD_CREATE. Members without a
    /// presence entry are offline.
    pub fn upsert_guild(&self, guild: &GuildCreate) {
        let mut inner = self.write();
        let members = inner.guild_mut(guild.id);
        members.clear();
        merge_members(members, &guild.members, &guild.presences);
    }

    pub fn apply_members_chunk(&self, chunk: &GuildMembersChunk) {
        let mut inner = self.write();
        let members = inner.guild_mut(chunk.guild_id);
        merge_members(members, &chunk.members, &chunk.presences);
    }

    pub fn remove_guild(&self, guild_id: Snowflake) {
        let mut inner = self.write();
        inner.guilds.remove(&guild_id);
        inner.order.retain(|id| *id != guild_id);
    }

    /// New member; keeps any status we already hold for them. Presence is
    /// account-wide, so a status seen in another guild carries over.
    pub fn add_member(&self, guild_id: Snowflake, user_id: Snowflake) {
        let mut inner = self.write();
        let known = inner
            .guilds
            .values()
            .find_map(|members| members.get(&user_id).copied())
            .unwrap_or(RawStatus::Offline);
        inner.guild_mut(guild_id).entry(user_id).or_insert(known);
    }

    pub fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) {
        if let Some(members) = self.write().guilds.get_mut(&guild_id) {
            members.remove(&user_id);
        }
    }

    pub fn apply_presence(&self, guild_id: Snowflake, user_id: Snowflake, status: RawStatus) {
        self.write().guild_mut(guild_id).insert(user_id, status);
    }

    pub fn contains_member(&self, guild_id: Snowflake, user_id: Snowflake) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .guilds
            .get(&guild_id)
            .is_some_and(|members| members.contains_key(&user_id))
    }
}

fn merge_members(
    members: &mut HashMap<Snowflake, RawStatus>,
    listed: &[Member],
    presences: &[Presence],
) {
    for user in listed.iter().filter_map(|m| m.user.as_ref()) {
        members.entry(user.id).or_insert(RawStatus::Offline);
    }
    for presence in presences {
        members.insert(presence.user.id, presence.status);
    }
}

impl GuildDirectory for PresenceCache {
    fn guilds(&self) -> anyhow::Result<Vec<GuildSnapshot>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| anyhow::anyhow!("presence cache lock poisoned: {}", e))?;

        Ok(inner
            .order
            .iter()
            .filter_map(|id| {
                inner.guilds.get(id).map(|members| GuildSnapshot {
                    id: *id,
                    members: members.clone(),
                })
            })
            .collect())
    }
}
