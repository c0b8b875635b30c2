//! Event payload definitions
//!
//! Wire shapes of the dispatch events the client parses. Records that are
//! cached as-is (users, channels, messages, emojis) come straight from
//! `cord_core`.

use chrono::{DateTime, Utc};
use cord_core::{Channel, Emoji, Guild, Member, Snowflake, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// === Connection Events ===

/// READY event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    /// Gateway protocol version
    pub v: u8,
    pub user: User,
    /// Guilds this shard will stream with GUILD_CREATE, all unavailable for now
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Guild stub in READY and GUILD_DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,
    /// `false` in GUILD_DELETE means the client left the guild
    #[serde(default)]
    pub unavailable: bool,
}

// === Guild Events ===

/// GUILD_CREATE event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildCreateEvent {
    #[serde(flatten)]
    pub guild: Guild,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub threads: Vec<Channel>,
    #[serde(default)]
    pub members: Vec<MemberPayload>,
    #[serde(default)]
    pub emojis: Vec<Emoji>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildEmojisUpdateEvent {
    pub guild_id: Snowflake,
    pub emojis: Vec<Emoji>,
}

// === Member Events ===

/// Member data included in events
///
/// GUILD_MEMBER_ADD / UPDATE carry `guild_id`; members nested in
/// GUILD_CREATE and chunks do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberPayload {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
}

impl MemberPayload {
    /// Split into the user record and the membership record.
    ///
    /// `fallback_guild` is used when the payload has no `guild_id`.
    /// Returns `None` when no user or guild can be determined.
    pub fn into_parts(self, fallback_guild: Option<Snowflake>) -> Option<(User, Member)> {
        let user = self.user?;
        let guild_id = self.guild_id.or(fallback_guild)?;
        let member = Member {
            guild_id,
            user_id: user.id,
            nick: self.nick,
            roles: self.roles,
            joined_at: self.joined_at,
            avatar: self.avatar,
            pending: self.pending,
            deaf: self.deaf,
            mute: self.mute,
        };
        Some((user, member))
    }
}

/// GUILD_MEMBER_REMOVE event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMemberRemoveEvent {
    pub guild_id: Snowflake,
    pub user: User,
}

/// GUILD_MEMBERS_CHUNK event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkEvent {
    pub guild_id: Snowflake,
    pub members: Vec<MemberPayload>,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default)]
    pub not_found: Vec<Snowflake>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl GuildMembersChunkEvent {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.chunk_index.saturating_add(1) >= self.chunk_count
    }
}

// === Message Events ===

/// Identifying fields of a MESSAGE_UPDATE; the rest is a partial message
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageUpdateIds {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MessageDeleteEvent {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteBulkEvent {
    pub ids: Vec<Snowflake>,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

/// Emoji reference in reaction events; unicode emojis have no id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialEmoji {
    #[serde(default)]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
}

/// MESSAGE_REACTION_ADD / REMOVE event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub user_id: Snowflake,
    pub channel_id: Snowflake,
    pub message_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub emoji: PartialEmoji,
}

// === Presence Events ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStartEvent {
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub user_id: Snowflake,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default)]
    pub member: Option<MemberPayload>,
}

/// User reference in PRESENCE_UPDATE; only `id` is guaranteed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialUser {
    pub id: Snowflake,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdateEvent {
    pub user: PartialUser,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub activities: Vec<Value>,
}
