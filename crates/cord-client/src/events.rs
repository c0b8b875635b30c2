//! Events delivered to handlers and waiters
//!
//! Names follow the `on_<name>` handler convention: [`Event::name`] is the
//! part after `on_`.

use cord_core::{Channel, Emoji, Guild, Member, Message, Snowflake, User};
use cord_gateway::events::{
    MessageDeleteBulkEvent, MessageDeleteEvent, PresenceUpdateEvent, ReactionEvent,
    TypingStartEvent,
};
use serde_json::Value;

/// A client-level event
#[derive(Debug, Clone)]
pub enum Event {
    // === Connection ===
    /// Socket open and HELLO received
    Connect,
    /// The connection dropped; the client may reconnect
    Disconnect,
    /// Startup finished: every startup guild arrived or timed out
    Ready,
    Resumed,
    /// Every inbound frame, only with debug events enabled
    SocketRawReceive(Value),

    // === Guilds ===
    /// A startup or outage guild became available
    GuildAvailable(Guild),
    GuildUnavailable(Guild),
    /// The client joined a new guild
    GuildJoin(Guild),
    /// The client left or was removed from a guild
    GuildRemove(Guild),
    GuildUpdate { before: Guild, after: Guild },
    GuildEmojisUpdate {
        guild_id: Snowflake,
        before: Vec<Emoji>,
        after: Vec<Emoji>,
    },

    // === Channels ===
    ChannelCreate(Channel),
    ChannelUpdate { before: Channel, after: Channel },
    ChannelDelete(Channel),

    // === Members and users ===
    MemberJoin { user: User, member: Member },
    MemberUpdate { before: Member, after: Member },
    /// `member` is the cached record, if there was one
    MemberRemove {
        guild_id: Snowflake,
        user: User,
        member: Option<Member>,
    },
    UserUpdate { before: User, after: User },
    PresenceUpdate(PresenceUpdateEvent),
    Typing(TypingStartEvent),

    // === Messages ===
    Message(Message),
    /// Edit of a cached message
    MessageEdit { before: Message, after: Message },
    /// Every MESSAGE_UPDATE, cached or not
    RawMessageEdit {
        message_id: Snowflake,
        channel_id: Snowflake,
        data: Value,
    },
    /// Deletion of a cached message
    MessageDelete(Message),
    RawMessageDelete(MessageDeleteEvent),
    /// The cached subset of a bulk deletion
    BulkMessageDelete(Vec<Message>),
    RawBulkMessageDelete(MessageDeleteBulkEvent),
    RawReactionAdd(ReactionEvent),
    RawReactionRemove(ReactionEvent),

    // === Interactions ===
    Interaction(Value),

    /// Application-defined event passed to `Client::dispatch`
    Custom { name: String, data: Value },
}

impl Event {
    /// Event name without the `on_` prefix
    pub fn name(&self) -> &str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Ready => "ready",
            Self::Resumed => "resumed",
            Self::SocketRawReceive(_) => "socket_raw_receive",
            Self::GuildAvailable(_) => "guild_available",
            Self::GuildUnavailable(_) => "guild_unavailable",
            Self::GuildJoin(_) => "guild_join",
            Self::GuildRemove(_) => "guild_remove",
            Self::GuildUpdate { .. } => "guild_update",
            Self::GuildEmojisUpdate { .. } => "guild_emojis_update",
            Self::ChannelCreate(c) if c.is_private() => "private_channel_create",
            Self::ChannelCreate(_) => "guild_channel_create",
            Self::ChannelUpdate { after, .. } if after.is_private() => "private_channel_update",
            Self::ChannelUpdate { .. } => "guild_channel_update",
            Self::ChannelDelete(c) if c.is_private() => "private_channel_delete",
            Self::ChannelDelete(_) => "guild_channel_delete",
            Self::MemberJoin { .. } => "member_join",
            Self::MemberUpdate { .. } => "member_update",
            Self::MemberRemove { .. } => "member_remove",
            Self::UserUpdate { .. } => "user_update",
            Self::PresenceUpdate(_) => "presence_update",
            Self::Typing(_) => "typing",
            Self::Message(_) => "message",
            Self::MessageEdit { .. } => "message_edit",
            Self::RawMessageEdit { .. } => "raw_message_edit",
            Self::MessageDelete(_) => "message_delete",
            Self::RawMessageDelete(_) => "raw_message_delete",
            Self::BulkMessageDelete(_) => "bulk_message_delete",
            Self::RawBulkMessageDelete(_) => "raw_bulk_message_delete",
            Self::RawReactionAdd(_) => "raw_reaction_add",
            Self::RawReactionRemove(_) => "raw_reaction_remove",
            Self::Interaction(_) => "interaction",
            Self::Custom { name, .. } => name,
        }
    }

    /// Guild the event belongs to, when it has one
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::GuildAvailable(g)
            | Self::GuildUnavailable(g)
            | Self::GuildJoin(g)
            | Self::GuildRemove(g) => Some(g.id),
            Self::GuildUpdate { after, .. } => Some(after.id),
            Self::GuildEmojisUpdate { guild_id, .. } | Self::MemberRemove { guild_id, .. } => {
                Some(*guild_id)
            }
            Self::ChannelCreate(c) | Self::ChannelDelete(c) => c.guild_id,
            Self::ChannelUpdate { after, .. } => after.guild_id,
            Self::MemberJoin { member, .. } => Some(member.guild_id),
            Self::MemberUpdate { after, .. } => Some(after.guild_id),
            Self::Message(m) | Self::MessageDelete(m) => m.guild_id,
            Self::MessageEdit { after, .. } => after.guild_id,
            Self::RawMessageDelete(e) => e.guild_id,
            Self::RawBulkMessageDelete(e) => e.guild_id,
            Self::RawReactionAdd(e) | Self::RawReactionRemove(e) => e.guild_id,
            Self::Typing(e) => e.guild_id,
            Self::PresenceUpdate(e) => e.guild_id,
            _ => None,
        }
    }

    /// The message, for `message` events
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cord_core::ChannelType;

    #[test]
    fn test_channel_event_names_depend_on_kind() {
        let dm = Channel::new(Snowflake::new(1), ChannelType::Dm);
        let text = Channel::new_text(Snowflake::new(2), Snowflake::new(3), "general");

        assert_eq!(Event::ChannelCreate(dm.clone()).name(), "private_channel_create");
        assert_eq!(Event::ChannelDelete(text.clone()).name(), "guild_channel_delete");
        assert_eq!(Event::ChannelCreate(text.clone()).guild_id(), Some(Snowflake::new(3)));
        assert_eq!(
            Event::ChannelUpdate {
                before: dm.clone(),
                after: dm
            }
            .name(),
            "private_channel_update"
        );
    }

    #[test]
    fn test_custom_event_name() {
        let event = Event::Custom {
            name: "tick".to_string(),
            data: Value::Null,
        };
        assert_eq!(event.name(), "tick");
        assert_eq!(event.to_string(), "tick");
        assert_eq!(event.guild_id(), None);
    }
}
