//! Gateway events
//!
//! Dispatch event names and the payloads the client decodes.

mod event_types;
mod payloads;

pub use event_types::GatewayEventType;
pub use payloads::{
    GuildCreateEvent, GuildEmojisUpdateEvent, GuildMemberRemoveEvent, GuildMembersChunkEvent,
    MemberPayload, MessageDeleteBulkEvent, MessageDeleteEvent, MessageUpdateIds, PartialEmoji,
    PartialUser, PresenceUpdateEvent, ReactionEvent, ReadyEvent, TypingStartEvent,
    UnavailableGuild,
};
