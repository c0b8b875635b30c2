//! # cord-core
//!
//! Domain layer: snowflake ids, gateway intents, the member cache policy and
//! the plain records (users, guilds, channels, members, messages, emojis,
//! roles) that the connection-state cache stores.
//! This crate has no runtime or networking dependencies.

pub mod entities;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use entities::{
    Attachment, Channel, ChannelType, Emoji, Guild, Member, Message, MessageReference, Role, User,
};
pub use value_objects::{
    Intents, MemberCachePolicy, MemberCachePolicyParseError, Snowflake, SnowflakeParseError,
};
