//! Channel record - guild text/voice/category channels, threads and DMs

use serde::{Deserialize, Serialize};

use crate::entities::User;
use crate::value_objects::Snowflake;

/// Channel type as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "u8", into = "u8")]
pub enum ChannelType {
    #[default]
    GuildText,
    Dm,
    GuildVoice,
    GroupDm,
    GuildCategory,
    GuildAnnouncement,
    AnnouncementThread,
    PublicThread,
    PrivateThread,
    GuildStageVoice,
    GuildDirectory,
    GuildForum,
    GuildMedia,
    /// A type this library does not know yet
    Unknown(u8),
}

impl ChannelType {
    /// Get the numeric value
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::GuildText => 0,
            Self::Dm => 1,
            Self::GuildVoice => 2,
            Self::GroupDm => 3,
            Self::GuildCategory => 4,
            Self::GuildAnnouncement => 5,
            Self::AnnouncementThread => 10,
            Self::PublicThread => 11,
            Self::PrivateThread => 12,
            Self::GuildStageVoice => 13,
            Self::GuildDirectory => 14,
            Self::GuildForum => 15,
            Self::GuildMedia => 16,
            Self::Unknown(value) => value,
        }
    }
}

impl From<u8> for ChannelType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::GuildText,
            1 => Self::Dm,
            2 => Self::GuildVoice,
            3 => Self::GroupDm,
            4 => Self::GuildCategory,
            5 => Self::GuildAnnouncement,
            10 => Self::AnnouncementThread,
            11 => Self::PublicThread,
            12 => Self::PrivateThread,
            13 => Self::GuildStageVoice,
            14 => Self::GuildDirectory,
            15 => Self::GuildForum,
            16 => Self::GuildMedia,
            other => Self::Unknown(other),
        }
    }
}

impl From<ChannelType> for u8 {
    fn from(ct: ChannelType) -> Self {
        ct.as_u8()
    }
}

/// Channel record
///
/// `guild_id` is `None` for private channels. Gateway payloads nested in
/// GUILD_CREATE omit it; the cache fills it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: ChannelType,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub last_message_id: Option<Snowflake>,
    #[serde(default)]
    pub recipients: Vec<User>,
}

impl Channel {
    pub fn new(id: Snowflake, kind: ChannelType) -> Self {
        Self {
            id,
            kind,
            guild_id: None,
            name: None,
            position: None,
            topic: None,
            parent_id: None,
            nsfw: false,
            last_message_id: None,
            recipients: Vec::new(),
        }
    }

    /// Create a guild text channel
    #[must_use]
    pub fn new_text(id: Snowflake, guild_id: Snowflake, name: impl Into<String>) -> Self {
        Self {
            guild_id: Some(guild_id),
            name: Some(name.into()),
            ..Self::new(id, ChannelType::GuildText)
        }
    }

    /// Check if this channel carries text messages
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(
            self.kind,
            ChannelType::GuildText
                | ChannelType::Dm
                | ChannelType::GroupDm
                | ChannelType::GuildAnnouncement
        ) || self.is_thread()
    }

    #[inline]
    #[must_use]
    pub fn is_thread(&self) -> bool {
        matches!(
            self.kind,
            ChannelType::AnnouncementThread | ChannelType::PublicThread | ChannelType::PrivateThread
        )
    }

    #[inline]
    #[must_use]
    pub fn is_category(&self) -> bool {
        matches!(self.kind, ChannelType::GuildCategory)
    }

    /// Direct or group DM
    #[inline]
    #[must_use]
    pub fn is_private(&self) -> bool {
        matches!(self.kind, ChannelType::Dm | ChannelType::GroupDm)
    }

    #[inline]
    #[must_use]
    pub fn is_guild_channel(&self) -> bool {
        self.guild_id.is_some()
    }

    /// Get display name (channel name or fallback for DMs)
    #[must_use]
    pub fn display_name(&self) -> String {
        match (&self.name, self.recipients.first()) {
            (Some(name), _) => name.clone(),
            (None, Some(recipient)) => format!("Direct Message with {}", recipient.display_name()),
            (None, None) => "Direct Message".to_string(),
        }
    }

    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}
