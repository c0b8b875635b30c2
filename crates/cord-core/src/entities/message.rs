//! Message record

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::User;
use crate::value_objects::Snowflake;

/// Message record as delivered by MESSAGE_CREATE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tts: bool,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Embeds are kept as raw JSON
    #[serde(default)]
    pub embeds: Vec<Value>,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default)]
    pub webhook_id: Option<Snowflake>,
}

/// Reply / crosspost reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<Snowflake>,
    #[serde(default)]
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

impl Message {
    /// Create a new Message
    pub fn new(id: Snowflake, channel_id: Snowflake, author: User, content: impl Into<String>) -> Self {
        Self {
            id,
            channel_id,
            guild_id: None,
            author,
            content: content.into(),
            timestamp: id.created_at(),
            edited_timestamp: None,
            tts: false,
            mention_everyone: false,
            mentions: Vec::new(),
            pinned: false,
            attachments: Vec::new(),
            embeds: Vec::new(),
            kind: 0,
            message_reference: None,
            webhook_id: None,
        }
    }

    /// Check if message has been edited
    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_timestamp.is_some()
    }

    /// Check if message is a reply
    #[inline]
    pub fn is_reply(&self) -> bool {
        self.message_reference
            .as_ref()
            .is_some_and(|r| r.message_id.is_some())
    }

    /// Apply the partial payload of a MESSAGE_UPDATE.
    ///
    /// Only keys present in `data` are touched. On error `self` is left
    /// unchanged.
    pub fn apply_update(&mut self, data: &Map<String, Value>) -> Result<(), serde_json::Error> {
        fn set<T: DeserializeOwned>(
            data: &Map<String, Value>,
            key: &str,
            slot: &mut T,
        ) -> Result<(), serde_json::Error> {
            if let Some(value) = data.get(key) {
                *slot = T::deserialize(value)?;
            }
            Ok(())
        }

        let mut next = self.clone();
        set(data, "content", &mut next.content)?;
        set(data, "edited_timestamp", &mut next.edited_timestamp)?;
        set(data, "pinned", &mut next.pinned)?;
        set(data, "tts", &mut next.tts)?;
        set(data, "mention_everyone", &mut next.mention_everyone)?;
        set(data, "mentions", &mut next.mentions)?;
        set(data, "attachments", &mut next.attachments)?;
        set(data, "embeds", &mut next.embeds)?;
        set(data, "author", &mut next.author)?;
        *self = next;
        Ok(())
    }

    /// Get a truncated preview of the message (for logs)
    pub fn preview(&self, max_len: usize) -> &str {
        if self.content.len() <= max_len {
            &self.content
        } else {
            let mut end = max_len;
            while !self.content.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            &self.content[..end]
        }
    }
}

/// File attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }

    pub fn is_video(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("video/"))
    }
}
