//! Guild record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Role;
use crate::value_objects::Snowflake;

/// Guild (server) record
///
/// Channels, members and emojis are cached separately and keyed by
/// guild id, so this only holds the guild's own fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Only sent with GUILD_CREATE
    #[serde(default)]
    pub member_count: u64,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

impl Guild {
    pub fn new(id: Snowflake, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            icon: None,
            description: None,
            owner_id: None,
            member_count: 0,
            large: false,
            unavailable: false,
            roles: Vec::new(),
            features: Vec::new(),
            joined_at: None,
        }
    }

    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == Some(user_id)
    }

    /// Get the guild icon URL if set
    pub fn icon_url(&self) -> Option<String> {
        self.icon
            .as_ref()
            .map(|hash| format!("https://cdn.discordapp.com/icons/{}/{hash}.png", self.id))
    }

    pub fn default_role(&self) -> Option<&Role> {
        self.roles.iter().find(|role| role.is_default(self.id))
    }

    pub fn get_role(&self, role_id: Snowflake) -> Option<&Role> {
        self.roles.iter().find(|role| role.id == role_id)
    }

    /// Apply a GUILD_UPDATE payload.
    ///
    /// Fields that only arrive with GUILD_CREATE are kept.
    pub fn apply_update(&mut self, update: Guild) {
        let member_count = self.member_count;
        let large = self.large;
        let joined_at = self.joined_at;
        *self = Guild {
            member_count: if update.member_count > 0 {
                update.member_count
            } else {
                member_count
            },
            large: update.large || large,
            joined_at: update.joined_at.or(joined_at),
            unavailable: false,
            ..update
        };
    }
}
