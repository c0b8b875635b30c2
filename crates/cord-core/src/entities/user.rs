//! User record

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

const CDN_BASE: &str = "https://cdn.discordapp.com";

fn default_discriminator() -> String {
    "0".to_string()
}

/// A Discord user as sent by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    /// "0" for accounts migrated to unique usernames
    #[serde(default = "default_discriminator")]
    pub discriminator: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub system: bool,
}

impl User {
    /// Create a new User with required fields
    pub fn new(id: Snowflake, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            discriminator: default_discriminator(),
            global_name: None,
            avatar: None,
            bot: false,
            system: false,
        }
    }

    /// `username#discriminator`, or the bare username for migrated accounts
    pub fn tag(&self) -> String {
        if self.is_migrated() {
            self.username.clone()
        } else {
            format!("{}#{}", self.username, self.discriminator)
        }
    }

    /// Global display name when set, otherwise the username
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    /// Get avatar URL or default avatar URL
    pub fn avatar_url(&self) -> String {
        match &self.avatar {
            Some(hash) => {
                let ext = if hash.starts_with("a_") { "gif" } else { "png" };
                format!("{CDN_BASE}/avatars/{}/{hash}.{ext}", self.id)
            }
            None => format!("{CDN_BASE}/embed/avatars/{}.png", self.default_avatar_index()),
        }
    }

    fn is_migrated(&self) -> bool {
        self.discriminator == "0"
    }

    fn default_avatar_index(&self) -> u64 {
        if self.is_migrated() {
            (self.id.get() >> 22) % 6
        } else {
            self.discriminator.parse::<u64>().unwrap_or(0) % 5
        }
    }

    /// Merge a fresher copy of this user in place.
    ///
    /// Returns the previous value when anything changed.
    pub fn merge(&mut self, fresh: &User) -> Option<User> {
        if self == fresh {
            return None;
        }
        let before = self.clone();
        self.username.clone_from(&fresh.username);
        self.discriminator.clone_from(&fresh.discriminator);
        self.global_name.clone_from(&fresh.global_name);
        self.avatar.clone_from(&fresh.avatar);
        self.bot = fresh.bot;
        self.system = fresh.system;
        Some(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_tag() {
        let mut user = User::new(Snowflake::new(1), "testuser");
        assert_eq!(user.tag(), "testuser");

        user.discriminator = "1234".to_string();
        assert_eq!(user.tag(), "testuser#1234");
    }

    #[test]
    fn test_avatar_url_with_avatar() {
        let mut user = User::new(Snowflake::new(123), "testuser");
        user.avatar = Some("abc123".to_string());
        assert_eq!(
            user.avatar_url(),
            "https://cdn.discordapp.com/avatars/123/abc123.png"
        );

        user.avatar = Some("a_abc123".to_string());
        assert!(user.avatar_url().ends_with(".gif"));
    }

    #[test]
    fn test_avatar_url_default() {
        let mut user = User::new(Snowflake::new(123), "testuser");
        user.discriminator = "0007".to_string();
        // 7 % 5 = 2
        assert_eq!(
            user.avatar_url(),
            "https://cdn.discordapp.com/embed/avatars/2.png"
        );
    }

    #[test]
    fn test_deserialize_minimal_payload() {
        let user: User =
            serde_json::from_str(r#"{"id":"80351110224678912","username":"nelly"}"#).unwrap();
        assert_eq!(user.id, Snowflake::new(80_351_110_224_678_912));
        assert_eq!(user.discriminator, "0");
        assert!(!user.bot);
        assert_eq!(user.display_name(), "nelly");
    }

    #[test]
    fn test_merge_reports_changes() {
        let mut user = User::new(Snowflake::new(1), "old");
        assert!(user.merge(&user.clone()).is_none());

        let mut fresh = user.clone();
        fresh.username = "new".to_string();
        let before = user.merge(&fresh).unwrap();
        assert_eq!(before.username, "old");
        assert_eq!(user.username, "new");
    }
}
