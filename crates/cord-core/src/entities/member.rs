//! Member record - a user's membership in a guild

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

/// Guild member keyed by `(guild_id, user_id)`.
///
/// The user itself lives once in the user cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
    pub avatar: Option<String>,
    pub pending: bool,
    pub deaf: bool,
    pub mute: bool,
}

impl Member {
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            guild_id,
            user_id,
            nick: None,
            roles: Vec::new(),
            joined_at: None,
            avatar: None,
            pending: false,
            deaf: false,
            mute: false,
        }
    }

    /// Get display name (nickname if set, otherwise fallback)
    pub fn display_name<'a>(&'a self, username: &'a str) -> &'a str {
        self.nick.as_deref().unwrap_or(username)
    }

    #[inline]
    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.roles.contains(&role_id)
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let mut member = Member::new(Snowflake::new(1), Snowflake::new(2));
        assert_eq!(member.display_name("user"), "user");

        member.nick = Some("nick".to_string());
        assert_eq!(member.display_name("user"), "nick");
    }

    #[test]
    fn test_has_role() {
        let mut member = Member::new(Snowflake::new(1), Snowflake::new(2));
        member.roles.push(Snowflake::new(50));
        assert!(member.has_role(Snowflake::new(50)));
        assert!(!member.has_role(Snowflake::new(51)));
    }
}
