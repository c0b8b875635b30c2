//! Role record

use serde::{Deserialize, Serialize};

use crate::value_objects::Snowflake;

fn default_permissions() -> String {
    "0".to_string()
}

/// Guild role
///
/// Permissions stay in their wire form (a decimal string).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_permissions")]
    pub permissions: String,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub mentionable: bool,
}

impl Role {
    pub fn new(id: Snowflake, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            color: 0,
            hoist: false,
            position: 0,
            permissions: default_permissions(),
            managed: false,
            mentionable: false,
        }
    }

    /// The @everyone role shares its id with the guild
    #[inline]
    pub fn is_default(&self, guild_id: Snowflake) -> bool {
        self.id == guild_id
    }

    /// Raw permission bits, 0 when the string is malformed
    pub fn permission_bits(&self) -> u64 {
        self.permissions.parse().unwrap_or(0)
    }

    /// Compare role positions for hierarchy (higher position = more authority)
    #[inline]
    pub fn is_higher_than(&self, other: &Role) -> bool {
        (self.position, self.id) > (other.position, other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_payload() {
        let role: Role = serde_json::from_str(
            r#"{"id":"41771983423143936","name":"WE DEM BOYZZ!!!!!!","color":3447003,
                "hoist":true,"position":1,"permissions":"66321471","managed":false,"mentionable":false}"#,
        )
        .unwrap();
        assert_eq!(role.permission_bits(), 66_321_471);
        assert!(role.hoist);
    }

    #[test]
    fn test_role_hierarchy() {
        let mut low = Role::new(Snowflake::new(1), "low");
        let mut high = Role::new(Snowflake::new(2), "high");
        low.position = 1;
        high.position = 5;
        assert!(high.is_higher_than(&low));
        assert!(!low.is_higher_than(&high));
    }

    #[test]
    fn test_everyone_role() {
        let role = Role::new(Snowflake::new(10), "@everyone");
        assert!(role.is_default(Snowflake::new(10)));
        assert!(!role.is_default(Snowflake::new(11)));
    }
}
