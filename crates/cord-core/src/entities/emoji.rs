//! Custom guild emoji

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value_objects::Snowflake;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: Snowflake,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub animated: bool,
    #[serde(default = "yes")]
    pub available: bool,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    /// Filled in by the cache, the gateway omits it
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

impl Emoji {
    pub fn url(&self) -> String {
        let ext = if self.animated { "gif" } else { "png" };
        format!("https://cdn.discordapp.com/emojis/{}.{ext}", self.id)
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.as_deref().unwrap_or("_");
        if self.animated {
            write!(f, "<a:{name}:{}>", self.id)
        } else {
            write!(f, "<:{name}:{}>", self.id)
        }
    }
}
