//! Member cache policy

use std::fmt;
use std::str::FromStr;

use crate::value_objects::Intents;

/// Which guild members the cache keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemberCachePolicy {
    /// Members seen in events plus every member chunked at startup
    #[default]
    All,
    /// Only members seen in events
    Seen,
    /// No members at all
    None,
}

impl MemberCachePolicy {
    #[inline]
    pub fn stores_members(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether guilds are chunked during the ready delay.
    ///
    /// Chunking needs the privileged `GUILD_MEMBERS` intent.
    pub fn chunks_at_startup(&self, intents: Intents) -> bool {
        matches!(self, Self::All) && intents.contains(Intents::GUILD_MEMBERS)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Seen => "seen",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MemberCachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown member cache policy: {0}")]
pub struct MemberCachePolicyParseError(pub String);

impl FromStr for MemberCachePolicy {
    type Err = MemberCachePolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "seen" => Ok(Self::Seen),
            "none" => Ok(Self::None),
            other => Err(MemberCachePolicyParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_policy() {
        assert_eq!("all".parse::<MemberCachePolicy>().unwrap(), MemberCachePolicy::All);
        assert_eq!("Seen".parse::<MemberCachePolicy>().unwrap(), MemberCachePolicy::Seen);
        assert_eq!(" none ".parse::<MemberCachePolicy>().unwrap(), MemberCachePolicy::None);
        assert!("sometimes".parse::<MemberCachePolicy>().is_err());
    }

    #[test]
    fn test_chunking_requires_members_intent() {
        let policy = MemberCachePolicy::All;
        assert!(!policy.chunks_at_startup(Intents::default()));
        assert!(policy.chunks_at_startup(Intents::GUILDS | Intents::GUILD_MEMBERS));
        assert!(!MemberCachePolicy::Seen.chunks_at_startup(Intents::all()));
    }

    #[test]
    fn test_stores_members() {
        assert!(MemberCachePolicy::All.stores_members());
        assert!(MemberCachePolicy::Seen.stores_members());
        assert!(!MemberCachePolicy::None.stores_members());
    }
}
