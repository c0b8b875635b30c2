//! Value objects - immutable types shared by every layer

mod intents;
mod member_cache;
mod snowflake;

pub use intents::Intents;
pub use member_cache::{MemberCachePolicy, MemberCachePolicyParseError};
pub use snowflake::{Snowflake, SnowflakeParseError};
