//! # cord-cache
//!
//! In-memory store of what the gateway has told the client: guilds,
//! channels, members, users, emojis and recent messages.
//!
//! ## Features
//!
//! - **Single lock**: one `parking_lot::Mutex` guards all state, so every
//!   operation sees a consistent snapshot
//! - **Owned reads**: getters return clones; no guard escapes the cache
//! - **Bounded messages**: a recency-ordered ring, disabled with `None`
//! - **User refcounts**: a user leaves the cache with its last membership
//!   or cached message
//!
//! ## Example
//!
//! ```
//! use cord_cache::Cache;
//! use cord_core::{Guild, MemberCachePolicy, Snowflake};
//!
//! let cache = Cache::new(Some(1000), MemberCachePolicy::All);
//! cache.upsert_guild(Guild::new(Snowflake::new(1), "home"));
//! assert_eq!(cache.guilds().len(), 1);
//! ```

mod cache;
mod message_ring;
mod users;

pub use cache::{Cache, GuildSnapshot, MessageEdit, Upsert};
pub use message_ring::MessageRing;
