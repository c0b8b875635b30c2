//! Connection-state cache
//!
//! Written by the event parsers on the gateway task and read concurrently
//! by application callbacks. Updates whose parent is unknown (a member of an
//! uncached guild, a channel of an uncached guild) are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use cord_core::{Channel, Emoji, Guild, Member, MemberCachePolicy, Message, Snowflake, User};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::message_ring::MessageRing;
use crate::users::UserStore;

/// Outcome of an insert-or-replace
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert<T> {
    Inserted,
    /// Replaced; carries the previous value
    Updated(T),
    /// The parent is not cached, or the policy forbids storing it
    Ignored,
}

impl<T> Upsert<T> {
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Ignored)
    }

    pub fn previous(self) -> Option<T> {
        match self {
            Self::Updated(previous) => Some(previous),
            _ => None,
        }
    }
}

/// A cached message before and after an edit
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEdit {
    pub before: Message,
    pub after: Message,
}

/// A guild with its children as delivered by GUILD_CREATE
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub guild: Guild,
    pub channels: Vec<Channel>,
    pub members: Vec<(User, Member)>,
    pub emojis: Vec<Emoji>,
}

#[derive(Debug)]
struct CacheInner {
    current_user: Option<User>,
    guilds: HashMap<Snowflake, Guild>,
    unavailable_guilds: HashSet<Snowflake>,
    channels: HashMap<Snowflake, Channel>,
    guild_channels: HashMap<Snowflake, BTreeSet<Snowflake>>,
    members: BTreeMap<(Snowflake, Snowflake), Member>,
    users: UserStore,
    emojis: HashMap<Snowflake, Emoji>,
    guild_emojis: HashMap<Snowflake, Vec<Snowflake>>,
    messages: MessageRing,
}

impl CacheInner {
    fn new(max_messages: Option<usize>) -> Self {
        Self {
            current_user: None,
            guilds: HashMap::new(),
            unavailable_guilds: HashSet::new(),
            channels: HashMap::new(),
            guild_channels: HashMap::new(),
            members: BTreeMap::new(),
            users: UserStore::default(),
            emojis: HashMap::new(),
            guild_emojis: HashMap::new(),
            messages: MessageRing::new(max_messages),
        }
    }

    fn upsert_guild(&mut self, guild: Guild) -> Upsert<Guild> {
        self.unavailable_guilds.remove(&guild.id);
        match self.guilds.insert(guild.id, guild) {
            Some(previous) => Upsert::Updated(previous),
            None => Upsert::Inserted,
        }
    }

    fn upsert_channel(&mut self, channel: Channel) -> Upsert<Channel> {
        if let Some(guild_id) = channel.guild_id {
            if !self.guilds.contains_key(&guild_id) {
                return Upsert::Ignored;
            }
            self.guild_channels
                .entry(guild_id)
                .or_default()
                .insert(channel.id);
        }
        match self.channels.insert(channel.id, channel) {
            Some(previous) => Upsert::Updated(previous),
            None => Upsert::Inserted,
        }
    }

    fn remove_channel(&mut self, channel_id: Snowflake) -> Option<Channel> {
        let channel = self.channels.remove(&channel_id)?;
        if let Some(guild_id) = channel.guild_id {
            if let Some(ids) = self.guild_channels.get_mut(&guild_id) {
                ids.remove(&channel_id);
            }
        }
        Some(channel)
    }

    fn upsert_member(&mut self, user: &User, member: Member) -> Upsert<Member> {
        if !self.guilds.contains_key(&member.guild_id) {
            return Upsert::Ignored;
        }
        let key = (member.guild_id, member.user_id);
        match self.members.insert(key, member) {
            Some(previous) => {
                self.users.upsert(user);
                Upsert::Updated(previous)
            }
            None => {
                self.users.add_membership(user);
                Upsert::Inserted
            }
        }
    }

    fn remove_member(&mut self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        let member = self.members.remove(&(guild_id, user_id))?;
        self.users.release_membership(user_id);
        Some(member)
    }

    fn set_guild_emojis(&mut self, guild_id: Snowflake, emojis: Vec<Emoji>) -> Vec<Emoji> {
        let previous: Vec<Emoji> = self
            .guild_emojis
            .remove(&guild_id)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.emojis.remove(&id))
            .collect();

        let ids = emojis.iter().map(|e| e.id).collect();
        for mut emoji in emojis {
            emoji.guild_id = Some(guild_id);
            self.emojis.insert(emoji.id, emoji);
        }
        self.guild_emojis.insert(guild_id, ids);
        previous
    }

    fn remove_guild(&mut self, guild_id: Snowflake) -> Option<Guild> {
        self.unavailable_guilds.remove(&guild_id);
        let guild = self.guilds.remove(&guild_id)?;

        if let Some(ids) = self.guild_channels.remove(&guild_id) {
            for id in ids {
                self.channels.remove(&id);
            }
        }

        let user_ids: Vec<Snowflake> = self
            .members
            .range((guild_id, Snowflake::new(0))..=(guild_id, Snowflake::new(u64::MAX)))
            .map(|(&(_, user_id), _)| user_id)
            .collect();
        for user_id in user_ids {
            self.remove_member(guild_id, user_id);
        }

        self.set_guild_emojis(guild_id, Vec::new());
        self.guild_emojis.remove(&guild_id);
        Some(guild)
    }

    fn guild_member_range(&self, guild_id: Snowflake) -> impl Iterator<Item = &Member> {
        self.members
            .range((guild_id, Snowflake::new(0))..=(guild_id, Snowflake::new(u64::MAX)))
            .map(|(_, member)| member)
    }
}

/// The client's view of gateway state
#[derive(Debug)]
pub struct Cache {
    inner: Mutex<CacheInner>,
    max_messages: Option<usize>,
    member_policy: MemberCachePolicy,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new(Some(1000), MemberCachePolicy::default())
    }
}

impl Cache {
    /// `max_messages` of `None` or `0` disables the message cache
    #[must_use]
    pub fn new(max_messages: Option<usize>, member_policy: MemberCachePolicy) -> Self {
        Self {
            inner: Mutex::new(CacheInner::new(max_messages)),
            max_messages,
            member_policy,
        }
    }

    pub fn member_policy(&self) -> MemberCachePolicy {
        self.member_policy
    }

    pub fn max_messages(&self) -> Option<usize> {
        self.max_messages
    }

    /// Drop everything; used when a fresh session starts
    pub fn clear(&self) {
        *self.inner.lock() = CacheInner::new(self.max_messages);
        tracing::debug!("Cache cleared");
    }

    // === Current user ===

    pub fn set_current_user(&self, user: User) {
        let mut inner = self.inner.lock();
        inner.users.keep(&user);
        inner.current_user = Some(user);
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.lock().current_user.clone()
    }

    // === Guilds ===

    /// Insert or replace a guild; it is no longer unavailable afterwards
    pub fn upsert_guild(&self, guild: Guild) -> Upsert<Guild> {
        self.inner.lock().upsert_guild(guild)
    }

    /// Store a guild together with its channels, members and emojis
    pub fn upsert_guild_snapshot(&self, snapshot: GuildSnapshot) -> Upsert<Guild> {
        let GuildSnapshot {
            guild,
            channels,
            members,
            emojis,
        } = snapshot;
        let guild_id = guild.id;

        let mut inner = self.inner.lock();
        let result = inner.upsert_guild(guild);
        for mut channel in channels {
            channel.guild_id = Some(guild_id);
            inner.upsert_channel(channel);
        }
        if self.member_policy.stores_members() {
            for (user, mut member) in members {
                member.guild_id = guild_id;
                inner.upsert_member(&user, member);
            }
        }
        inner.set_guild_emojis(guild_id, emojis);
        result
    }

    /// Apply GUILD_UPDATE to a cached guild.
    ///
    /// Returns `(before, after)`; `None` when the guild is not cached.
    pub fn update_guild(&self, update: Guild) -> Option<(Guild, Guild)> {
        let mut inner = self.inner.lock();
        let guild = inner.guilds.get_mut(&update.id)?;
        let before = guild.clone();
        guild.apply_update(update);
        Some((before, guild.clone()))
    }

    /// Remove a guild with its channels, members and emojis
    pub fn remove_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        let removed = self.inner.lock().remove_guild(guild_id);
        if removed.is_some() {
            tracing::debug!(guild_id = %guild_id, "Guild removed from cache");
        }
        removed
    }

    /// Record a guild that is known but not yet streamed (or in an outage)
    pub fn mark_unavailable(&self, guild_id: Snowflake) {
        let mut inner = self.inner.lock();
        if let Some(guild) = inner.guilds.get_mut(&guild_id) {
            guild.unavailable = true;
        }
        inner.unavailable_guilds.insert(guild_id);
    }

    pub fn is_unavailable(&self, guild_id: Snowflake) -> bool {
        self.inner.lock().unavailable_guilds.contains(&guild_id)
    }

    pub fn unavailable_guilds(&self) -> Vec<Snowflake> {
        let mut ids: Vec<Snowflake> = self.inner.lock().unavailable_guilds.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_guild(&self, guild_id: Snowflake) -> Option<Guild> {
        self.inner.lock().guilds.get(&guild_id).cloned()
    }

    /// All cached guilds ordered by id
    pub fn guilds(&self) -> Vec<Guild> {
        let mut guilds: Vec<Guild> = self.inner.lock().guilds.values().cloned().collect();
        guilds.sort_unstable_by_key(|g| g.id);
        guilds
    }

    // === Channels ===

    /// Insert or replace a channel; guild channels need their guild cached
    pub fn upsert_channel(&self, channel: Channel) -> Upsert<Channel> {
        self.inner.lock().upsert_channel(channel)
    }

    pub fn remove_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.inner.lock().remove_channel(channel_id)
    }

    pub fn get_channel(&self, channel_id: Snowflake) -> Option<Channel> {
        self.inner.lock().channels.get(&channel_id).cloned()
    }

    /// Channels of a guild ordered by position, then id
    pub fn channels_for_guild(&self, guild_id: Snowflake) -> Vec<Channel> {
        let inner = self.inner.lock();
        let mut channels: Vec<Channel> = inner
            .guild_channels
            .get(&guild_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.channels.get(id).cloned())
            .collect();
        channels.sort_by_key(|c| (c.position.unwrap_or(i32::MAX), c.id));
        channels
    }

    /// DM and group DM channels
    pub fn private_channels(&self) -> Vec<Channel> {
        let inner = self.inner.lock();
        let mut channels: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| c.guild_id.is_none())
            .cloned()
            .collect();
        channels.sort_unstable_by_key(|c| c.id);
        channels
    }

    // === Members ===

    /// Insert or replace a member, merging its user.
    ///
    /// Ignored under [`MemberCachePolicy::None`] or when the guild is unknown.
    pub fn upsert_member(&self, user: &User, member: Member) -> Upsert<Member> {
        if !self.member_policy.stores_members() {
            return Upsert::Ignored;
        }
        self.inner.lock().upsert_member(user, member)
    }

    pub fn remove_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.inner.lock().remove_member(guild_id, user_id)
    }

    pub fn get_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.inner.lock().members.get(&(guild_id, user_id)).cloned()
    }

    /// Members of a guild ordered by user id
    pub fn members_for_guild(&self, guild_id: Snowflake) -> Vec<Member> {
        self.inner
            .lock()
            .guild_member_range(guild_id)
            .cloned()
            .collect()
    }

    /// Apply a join (`+1`) or leave (`-1`) to a cached guild's member count
    pub fn adjust_member_count(&self, guild_id: Snowflake, delta: i64) {
        if let Some(guild) = self.inner.lock().guilds.get_mut(&guild_id) {
            guild.member_count = guild.member_count.saturating_add_signed(delta);
        }
    }

    /// Cached members of a guild
    pub fn member_count(&self, guild_id: Snowflake) -> usize {
        self.inner.lock().guild_member_range(guild_id).count()
    }

    // === Users ===

    /// Merge into a cached user; returns the previous value when it changed.
    ///
    /// Users with no cached membership or message are not stored.
    pub fn upsert_user(&self, user: &User) -> Option<User> {
        let mut inner = self.inner.lock();
        let previous = inner.users.upsert(user);
        if let Some(current) = inner.current_user.as_mut() {
            if current.id == user.id {
                current.merge(user);
            }
        }
        previous
    }

    pub fn get_user(&self, user_id: Snowflake) -> Option<User> {
        self.inner.lock().users.get(user_id).cloned()
    }

    /// All cached users ordered by id
    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.inner.lock().users.values().cloned().collect();
        users.sort_unstable_by_key(|u| u.id);
        users
    }

    // === Emojis ===

    /// Replace a guild's emoji set; returns the previous set.
    ///
    /// `None` when the guild is not cached.
    pub fn set_guild_emojis(&self, guild_id: Snowflake, emojis: Vec<Emoji>) -> Option<Vec<Emoji>> {
        let mut inner = self.inner.lock();
        if !inner.guilds.contains_key(&guild_id) {
            return None;
        }
        Some(inner.set_guild_emojis(guild_id, emojis))
    }

    pub fn get_emoji(&self, emoji_id: Snowflake) -> Option<Emoji> {
        self.inner.lock().emojis.get(&emoji_id).cloned()
    }

    pub fn guild_emojis(&self, guild_id: Snowflake) -> Vec<Emoji> {
        let inner = self.inner.lock();
        inner
            .guild_emojis
            .get(&guild_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.emojis.get(id).cloned())
            .collect()
    }

    // === Messages ===

    /// Store a message as the most recent.
    ///
    /// Its author is cached for as long as the message is.
    pub fn push_message(&self, message: Message) {
        let mut inner = self.inner.lock();
        if let Some(channel) = inner.channels.get_mut(&message.channel_id) {
            channel.last_message_id = Some(message.id);
        }
        if !inner.messages.is_enabled() {
            inner.users.upsert(&message.author);
            return;
        }
        inner.users.add_message(&message.author);
        if let Some(evicted) = inner.messages.push(message) {
            inner.users.release_message(evicted.author.id);
        }
    }

    /// Apply a partial MESSAGE_UPDATE to a cached message.
    ///
    /// A rejected update leaves the cached message unchanged.
    pub fn update_message(
        &self,
        message_id: Snowflake,
        data: &Map<String, Value>,
    ) -> Option<Result<MessageEdit, serde_json::Error>> {
        let mut inner = self.inner.lock();
        let CacheInner { messages, users, .. } = &mut *inner;
        let message = messages.get_mut(message_id)?;

        let before = message.clone();
        let mut after = before.clone();
        if let Err(e) = after.apply_update(data) {
            return Some(Err(e));
        }
        if after.author.id != before.author.id {
            users.add_message(&after.author);
            users.release_message(before.author.id);
        } else {
            users.upsert(&after.author);
        }
        *message = after.clone();
        Some(Ok(MessageEdit { before, after }))
    }

    pub fn remove_message(&self, message_id: Snowflake) -> Option<Message> {
        let mut inner = self.inner.lock();
        let removed = inner.messages.remove(message_id)?;
        inner.users.release_message(removed.author.id);
        Some(removed)
    }

    /// Remove several messages, returning the ones that were cached
    pub fn remove_messages(&self, message_ids: &[Snowflake]) -> Vec<Message> {
        let ids: HashSet<Snowflake> = message_ids.iter().copied().collect();
        let mut inner = self.inner.lock();
        let removed = inner.messages.remove_where(|m| ids.contains(&m.id));
        for message in &removed {
            inner.users.release_message(message.author.id);
        }
        removed
    }

    pub fn get_message(&self, message_id: Snowflake) -> Option<Message> {
        self.inner.lock().messages.get(message_id).cloned()
    }

    /// Cached messages, oldest first
    pub fn cached_messages(&self) -> Vec<Message> {
        self.inner.lock().messages.iter().cloned().collect()
    }
}
