//! Deduplicated user store with reference counts

use std::collections::HashMap;

use cord_core::{Snowflake, User};

#[derive(Debug, Clone)]
struct Entry {
    user: User,
    /// Cached memberships referencing this user
    memberships: usize,
    /// Cached messages authored by this user
    messages: usize,
}

impl Entry {
    fn new(user: &User) -> Self {
        Self {
            user: user.clone(),
            memberships: 0,
            messages: 0,
        }
    }

    fn is_referenced(&self) -> bool {
        self.memberships > 0 || self.messages > 0
    }
}

/// One record per user id, shared by every member and message that
/// references it.
///
/// A user lives only as long as a cached membership or message points at
/// it. The kept user (the session's own account) is never evicted.
#[derive(Debug, Default)]
pub(crate) struct UserStore {
    users: HashMap<Snowflake, Entry>,
    kept: Option<Snowflake>,
}

impl UserStore {
    /// Merge into a stored user; returns the previous value when it changed.
    ///
    /// Unreferenced users are not stored.
    pub(crate) fn upsert(&mut self, user: &User) -> Option<User> {
        self.users.get_mut(&user.id)?.user.merge(user)
    }

    /// Store `user` and pin it against eviction
    pub(crate) fn keep(&mut self, user: &User) {
        if let Some(previous) = self.kept.replace(user.id) {
            if previous != user.id {
                self.evict_if_unreferenced(previous);
            }
        }
        self.entry(user);
    }

    pub(crate) fn add_membership(&mut self, user: &User) {
        self.entry(user).memberships += 1;
    }

    /// Drop one membership; the user is evicted with its last reference
    pub(crate) fn release_membership(&mut self, user_id: Snowflake) {
        if let Some(entry) = self.users.get_mut(&user_id) {
            entry.memberships = entry.memberships.saturating_sub(1);
            self.evict_if_unreferenced(user_id);
        }
    }

    pub(crate) fn add_message(&mut self, author: &User) {
        self.entry(author).messages += 1;
    }

    /// Drop one message reference; the user is evicted with its last reference
    pub(crate) fn release_message(&mut self, author_id: Snowflake) {
        if let Some(entry) = self.users.get_mut(&author_id) {
            entry.messages = entry.messages.saturating_sub(1);
            self.evict_if_unreferenced(author_id);
        }
    }

    pub(crate) fn get(&self, id: Snowflake) -> Option<&User> {
        self.users.get(&id).map(|e| &e.user)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &User> {
        self.users.values().map(|e| &e.user)
    }

    fn entry(&mut self, user: &User) -> &mut Entry {
        let entry = self.users.entry(user.id).or_insert_with(|| Entry::new(user));
        entry.user.merge(user);
        entry
    }

    fn evict_if_unreferenced(&mut self, user_id: Snowflake) {
        if self.kept == Some(user_id) {
            return;
        }
        if self.users.get(&user_id).is_some_and(|e| !e.is_referenced()) {
            self.users.remove(&user_id);
            tracing::trace!(user_id = %user_id, "Evicted unreferenced user");
        }
    }
}
