//! Dispatch event parsers
//!
//! One parser per gateway event: decode the payload, apply it to the cache,
//! then emit the client-level [`Event`]s that describe the change.

use std::collections::HashSet;

use cord_cache::{GuildSnapshot, MessageEdit, Upsert};
use cord_core::{Channel, Guild, Message, User};
use cord_gateway::events::{
    GatewayEventType, GuildCreateEvent, GuildEmojisUpdateEvent, GuildMemberRemoveEvent,
    GuildMembersChunkEvent, MemberPayload, MessageDeleteBulkEvent, MessageDeleteEvent,
    MessageUpdateIds, PresenceUpdateEvent, ReactionEvent, ReadyEvent, TypingStartEvent,
    UnavailableGuild,
};
use serde_json::Value;

use super::ConnectionState;
use crate::events::Event;

type ParseResult = Result<(), serde_json::Error>;

impl ConnectionState {
    /// Apply one dispatch frame. Malformed payloads are logged and dropped.
    pub(super) fn parse(&self, event_type: &str, data: Value) {
        let Some(kind) = GatewayEventType::from_str(event_type) else {
            tracing::debug!(event = %event_type, "Unhandled dispatch event");
            return;
        };

        if let Err(e) = self.parse_event(kind, data) {
            tracing::warn!(event = %event_type, error = %e, "Dropping malformed dispatch payload");
        }
    }

    fn parse_event(&self, kind: GatewayEventType, data: Value) -> ParseResult {
        match kind {
            GatewayEventType::Ready => self.parse_ready(data),
            GatewayEventType::Resumed => {
                tracing::info!("Session resumed");
                self.emit(Event::Resumed);
                Ok(())
            }
            GatewayEventType::GuildCreate => self.parse_guild_create(data),
            GatewayEventType::GuildUpdate => self.parse_guild_update(data),
            GatewayEventType::GuildDelete => self.parse_guild_delete(data),
            GatewayEventType::GuildEmojisUpdate => self.parse_guild_emojis_update(data),
            GatewayEventType::GuildMembersChunk => self.parse_guild_members_chunk(data),
            GatewayEventType::ChannelCreate => self.parse_channel_create(data),
            GatewayEventType::ChannelUpdate => self.parse_channel_update(data),
            GatewayEventType::ChannelDelete => self.parse_channel_delete(data),
            GatewayEventType::MessageCreate => self.parse_message_create(data),
            GatewayEventType::MessageUpdate => self.parse_message_update(data),
            GatewayEventType::MessageDelete => self.parse_message_delete(data),
            GatewayEventType::MessageDeleteBulk => self.parse_message_delete_bulk(data),
            GatewayEventType::MessageReactionAdd => {
                self.emit(Event::RawReactionAdd(serde_json::from_value::<ReactionEvent>(data)?));
                Ok(())
            }
            GatewayEventType::MessageReactionRemove => {
                self.emit(Event::RawReactionRemove(serde_json::from_value::<ReactionEvent>(data)?));
                Ok(())
            }
            GatewayEventType::GuildMemberAdd => self.parse_member_add(data),
            GatewayEventType::GuildMemberUpdate => self.parse_member_update(data),
            GatewayEventType::GuildMemberRemove => self.parse_member_remove(data),
            GatewayEventType::PresenceUpdate => {
                self.emit(Event::PresenceUpdate(serde_json::from_value::<PresenceUpdateEvent>(data)?));
                Ok(())
            }
            GatewayEventType::TypingStart => self.parse_typing_start(data),
            GatewayEventType::UserUpdate => self.parse_user_update(data),
            GatewayEventType::InteractionCreate => {
                self.emit(Event::Interaction(data));
                Ok(())
            }
        }
    }

    // === Connection ===

    fn parse_ready(&self, data: Value) -> ParseResult {
        let ready: ReadyEvent = serde_json::from_value(data)?;
        let cache = self.cache();

        tracing::info!(
            user = %ready.user.tag(),
            session_id = %ready.session_id,
            guilds = ready.guilds.len(),
            "Received READY"
        );

        cache.clear();
        cache.set_current_user(ready.user);
        let guilds: HashSet<_> = ready.guilds.iter().map(|g| g.id).collect();
        for &guild_id in &guilds {
            cache.mark_unavailable(guild_id);
        }

        self.begin_startup(guilds);
        Ok(())
    }

    // === Guilds ===

    fn parse_guild_create(&self, data: Value) -> ParseResult {
        let event: GuildCreateEvent = serde_json::from_value(data)?;
        let guild_id = event.guild.id;
        let cache = self.cache();

        if event.guild.unavailable {
            cache.mark_unavailable(guild_id);
            return Ok(());
        }

        let was_unavailable = cache.is_unavailable(guild_id);
        let channels: Vec<Channel> = event.channels.into_iter().chain(event.threads).collect();
        let members = event
            .members
            .into_iter()
            .filter_map(|m| m.into_parts(Some(guild_id)))
            .collect();
        cache.upsert_guild_snapshot(GuildSnapshot {
            guild: event.guild,
            channels,
            members,
            emojis: event.emojis,
        });

        if was_unavailable && self.forward_startup_guild(guild_id) {
            return Ok(());
        }
        let Some(guild) = cache.get_guild(guild_id) else {
            return Ok(());
        };
        if was_unavailable {
            self.emit(Event::GuildAvailable(guild));
        } else {
            self.emit(Event::GuildJoin(guild));
        }
        Ok(())
    }

    fn parse_guild_update(&self, data: Value) -> ParseResult {
        let update: Guild = serde_json::from_value(data)?;
        match self.cache().update_guild(update) {
            Some((before, after)) => self.emit(Event::GuildUpdate { before, after }),
            None => tracing::debug!("GUILD_UPDATE for an uncached guild"),
        }
        Ok(())
    }

    fn parse_guild_delete(&self, data: Value) -> ParseResult {
        let event: UnavailableGuild = serde_json::from_value(data)?;
        let cache = self.cache();

        if event.unavailable {
            cache.mark_unavailable(event.id);
            if let Some(guild) = cache.get_guild(event.id) {
                tracing::info!(guild_id = %event.id, "Guild became unavailable");
                self.emit(Event::GuildUnavailable(guild));
            }
        } else if let Some(guild) = cache.remove_guild(event.id) {
            self.emit(Event::GuildRemove(guild));
        }
        Ok(())
    }

    fn parse_guild_emojis_update(&self, data: Value) -> ParseResult {
        let event: GuildEmojisUpdateEvent = serde_json::from_value(data)?;
        let cache = self.cache();

        if let Some(before) = cache.set_guild_emojis(event.guild_id, event.emojis) {
            self.emit(Event::GuildEmojisUpdate {
                guild_id: event.guild_id,
                before,
                after: cache.guild_emojis(event.guild_id),
            });
        }
        Ok(())
    }

    fn parse_guild_members_chunk(&self, data: Value) -> ParseResult {
        let chunk: GuildMembersChunkEvent = serde_json::from_value(data)?;
        let cache = self.cache();
        let last = chunk.is_last();

        tracing::debug!(
            guild_id = %chunk.guild_id,
            chunk = chunk.chunk_index + 1,
            of = chunk.chunk_count,
            members = chunk.members.len(),
            "Received member chunk"
        );

        let mut members = Vec::with_capacity(chunk.members.len());
        for payload in chunk.members {
            if let Some((user, member)) = payload.into_parts(Some(chunk.guild_id)) {
                cache.upsert_member(&user, member.clone());
                members.push(member);
            }
        }

        if let Some(nonce) = chunk.nonce.as_deref() {
            self.complete_chunk(nonce, chunk.guild_id, members, last);
        }
        Ok(())
    }

    // === Channels ===

    fn parse_channel_create(&self, data: Value) -> ParseResult {
        let channel: Channel = serde_json::from_value(data)?;
        if self.cache().upsert_channel(channel.clone()).is_stored() {
            self.emit(Event::ChannelCreate(channel));
        }
        Ok(())
    }

    fn parse_channel_update(&self, data: Value) -> ParseResult {
        let channel: Channel = serde_json::from_value(data)?;
        let cache = self.cache();

        if cache.get_channel(channel.id).is_none() {
            tracing::debug!(channel_id = %channel.id, "CHANNEL_UPDATE for an uncached channel");
            return Ok(());
        }
        if let Upsert::Updated(before) = cache.upsert_channel(channel.clone()) {
            self.emit(Event::ChannelUpdate {
                before,
                after: channel,
            });
        }
        Ok(())
    }

    fn parse_channel_delete(&self, data: Value) -> ParseResult {
        let channel: Channel = serde_json::from_value(data)?;
        if let Some(channel) = self.cache().remove_channel(channel.id) {
            self.emit(Event::ChannelDelete(channel));
        }
        Ok(())
    }

    // === Members and users ===

    fn parse_member_add(&self, data: Value) -> ParseResult {
        let payload: MemberPayload = serde_json::from_value(data)?;
        let Some((user, member)) = payload.into_parts(None) else {
            tracing::debug!("GUILD_MEMBER_ADD without user or guild");
            return Ok(());
        };
        let cache = self.cache();

        if cache.get_guild(member.guild_id).is_none() {
            tracing::debug!(guild_id = %member.guild_id, "GUILD_MEMBER_ADD for an uncached guild");
            return Ok(());
        }
        cache.upsert_member(&user, member.clone());
        cache.adjust_member_count(member.guild_id, 1);
        self.emit(Event::MemberJoin { user, member });
        Ok(())
    }

    fn parse_member_update(&self, data: Value) -> ParseResult {
        let payload: MemberPayload = serde_json::from_value(data)?;
        let Some((user, member)) = payload.into_parts(None) else {
            tracing::debug!("GUILD_MEMBER_UPDATE without user or guild");
            return Ok(());
        };
        let cache = self.cache();

        if let Some(before) = cache.upsert_user(&user) {
            let after = cache.get_user(user.id).unwrap_or_else(|| user.clone());
            self.emit(Event::UserUpdate { before, after });
        }
        if let Upsert::Updated(before) = cache.upsert_member(&user, member.clone()) {
            if before != member {
                self.emit(Event::MemberUpdate {
                    before,
                    after: member,
                });
            }
        }
        Ok(())
    }

    fn parse_member_remove(&self, data: Value) -> ParseResult {
        let event: GuildMemberRemoveEvent = serde_json::from_value(data)?;
        let cache = self.cache();

        let member = cache.remove_member(event.guild_id, event.user.id);
        cache.adjust_member_count(event.guild_id, -1);
        self.emit(Event::MemberRemove {
            guild_id: event.guild_id,
            user: event.user,
            member,
        });
        Ok(())
    }

    fn parse_user_update(&self, data: Value) -> ParseResult {
        let user: User = serde_json::from_value(data)?;
        let cache = self.cache();

        if let Some(before) = cache.upsert_user(&user) {
            let after = cache.current_user().filter(|u| u.id == user.id).unwrap_or(user);
            self.emit(Event::UserUpdate { before, after });
        }
        Ok(())
    }

    fn parse_typing_start(&self, data: Value) -> ParseResult {
        let event: TypingStartEvent = serde_json::from_value(data)?;
        if let Some(payload) = event.member.clone() {
            if let Some((user, member)) = payload.into_parts(event.guild_id) {
                self.cache().upsert_member(&user, member);
            }
        }
        self.emit(Event::Typing(event));
        Ok(())
    }

    // === Messages ===

    fn parse_message_create(&self, data: Value) -> ParseResult {
        let message: Message = serde_json::from_value(data)?;
        self.cache().push_message(message.clone());
        self.emit(Event::Message(message));
        Ok(())
    }

    fn parse_message_update(&self, data: Value) -> ParseResult {
        let ids: MessageUpdateIds = serde_json::from_value(data.clone())?;

        if let Value::Object(fields) = &data {
            match self.cache().update_message(ids.id, fields) {
                Some(Ok(MessageEdit { before, after })) => {
                    self.emit(Event::MessageEdit { before, after });
                }
                Some(Err(e)) => {
                    tracing::warn!(message_id = %ids.id, error = %e, "Invalid field in MESSAGE_UPDATE");
                }
                None => {}
            }
        }

        self.emit(Event::RawMessageEdit {
            message_id: ids.id,
            channel_id: ids.channel_id,
            data,
        });
        Ok(())
    }

    fn parse_message_delete(&self, data: Value) -> ParseResult {
        let event: MessageDeleteEvent = serde_json::from_value(data)?;
        if let Some(message) = self.cache().remove_message(event.id) {
            self.emit(Event::MessageDelete(message));
        }
        self.emit(Event::RawMessageDelete(event));
        Ok(())
    }

    fn parse_message_delete_bulk(&self, data: Value) -> ParseResult {
        let event: MessageDeleteBulkEvent = serde_json::from_value(data)?;
        let removed = self.cache().remove_messages(&event.ids);
        if !removed.is_empty() {
            self.emit(Event::BulkMessageDelete(removed));
        }
        self.emit(Event::RawBulkMessageDelete(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use cord_cache::Cache;
    use cord_core::{MemberCachePolicy, Snowflake};
    use serde_json::json;

    use crate::dispatcher::{Dispatcher, HandlerError, Waiter};
    use crate::state::StateOptions;

    fn sf(id: u64) -> Snowflake {
        Snowflake::new(id)
    }

    fn state() -> ConnectionState {
        let options = StateOptions {
            guild_ready_timeout: Duration::from_millis(200),
            ..StateOptions::default()
        };
        ConnectionState::new(
            Arc::new(Cache::new(Some(10), MemberCachePolicy::All)),
            Dispatcher::new(),
            options,
        )
    }

    fn any(_: &Event) -> Result<bool, HandlerError> {
        Ok(true)
    }

    fn wait(state: &ConnectionState, event: &str) -> Waiter {
        state.dispatcher().register_listener(event, any, Some(Duration::from_secs(5)))
    }

    fn ready(guilds: &[u64]) -> Value {
        let guilds: Vec<Value> = guilds
            .iter()
            .map(|id| json!({"id": id.to_string(), "unavailable": true}))
            .collect();
        json!({
            "v": 10,
            "user": {"id": "1", "username": "bot", "bot": true},
            "guilds": guilds,
            "session_id": "session"
        })
    }

    fn guild_create(id: u64) -> Value {
        json!({
            "id": id.to_string(),
            "name": format!("guild-{id}"),
            "member_count": 1,
            "channels": [{"id": (id * 10).to_string(), "type": 0, "name": "general"}],
            "members": [{"user": {"id": "2", "username": "alice"}, "roles": []}],
            "emojis": []
        })
    }

    fn message(id: u64, channel: u64, content: &str) -> Value {
        json!({
            "id": id.to_string(),
            "channel_id": channel.to_string(),
            "author": {"id": "2", "username": "alice"},
            "content": content,
            "timestamp": "2024-01-01T00:00:00+00:00"
        })
    }

    #[tokio::test]
    async fn test_ready_waits_for_startup_guilds() {
        let state = state();
        let ready_waiter = wait(&state, "ready");

        state.parse("READY", ready(&[10, 11]));
        assert!(!state.is_ready());
        assert_eq!(state.cache().unavailable_guilds(), vec![sf(10), sf(11)]);
        assert_eq!(state.cache().current_user().unwrap().id, sf(1));

        state.parse("GUILD_CREATE", guild_create(10));
        state.parse("GUILD_CREATE", guild_create(11));

        ready_waiter.wait().await.unwrap();
        assert!(state.is_ready());
        assert_eq!(state.cache().guilds().len(), 2);
        assert!(state.cache().unavailable_guilds().is_empty());
        assert_eq!(state.cache().channels_for_guild(sf(10)).len(), 1);
        assert!(state.cache().get_member(sf(11), sf(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_fires_after_idle_timeout() {
        let state = state();
        let available = wait(&state, "guild_available");
        let ready_waiter = wait(&state, "ready");

        state.parse("READY", ready(&[10, 11]));
        state.parse("GUILD_CREATE", guild_create(10));

        let event = available.wait().await.unwrap();
        assert_eq!(event.guild_id(), Some(sf(10)));
        ready_waiter.wait().await.unwrap();
        assert!(state.is_ready());
        assert!(state.cache().is_unavailable(sf(11)));

        // A straggler after ready is announced directly
        let late = wait(&state, "guild_available");
        state.parse("GUILD_CREATE", guild_create(11));
        assert_eq!(late.wait().await.unwrap().guild_id(), Some(sf(11)));
    }

    #[tokio::test]
    async fn test_new_guild_is_a_join() {
        let state = state();
        state.parse("READY", ready(&[]));
        state.wait_until_ready().await;

        let join = wait(&state, "guild_join");
        state.parse("GUILD_CREATE", guild_create(20));
        assert_eq!(join.wait().await.unwrap().guild_id(), Some(sf(20)));
    }

    #[tokio::test]
    async fn test_guild_delete_unavailable_keeps_guild() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        let unavailable = wait(&state, "guild_unavailable");
        state.parse("GUILD_DELETE", json!({"id": "10", "unavailable": true}));
        unavailable.wait().await.unwrap();
        assert!(state.cache().get_guild(sf(10)).is_some());
        assert!(state.cache().is_unavailable(sf(10)));

        let removed = wait(&state, "guild_remove");
        state.parse("GUILD_DELETE", json!({"id": "10"}));
        removed.wait().await.unwrap();
        assert!(state.cache().get_guild(sf(10)).is_none());
        assert!(state.cache().get_channel(sf(100)).is_none());
        assert!(state.cache().get_member(sf(10), sf(2)).is_none());
    }

    #[tokio::test]
    async fn test_member_join_and_remove_track_count() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        let join = wait(&state, "member_join");
        state.parse(
            "GUILD_MEMBER_ADD",
            json!({"guild_id": "10", "user": {"id": "3", "username": "bob"}, "roles": []}),
        );
        join.wait().await.unwrap();
        assert_eq!(state.cache().get_guild(sf(10)).unwrap().member_count, 2);

        let remove = wait(&state, "member_remove");
        state.parse(
            "GUILD_MEMBER_REMOVE",
            json!({"guild_id": "10", "user": {"id": "3", "username": "bob"}}),
        );
        let event = remove.wait().await.unwrap();
        match event.as_ref() {
            Event::MemberRemove { member, .. } => assert!(member.is_some()),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(state.cache().get_guild(sf(10)).unwrap().member_count, 1);
        assert!(state.cache().get_member(sf(10), sf(3)).is_none());
    }

    #[tokio::test]
    async fn test_member_add_for_unknown_guild_is_ignored() {
        let state = state();
        let join = wait(&state, "member_join");
        state.parse(
            "GUILD_MEMBER_ADD",
            json!({"guild_id": "99", "user": {"id": "3", "username": "bob"}}),
        );
        assert_eq!(state.dispatcher().waiter_count("member_join"), 1);
        join.cancel();
    }

    #[tokio::test]
    async fn test_member_update_emits_before_and_after() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        let update = wait(&state, "member_update");
        state.parse(
            "GUILD_MEMBER_UPDATE",
            json!({"guild_id": "10", "user": {"id": "2", "username": "alice"}, "nick": "al", "roles": []}),
        );
        match update.wait().await.unwrap().as_ref() {
            Event::MemberUpdate { before, after } => {
                assert!(before.nick.is_none());
                assert_eq!(after.nick.as_deref(), Some("al"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_channel_events() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        let create = wait(&state, "guild_channel_create");
        state.parse(
            "CHANNEL_CREATE",
            json!({"id": "101", "type": 0, "guild_id": "10", "name": "random"}),
        );
        create.wait().await.unwrap();

        let update = wait(&state, "guild_channel_update");
        state.parse(
            "CHANNEL_UPDATE",
            json!({"id": "101", "type": 0, "guild_id": "10", "name": "renamed"}),
        );
        match update.wait().await.unwrap().as_ref() {
            Event::ChannelUpdate { before, after } => {
                assert_eq!(before.name.as_deref(), Some("random"));
                assert_eq!(after.name.as_deref(), Some("renamed"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let delete = wait(&state, "guild_channel_delete");
        state.parse("CHANNEL_DELETE", json!({"id": "101", "type": 0, "guild_id": "10"}));
        delete.wait().await.unwrap();
        assert!(state.cache().get_channel(sf(101)).is_none());
    }

    #[tokio::test]
    async fn test_update_for_uncached_channel_is_ignored() {
        let state = state();
        state.parse(
            "CHANNEL_UPDATE",
            json!({"id": "500", "type": 0, "guild_id": "10", "name": "ghost"}),
        );
        assert!(state.cache().get_channel(sf(500)).is_none());
    }

    #[tokio::test]
    async fn test_message_lifecycle() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        let created = wait(&state, "message");
        state.parse("MESSAGE_CREATE", message(1000, 100, "hello"));
        created.wait().await.unwrap();
        assert_eq!(state.cache().get_channel(sf(100)).unwrap().last_message_id, Some(sf(1000)));

        let edit = wait(&state, "message_edit");
        let raw_edit = wait(&state, "raw_message_edit");
        state.parse(
            "MESSAGE_UPDATE",
            json!({"id": "1000", "channel_id": "100", "content": "edited"}),
        );
        match edit.wait().await.unwrap().as_ref() {
            Event::MessageEdit { before, after } => {
                assert_eq!(before.content, "hello");
                assert_eq!(after.content, "edited");
            }
            other => panic!("unexpected event {other:?}"),
        }
        raw_edit.wait().await.unwrap();

        let deleted = wait(&state, "message_delete");
        let raw_deleted = wait(&state, "raw_message_delete");
        state.parse("MESSAGE_DELETE", json!({"id": "1000", "channel_id": "100"}));
        deleted.wait().await.unwrap();
        raw_deleted.wait().await.unwrap();
        assert!(state.cache().cached_messages().is_empty());
    }

    #[tokio::test]
    async fn test_uncached_message_edit_is_raw_only() {
        let state = state();
        let edit = wait(&state, "message_edit");
        let raw_edit = wait(&state, "raw_message_edit");

        state.parse(
            "MESSAGE_UPDATE",
            json!({"id": "77", "channel_id": "100", "content": "edited"}),
        );
        raw_edit.wait().await.unwrap();
        assert_eq!(state.dispatcher().waiter_count("message_edit"), 1);
        edit.cancel();
    }

    #[tokio::test]
    async fn test_bulk_delete_reports_cached_subset() {
        let state = state();
        state.parse("MESSAGE_CREATE", message(1, 100, "a"));
        state.parse("MESSAGE_CREATE", message(2, 100, "b"));

        let bulk = wait(&state, "bulk_message_delete");
        state.parse(
            "MESSAGE_DELETE_BULK",
            json!({"ids": ["1", "2", "3"], "channel_id": "100"}),
        );
        match bulk.wait().await.unwrap().as_ref() {
            Event::BulkMessageDelete(messages) => assert_eq!(messages.len(), 2),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_user_update_tracks_current_user() {
        let state = state();
        state.parse("READY", ready(&[]));

        let update = wait(&state, "user_update");
        state.parse("USER_UPDATE", json!({"id": "1", "username": "renamed", "bot": true}));
        update.wait().await.unwrap();
        assert_eq!(state.cache().current_user().unwrap().username, "renamed");
    }

    #[tokio::test]
    async fn test_members_chunk_completes_request() {
        let state = state();
        state.parse("GUILD_CREATE", guild_create(10));

        state.parse(
            "GUILD_MEMBERS_CHUNK",
            json!({
                "guild_id": "10",
                "members": [{"user": {"id": "5", "username": "e"}}],
                "chunk_index": 0,
                "chunk_count": 1
            }),
        );
        assert!(state.cache().get_member(sf(10), sf(5)).is_some());
        assert_eq!(state.cache().member_count(sf(10)), 2);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_events_are_dropped() {
        let state = state();
        state.parse("GUILD_CREATE", json!({"name": "no id"}));
        state.parse("SOMETHING_NEW", json!({}));
        assert!(state.cache().guilds().is_empty());
    }
}
