//! Gateway payload fixtures

use serde_json::{json, Value};

/// Session id every mock READY announces
pub const SESSION_ID: &str = "mock-session";

/// Token the mock REST collaborator accepts
pub const TOKEN: &str = "mock-token";

/// The bot user
pub fn bot_user() -> Value {
    json!({"id": "1", "username": "cord-bot", "discriminator": "0", "bot": true})
}

/// READY with every listed guild unavailable
pub fn ready(guild_ids: &[u64], resume_url: &str) -> Value {
    let guilds: Vec<Value> = guild_ids
        .iter()
        .map(|id| json!({"id": id.to_string(), "unavailable": true}))
        .collect();
    json!({
        "v": 10,
        "user": bot_user(),
        "guilds": guilds,
        "session_id": SESSION_ID,
        "resume_gateway_url": resume_url,
        "shard": [0, 1]
    })
}

/// A small guild with one channel and no members
pub fn guild_create(id: u64) -> Value {
    json!({
        "id": id.to_string(),
        "name": format!("guild-{id}"),
        "member_count": 0,
        "channels": [{"id": (id * 100).to_string(), "type": 0, "name": "general", "position": 0}],
        "members": [],
        "emojis": [],
        "roles": []
    })
}

pub fn message_create(id: u64, channel_id: u64, content: &str) -> Value {
    json!({
        "id": id.to_string(),
        "channel_id": channel_id.to_string(),
        "author": {"id": "2", "username": "alice", "discriminator": "0"},
        "content": content,
        "timestamp": "2024-05-01T12:00:00+00:00"
    })
}
