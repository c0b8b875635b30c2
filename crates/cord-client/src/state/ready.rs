//! Ready delay
//!
//! After READY the gateway streams one GUILD_CREATE per startup guild. The
//! client holds `ready` back until they have all arrived or the stream goes
//! idle for `guild_ready_timeout`, optionally chunks their members, then
//! announces each guild and finally `ready`.

use std::collections::HashSet;

use cord_core::Snowflake;
use futures::future::join_all;
use tokio::sync::mpsc;

use super::ConnectionState;
use crate::events::Event;

pub(super) async fn guild_backlog(
    state: ConnectionState,
    generation: u64,
    mut pending: HashSet<Snowflake>,
    mut arrivals: mpsc::UnboundedReceiver<Snowflake>,
) {
    let options = state.options().clone();
    let mut arrived = Vec::with_capacity(pending.len());

    tracing::debug!(guilds = pending.len(), "Waiting for startup guilds");

    while !pending.is_empty() {
        match tokio::time::timeout(options.guild_ready_timeout, arrivals.recv()).await {
            Ok(Some(guild_id)) => {
                if pending.remove(&guild_id) {
                    arrived.push(guild_id);
                }
            }
            // Superseded by a newer READY
            Ok(None) => return,
            Err(_) => {
                tracing::warn!(
                    missing = pending.len(),
                    "Timed out waiting for startup guilds, firing ready anyway"
                );
                break;
            }
        }
    }

    if !state.end_startup_intake(generation) {
        return;
    }
    // Forwarded between the last recv and the end of intake
    while let Ok(guild_id) = arrivals.try_recv() {
        if pending.remove(&guild_id) {
            arrived.push(guild_id);
        }
    }

    if options.member_policy.chunks_at_startup(options.intents) {
        chunk_guilds(&state, &arrived).await;
    }

    if !state.finish_startup(generation) {
        return;
    }
    for guild_id in arrived {
        if let Some(guild) = state.cache().get_guild(guild_id) {
            state.emit(Event::GuildAvailable(guild));
        }
    }
    tracing::info!(
        guilds = state.cache().guilds().len(),
        unavailable = pending.len(),
        "Client ready"
    );
    state.emit(Event::Ready);
}

/// Chunk every arrived guild whose cached member list is incomplete
async fn chunk_guilds(state: &ConnectionState, guilds: &[Snowflake]) {
    let timeout = state.options().chunk_timeout;
    let cache = state.cache();

    let incomplete: Vec<Snowflake> = guilds
        .iter()
        .copied()
        .filter(|&id| {
            cache
                .get_guild(id)
                .is_some_and(|g| (cache.member_count(id) as u64) < g.member_count)
        })
        .collect();
    if incomplete.is_empty() {
        return;
    }

    tracing::debug!(guilds = incomplete.len(), "Chunking startup guilds");
    let results = join_all(incomplete.iter().map(|&id| state.chunk_guild(id, timeout))).await;
    for (guild_id, result) in incomplete.into_iter().zip(results) {
        match result {
            Ok(members) => {
                tracing::debug!(guild_id = %guild_id, members = members.len(), "Guild chunked");
            }
            Err(e) => tracing::warn!(guild_id = %guild_id, error = %e, "Failed to chunk guild"),
        }
    }
}
