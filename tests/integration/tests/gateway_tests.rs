//! Gateway Integration Tests
//!
//! Each test runs a real client against the in-process mock gateway.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use cord_client::{Client, ClientError, Event, HandlerError};
use cord_core::Snowflake;
use cord_gateway::protocol::{GatewayMessage, OpCode};
use cord_gateway::GatewayError;
use integration_tests::{
    guild_create, init_logging, logged_in_client, message_create, ready, spawn_connect,
    test_config, MockGateway, MockHttp, SESSION_ID, STEP_TIMEOUT, TOKEN,
};
use parking_lot::Mutex;
use serde_json::json;

fn any(_: &Event) -> Result<bool, HandlerError> {
    Ok(true)
}

// ============================================================================
// Resume Tests
// ============================================================================

#[tokio::test]
async fn test_resumable_close_resumes_without_duplicates() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();

    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    {
        let seen = Arc::clone(&seen);
        client.add_listener("message", move |event| {
            let seen = Arc::clone(&seen);
            async move {
                if let Event::Message(message) = event.as_ref() {
                    seen.lock().push(message.id.get());
                }
                Ok::<_, HandlerError>(())
            }
        });
    }
    let session = spawn_connect(&client, true);

    // First connection: identify, then three events
    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    let identify = conn.expect(OpCode::Identify).await.unwrap();
    assert_eq!(identify.d.unwrap()["token"], TOKEN);

    conn.dispatch("READY", 1, ready(&[], &gateway.url())).await.unwrap();
    conn.dispatch("MESSAGE_CREATE", 2, message_create(2, 100, "one")).await.unwrap();
    conn.dispatch("MESSAGE_CREATE", 3, message_create(3, 100, "two")).await.unwrap();
    tokio::time::timeout(STEP_TIMEOUT, client.wait_until_ready())
        .await
        .unwrap();

    let resumed = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for("resumed", any, Some(STEP_TIMEOUT)).await })
    };
    conn.close(4000).await.unwrap();

    // Second connection must RESUME from the last sequence
    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    let resume = conn.expect(OpCode::Resume).await.unwrap();
    let payload = resume.d.unwrap();
    assert_eq!(payload["session_id"], SESSION_ID);
    assert_eq!(payload["seq"], 3);

    // Replay overlaps what was already delivered
    conn.dispatch("MESSAGE_CREATE", 2, message_create(2, 100, "one")).await.unwrap();
    conn.dispatch("MESSAGE_CREATE", 3, message_create(3, 100, "two")).await.unwrap();
    conn.dispatch("MESSAGE_CREATE", 4, message_create(4, 100, "three")).await.unwrap();
    conn.dispatch("RESUMED", 5, json!({})).await.unwrap();

    resumed.await.unwrap().unwrap();
    // Handlers run in their own tasks
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while seen.lock().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ids = seen.lock().clone();
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3, 4]);
    assert_eq!(client.cached_messages().len(), 3);

    client.close();
    assert_eq!(conn.closed_by_client().await.unwrap(), Some(1000));
    session.await.unwrap().unwrap();
}

// ============================================================================
// Fatal Close Tests
// ============================================================================

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.close(4004).await.unwrap();

    let result = tokio::time::timeout(STEP_TIMEOUT, session).await.unwrap().unwrap();
    match result {
        Err(ClientError::Gateway(GatewayError::AuthenticationFailed)) => {}
        other => panic!("expected authentication failure, got {other:?}"),
    }

    // No retry after a fatal close
    assert!(gateway
        .try_next_connection(Duration::from_millis(300))
        .await
        .is_none());
}

#[tokio::test]
async fn test_disallowed_intents_is_fatal() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.close(4014).await.unwrap();

    let err = session.await.unwrap().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        ClientError::Gateway(GatewayError::PrivilegedIntentsRequired { shard_id: 0 })
    ));
}

// ============================================================================
// Heartbeat Tests
// ============================================================================

#[tokio::test]
async fn test_missing_heartbeat_ack_reconnects() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();

    let disconnected = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for("disconnect", any, Some(STEP_TIMEOUT)).await })
    };
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.ack_heartbeats = false;
    conn.hello(100).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready(&[], &gateway.url())).await.unwrap();

    // The second unacknowledged beat zombies the connection
    let code = conn.closed_by_client().await.unwrap();
    assert_eq!(code, Some(4000));
    disconnected.await.unwrap().unwrap();

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    let resume = conn.expect(OpCode::Resume).await.unwrap();
    assert_eq!(resume.d.unwrap()["seq"], 1);

    client.close();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_requested_heartbeat_carries_sequence() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready(&[], &gateway.url())).await.unwrap();
    conn.dispatch("MESSAGE_CREATE", 2, message_create(2, 100, "hi")).await.unwrap();

    conn.send(&GatewayMessage::heartbeat(None)).await.unwrap();
    assert_eq!(conn.expect_heartbeat().await.unwrap(), Some(2));

    client.close();
    session.await.unwrap().unwrap();
}

// ============================================================================
// Startup Tests
// ============================================================================

#[tokio::test]
async fn test_ready_after_all_startup_guilds() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();

    let ready_event = {
        let client = client.clone();
        tokio::spawn(async move { client.wait_for("ready", any, Some(STEP_TIMEOUT)).await })
    };
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready(&[10, 11, 12], &gateway.url())).await.unwrap();
    conn.dispatch("GUILD_CREATE", 2, guild_create(10)).await.unwrap();
    conn.dispatch("GUILD_CREATE", 3, guild_create(11)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_ready());

    conn.dispatch("GUILD_CREATE", 4, guild_create(12)).await.unwrap();
    ready_event.await.unwrap().unwrap();

    assert!(client.is_ready());
    let guilds = client.guilds();
    assert_eq!(guilds.len(), 3);
    assert!(guilds.iter().all(|g| !g.unavailable));
    assert!(client.get_channel(Snowflake::new(1100)).is_some());
    assert_eq!(client.user().unwrap().username, "cord-bot");

    client.close();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_presence_change_reaches_gateway() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready(&[], &gateway.url())).await.unwrap();
    tokio::time::timeout(STEP_TIMEOUT, client.wait_until_ready())
        .await
        .unwrap();

    client
        .change_presence(cord_client::Status::Dnd, Some(cord_client::Activity::playing("tests")))
        .unwrap();
    let presence = conn.expect(OpCode::PresenceUpdate).await.unwrap();
    let payload = presence.d.unwrap();
    assert_eq!(payload["status"], "dnd");
    assert_eq!(payload["activities"][0]["name"], "tests");

    client.close();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_invalid_session_reidentifies() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let client = logged_in_client(&gateway).await.unwrap();
    let session = spawn_connect(&client, true);

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();
    conn.dispatch("READY", 1, ready(&[], &gateway.url())).await.unwrap();
    conn.send(&GatewayMessage {
        op: OpCode::InvalidSession,
        d: Some(json!(false)),
        s: None,
        t: None,
    })
    .await
    .unwrap();
    assert_eq!(conn.closed_by_client().await.unwrap(), Some(1000));

    let mut conn = gateway.next_connection().await.unwrap();
    conn.hello(45_000).await.unwrap();
    conn.expect(OpCode::Identify).await.unwrap();

    client.close();
    session.await.unwrap().unwrap();
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_close_while_waiting_for_hello() {
    init_logging();
    let mut gateway = MockGateway::start().await.unwrap();
    let config = test_config(&gateway).with_hello_timeout(Duration::from_secs(60));
    let client = Client::with_http(config, Arc::new(MockHttp::new(gateway.url()))).unwrap();
    client.login(TOKEN).await.unwrap();
    let session = spawn_connect(&client, true);

    // Never send HELLO
    let mut conn = gateway.next_connection().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.close();

    assert_eq!(conn.closed_by_client().await.unwrap(), Some(1000));
    let result = tokio::time::timeout(STEP_TIMEOUT, session).await.unwrap().unwrap();
    assert!(result.is_ok(), "expected a clean shutdown, got {result:?}");
    assert!(gateway
        .try_next_connection(Duration::from_millis(300))
        .await
        .is_none());
}
