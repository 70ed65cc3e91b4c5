//! Integration tests for the live connection manager
//!
//! Each test points a client at a mock event server and exercises one
//! lifecycle property: idempotent connects, clean vs. unexpected closes,
//! backoff pacing, reconnect exhaustion, liveness detection, and observer
//! fan-out.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use carelink_console::{BaseEndpoint, ConnectionState, LiveClient, LiveClientConfig};
use common::{MockEventServer, ServerMode};

/// Short delays so lifecycle tests finish quickly; the production
/// defaults are asserted in the manager's unit tests.
fn fast_config() -> LiveClientConfig {
    LiveClientConfig {
        connect_timeout: Duration::from_secs(5),
        initial_reconnect_delay: Duration::from_millis(100),
        max_reconnect_delay: Duration::from_secs(1),
        ..LiveClientConfig::default()
    }
}

fn client_for(server: &MockEventServer, config: LiveClientConfig) -> LiveClient {
    let resolver = Arc::new(BaseEndpoint::new(&server.ws_url()).unwrap());
    LiveClient::new(config, resolver)
}

async fn wait_for_state(client: &LiveClient, state: ConnectionState, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if client.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client.state() == state
}

// ─────────────────────────────────────────────────────────────────
// Connect / Disconnect Lifecycle
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_then_disconnect() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    client.connect("/ws/live").await.unwrap();
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    client.connect("/ws/live").await.unwrap();
    client.connect("/ws/live").await.unwrap();
    client.connect("/ws/live").await.unwrap();

    // No second transport was ever opened
    assert_eq!(server.connection_count(), 1);
    assert!(client.is_connected());

    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    // Safe even before any connect
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect("/ws/live").await.unwrap();
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    // Bind then drop a listener to get a port nothing is listening on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let resolver = Arc::new(BaseEndpoint::new(&format!("ws://{}", addr)).unwrap());
    let config = LiveClientConfig {
        max_reconnect_attempts: 0,
        ..fast_config()
    };
    let client = LiveClient::new(config, resolver);

    assert!(client.connect("/ws/live").await.is_err());
    assert!(wait_for_state(&client, ConnectionState::Exhausted, Duration::from_secs(2)).await);
}

// ─────────────────────────────────────────────────────────────────
// Close Handling
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_clean_close_never_reconnects() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    client.connect("/ws/live").await.unwrap();

    // Close with the clean-shutdown code
    server.close_all(1000).await;
    assert!(wait_for_state(&client, ConnectionState::Disconnected, Duration::from_secs(2)).await);

    // Wait several reconnect periods; no new connection may appear
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unexpected_close_reconnects() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    client.connect("/ws/live").await.unwrap();

    // Going-away is not the clean-shutdown code
    server.close_all(1001).await;

    assert!(server.wait_for_connections(2, Duration::from_secs(3)).await);
    assert!(wait_for_state(&client, ConnectionState::Connected, Duration::from_secs(3)).await);

    client.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────
// Backoff and Exhaustion
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_backoff_doubles_between_failed_attempts() {
    let server = MockEventServer::start(ServerMode::RejectHandshake).await;
    let config = LiveClientConfig {
        initial_reconnect_delay: Duration::from_millis(200),
        max_reconnect_attempts: 2,
        ..fast_config()
    };
    let client = client_for(&server, config);

    assert!(client.connect("/ws/live").await.is_err());
    assert!(server.wait_for_connections(3, Duration::from_secs(5)).await);
    assert!(wait_for_state(&client, ConnectionState::Exhausted, Duration::from_secs(2)).await);

    let times = server.accept_times();
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];

    // First retry after ~200ms, second after ~400ms
    assert!(
        first_gap >= Duration::from_millis(150) && first_gap < Duration::from_millis(350),
        "first gap was {:?}",
        first_gap
    );
    assert!(
        second_gap >= Duration::from_millis(300) && second_gap < Duration::from_millis(650),
        "second gap was {:?}",
        second_gap
    );
}

#[tokio::test]
async fn test_gives_up_after_reconnect_budget() {
    let server = MockEventServer::start(ServerMode::RejectHandshake).await;
    let config = LiveClientConfig {
        initial_reconnect_delay: Duration::from_millis(50),
        max_reconnect_attempts: 2,
        ..fast_config()
    };
    let client = client_for(&server, config);

    assert!(client.connect("/ws/live").await.is_err());
    assert!(wait_for_state(&client, ConnectionState::Exhausted, Duration::from_secs(3)).await);

    // Initial attempt plus two scheduled retries, then nothing further
    assert_eq!(server.connection_count(), 3);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count(), 3);

    // An explicit connect starts a fresh budget
    assert!(client.connect("/ws/live").await.is_err());
    assert!(server.connection_count() >= 4);
}

// ─────────────────────────────────────────────────────────────────
// Liveness
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_pong_forces_reconnect() {
    let server = MockEventServer::start(ServerMode::SilencePings).await;
    let config = LiveClientConfig {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_timeout: Duration::from_millis(300),
        ..fast_config()
    };
    let client = client_for(&server, config);

    client.connect("/ws/live").await.unwrap();

    // With pongs silenced, the liveness deadline forces a reconnect
    assert!(server.wait_for_connections(2, Duration::from_secs(3)).await);
    assert!(
        server
            .wait_for_frame(|frame| frame.contains("\"ping\""), Duration::from_secs(1))
            .await
    );

    client.disconnect().await;
}

#[tokio::test]
async fn test_pongs_keep_connection_alive() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let config = LiveClientConfig {
        heartbeat_interval: Duration::from_millis(200),
        heartbeat_timeout: Duration::from_millis(300),
        ..fast_config()
    };
    let client = client_for(&server, config);

    client.connect("/ws/live").await.unwrap();

    // Several probe periods pass without a drop
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);

    client.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────
// Message Dispatch
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dashboard_update_dispatched_exactly_once() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
    let invocations = Arc::new(AtomicUsize::new(0));

    let seen_clone = seen.clone();
    let invocations_clone = invocations.clone();
    client.add_message_listener(move |envelope| {
        invocations_clone.fetch_add(1, Ordering::SeqCst);
        seen_clone.lock().push(envelope.body().clone());
    });

    client.connect("/ws/live").await.unwrap();
    server
        .push(r#"{"type":"dashboard_update","analytics":{"totalCalls":42}}"#)
        .await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && invocations.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(
        seen.lock()[0],
        serde_json::json!({"type": "dashboard_update", "analytics": {"totalCalls": 42}})
    );

    client.disconnect().await;
}

#[tokio::test]
async fn test_malformed_frame_is_dropped() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    client.add_message_listener(move |envelope| {
        seen_clone.lock().push(envelope.kind().to_string());
    });

    client.connect("/ws/live").await.unwrap();

    // A malformed frame, then a valid one
    server.push("not json").await;
    server.push(r#"{"type":"ticket_update","ticket":{"id":"tk-1"}}"#).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && seen.lock().is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Only the valid frame was delivered and the manager survived
    assert_eq!(seen.lock().clone(), vec!["ticket_update".to_string()]);
    assert!(client.is_connected());

    client.disconnect().await;
}

#[tokio::test]
async fn test_removed_listener_receives_nothing() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    let removed_hits = Arc::new(AtomicUsize::new(0));
    let kept_hits = Arc::new(AtomicUsize::new(0));

    let removed_clone = removed_hits.clone();
    let removed_id = client.add_message_listener(move |_| {
        removed_clone.fetch_add(1, Ordering::SeqCst);
    });
    let kept_clone = kept_hits.clone();
    client.add_message_listener(move |_| {
        kept_clone.fetch_add(1, Ordering::SeqCst);
    });

    assert!(client.remove_message_listener(removed_id));

    client.connect("/ws/live").await.unwrap();
    server.push(r#"{"type":"call_update","call":{"id":"call-1"}}"#).await;

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && kept_hits.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(kept_hits.load(Ordering::SeqCst), 1);
    assert_eq!(removed_hits.load(Ordering::SeqCst), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn test_observers_see_liveness_traffic() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let config = LiveClientConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(400),
        ..fast_config()
    };
    let client = client_for(&server, config);

    let pongs = Arc::new(AtomicUsize::new(0));
    let pongs_clone = pongs.clone();
    client.add_message_listener(move |envelope| {
        if envelope.kind() == "pong" {
            pongs_clone.fetch_add(1, Ordering::SeqCst);
        }
    });

    client.connect("/ws/live").await.unwrap();

    // Inbound pong frames are not suppressed by the liveness handling
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && pongs.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(pongs.load(Ordering::SeqCst) >= 1);

    client.disconnect().await;
}

// ─────────────────────────────────────────────────────────────────
// Send
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_requires_connection() {
    let server = MockEventServer::start(ServerMode::AnswerPings).await;
    let client = client_for(&server, fast_config());

    let payload = serde_json::json!({"type": "resync", "views": ["calls"]});

    // Not connected: reported no-op
    assert!(!client.send(&payload).await);

    client.connect("/ws/live").await.unwrap();
    assert!(client.send(&payload).await);
    assert!(
        server
            .wait_for_frame(|frame| frame.contains("resync"), Duration::from_secs(2))
            .await
    );

    client.disconnect().await;
    assert!(!client.send(&payload).await);
}
