//! Upstream Session Integration Tests
//!
//! Exercises the full session lifecycle against a mocked credential endpoint
//! (wiremock) and a mocked agent WebSocket server:
//! - Credential exchange, including retry and exhaustion paths
//! - Initialization message contents
//! - Audio relay, keepalive pings, interruptions
//! - Silence prompts and clean shutdown
//!
//! Run: cargo test --test upstream_session_tests -- --nocapture

mod mock_upstream;

use std::time::Duration;

use base64::prelude::*;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mock_upstream::{AgentBehavior, MockAgent};
use voicebridge_gateway::core::relay::silence::SilenceWindow;
use voicebridge_gateway::core::upstream::{
    RetryPolicy, UpstreamConfig, UpstreamEvent, UpstreamVariant, create_upstream_session,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry policy with short delays so exhaustion tests finish quickly
fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_multiplier: 2.0,
    }
}

fn session_config(api_base: &str) -> UpstreamConfig {
    UpstreamConfig {
        api_base: api_base.to_string(),
        api_key: "agent-key".to_string(),
        agent_id: "agent-1".to_string(),
        bridge_url: None,
        bridge_api_key: None,
        prompt: Some("You are a test agent".to_string()),
        greeting: Some("Hello from the test".to_string()),
        voice_id: None,
        connect_timeout: Duration::from_secs(5),
        retry: fast_retry(),
    }
}

/// Mount the direct-variant signed-URL endpoint, requiring the API key header
async fn mount_signed_url(server: &MockServer, ws_url: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/convai/conversation/get-signed-url"))
        .and(query_param("agent_id", "agent-1"))
        .and(header("xi-api-key", "agent-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "signed_url": ws_url })))
        .mount(server)
        .await;
}

async fn next_event(events: &mut mpsc::Receiver<UpstreamEvent>, waiting_for: &str) -> UpstreamEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {waiting_for}"))
        .expect("Event channel closed unexpectedly")
}

// =============================================================================
// Connection and Initialization
// =============================================================================

#[tokio::test]
async fn test_direct_session_connects_and_initializes() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);
    assert!(session.is_ready());

    // Initialization must be the first frame, carrying the overrides
    let init = agent
        .wait_for(EVENT_TIMEOUT, |v| {
            v["type"] == "conversation_initiation_client_data"
        })
        .await;
    assert_eq!(
        init["conversation_config_override"]["agent"]["prompt"]["prompt"],
        "You are a test agent"
    );
    assert_eq!(
        init["conversation_config_override"]["agent"]["first_message"],
        "Hello from the test"
    );

    let received = agent.received().await;
    assert_eq!(
        received[0]["type"], "conversation_initiation_client_data",
        "Initialization was not the first frame: {received:?}"
    );

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_init_omits_override_when_nothing_customized() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let config = UpstreamConfig {
        prompt: None,
        greeting: None,
        ..session_config(&credential_server.uri())
    };

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        config,
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    let init = agent
        .wait_for(EVENT_TIMEOUT, |v| {
            v["type"] == "conversation_initiation_client_data"
        })
        .await;
    assert!(
        init.get("conversation_config_override").is_none(),
        "Empty override section should be omitted: {init}"
    );

    session.disconnect().await.expect("Disconnect failed");
}

// =============================================================================
// Credential Retry
// =============================================================================

#[tokio::test]
async fn test_credential_fetch_retries_then_succeeds() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;

    // First two attempts fail; mount order decides match priority
    Mock::given(method("GET"))
        .and(path("/v1/convai/conversation/get-signed-url"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream hiccup"))
        .up_to_n_times(2)
        .mount(&credential_server)
        .await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(
        next_event(&mut events_rx, "Ready after retries").await,
        UpstreamEvent::Ready
    );

    let requests = credential_server
        .received_requests()
        .await
        .expect("Request recording disabled");
    assert_eq!(requests.len(), 3, "Expected two failures plus one success");

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_credential_fetch_exhausts_retries() {
    let credential_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/convai/conversation/get-signed-url"))
        .respond_with(ResponseTemplate::new(503).set_body_string("still down"))
        .mount(&credential_server)
        .await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();

    match next_event(&mut events_rx, "Failed").await {
        UpstreamEvent::Failed(reason) => {
            assert!(
                reason.contains("Credential fetch failed"),
                "Unexpected failure reason: {reason}"
            );
        }
        other => panic!("Expected Failed, got {other:?}"),
    }
    assert!(!session.is_ready());

    let requests = credential_server
        .received_requests()
        .await
        .expect("Request recording disabled");
    assert_eq!(requests.len(), 3, "Every allowed attempt should be spent");
}

// =============================================================================
// Audio and Control Messages
// =============================================================================

#[tokio::test]
async fn test_audio_round_trip() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    let chunk: Vec<u8> = (0..160).map(|i| (i % 251) as u8).collect();
    let encoded = BASE64_STANDARD.encode(&chunk);
    session.send_audio(&chunk).await.expect("send_audio failed");

    // The mock logs the chunk and echoes it back as an agent audio event
    let logged = agent
        .wait_for(EVENT_TIMEOUT, |v| v.get("user_audio_chunk").is_some())
        .await;
    assert_eq!(logged["user_audio_chunk"], encoded.as_str());

    match next_event(&mut events_rx, "echoed Audio").await {
        UpstreamEvent::Audio(audio) => assert_eq!(audio, encoded),
        other => panic!("Expected Audio, got {other:?}"),
    }

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_keepalive_ping_answered_with_pong() {
    let agent = MockAgent::start_with(AgentBehavior {
        ping_on_start: true,
        ..AgentBehavior::default()
    })
    .await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    let pong = agent.wait_for(EVENT_TIMEOUT, |v| v["type"] == "pong").await;
    assert_eq!(pong["event_id"], 1, "Pong should echo the ping event id");

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_agent_interruption_forwarded() {
    let agent = MockAgent::start_with(AgentBehavior {
        interrupt_after_chunks: Some(1),
        ..AgentBehavior::default()
    })
    .await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    session.send_audio(&[0x7F; 160]).await.expect("send_audio failed");

    // Echo audio arrives first, then the scripted interruption
    let mut saw_interruption = false;
    for _ in 0..4 {
        match next_event(&mut events_rx, "Interruption").await {
            UpstreamEvent::Interruption => {
                saw_interruption = true;
                break;
            }
            UpstreamEvent::Audio(_) => continue,
            other => panic!("Unexpected event while waiting for Interruption: {other:?}"),
        }
    }
    assert!(saw_interruption);

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_silence_prompts_differ_by_turn() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    session
        .notify_silence(&SilenceWindow {
            threshold: Duration::from_millis(2000),
            is_first_turn: true,
        })
        .await
        .expect("notify_silence failed");
    session
        .notify_silence(&SilenceWindow {
            threshold: Duration::from_millis(5000),
            is_first_turn: false,
        })
        .await
        .expect("notify_silence failed");

    agent
        .wait_for(EVENT_TIMEOUT, |v| {
            v["type"] == "contextual_update" && v["text"].as_str().is_some_and(|t| t.contains("silent"))
        })
        .await;

    let updates: Vec<String> = agent
        .received()
        .await
        .iter()
        .filter(|v| v["type"] == "contextual_update")
        .filter_map(|v| v["text"].as_str().map(String::from))
        .collect();
    assert_eq!(updates.len(), 2);
    assert_ne!(updates[0], updates[1], "First-turn and mid-call prompts should differ");
    assert!(!updates[0].is_empty() && !updates[1].is_empty());

    session.disconnect().await.expect("Disconnect failed");
}

// =============================================================================
// Protocol Robustness
// =============================================================================

#[tokio::test]
async fn test_repeated_unparseable_agent_messages_fail_session() {
    let agent = MockAgent::start_with(AgentBehavior {
        garbage_after_metadata: 5,
        ..AgentBehavior::default()
    })
    .await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    // Five garbage frames in a row escalate from warnings to a dead session
    match next_event(&mut events_rx, "Failed").await {
        UpstreamEvent::Failed(reason) => {
            assert!(
                reason.contains("unparseable"),
                "Unexpected failure reason: {reason}"
            );
        }
        other => panic!("Expected Failed, got {other:?}"),
    }

    session.disconnect().await.expect("Disconnect failed");
}

#[tokio::test]
async fn test_valid_frame_resets_unparseable_message_count() {
    // Eight garbage frames, but a valid ping after the fourth keeps the
    // consecutive count under the limit
    let agent = MockAgent::start_with(AgentBehavior {
        garbage_after_metadata: 8,
        ping_between_garbage: Some(4),
        ..AgentBehavior::default()
    })
    .await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    // The interleaved ping is still answered
    agent.wait_for(EVENT_TIMEOUT, |v| v["type"] == "pong").await;

    // Audio still round-trips afterwards, so the session never failed
    let chunk = [0x5Au8; 160];
    let encoded = BASE64_STANDARD.encode(chunk);
    session.send_audio(&chunk).await.expect("send_audio failed");
    match next_event(&mut events_rx, "echoed Audio").await {
        UpstreamEvent::Audio(audio) => assert_eq!(audio, encoded),
        other => panic!("Expected Audio, got {other:?}"),
    }
    assert!(session.is_ready());

    session.disconnect().await.expect("Disconnect failed");
}

// =============================================================================
// Shutdown Paths
// =============================================================================

#[tokio::test]
async fn test_agent_close_emits_closed() {
    let agent = MockAgent::start_with(AgentBehavior {
        close_after_metadata: true,
        ..AgentBehavior::default()
    })
    .await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);
    assert_eq!(next_event(&mut events_rx, "Closed").await, UpstreamEvent::Closed);
    assert!(!session.is_ready());
}

#[tokio::test]
async fn test_disconnect_suppresses_closed_event() {
    let agent = MockAgent::start().await;
    let credential_server = MockServer::start().await;
    mount_signed_url(&credential_server, &agent.ws_url()).await;

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::Direct,
        session_config(&credential_server.uri()),
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    session.disconnect().await.expect("Disconnect failed");
    assert!(!session.is_ready());

    // An intentional disconnect ends the session silently
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        events_rx.try_recv().is_err(),
        "No event should follow an intentional disconnect"
    );
}

// =============================================================================
// Bridge Variant
// =============================================================================

#[tokio::test]
async fn test_bridge_session_authenticates_credential_exchange() {
    let agent = MockAgent::start().await;
    let broker = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/session"))
        .and(query_param("agent_id", "agent-1"))
        .and(header("x-api-key", "bridge-secret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "signed_url": agent.ws_url() })),
        )
        .mount(&broker)
        .await;

    let config = UpstreamConfig {
        bridge_url: Some(broker.uri()),
        bridge_api_key: Some("bridge-secret".to_string()),
        ..session_config("https://api.elevenlabs.io")
    };

    let (events_tx, mut events_rx) = mpsc::channel(64);
    let mut session = create_upstream_session(
        UpstreamVariant::McpBridge,
        config,
        reqwest::Client::new(),
        events_tx,
    )
    .expect("Failed to create bridge session");

    session.connect();
    assert_eq!(next_event(&mut events_rx, "Ready").await, UpstreamEvent::Ready);

    agent
        .wait_for(EVENT_TIMEOUT, |v| {
            v["type"] == "conversation_initiation_client_data"
        })
        .await;

    session.disconnect().await.expect("Disconnect failed");
}
