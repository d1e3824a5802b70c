//! Mock voice-AI agent session server
//!
//! Simulates the agent side of the upstream session socket: accepts the
//! gateway's WebSocket connection, answers the initialization message with
//! conversation metadata, and plays back scripted agent behavior (audio
//! echo, interruptions, keepalive pings). Every text frame the gateway sends
//! is recorded for assertions.

// Allow dead code in test infrastructure - not every test uses every knob
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Scripted behavior for one mock agent
#[derive(Debug, Clone)]
pub struct AgentBehavior {
    /// Echo each received audio chunk back as an agent `audio` event
    pub echo_audio: bool,
    /// Send an `interruption` event after this many audio chunks
    pub interrupt_after_chunks: Option<u64>,
    /// Send a keepalive `ping` right after the initialization metadata
    pub ping_on_start: bool,
    /// Close the socket right after the initialization metadata
    pub close_after_metadata: bool,
    /// Reply to `contextual_update` messages with an `agent_response` event
    pub respond_to_context: bool,
    /// Send this many unparseable text frames right after the metadata
    pub garbage_after_metadata: u32,
    /// Interleave a valid keepalive ping after this many garbage frames
    pub ping_between_garbage: Option<u32>,
}

impl Default for AgentBehavior {
    fn default() -> Self {
        Self {
            echo_audio: true,
            interrupt_after_chunks: None,
            ping_on_start: false,
            close_after_metadata: false,
            respond_to_context: true,
            garbage_after_metadata: 0,
            ping_between_garbage: None,
        }
    }
}

/// A mock agent session endpoint bound to an ephemeral local port
pub struct MockAgent {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockAgent {
    /// Start a mock agent with default behavior (echo audio)
    pub async fn start() -> Self {
        Self::start_with(AgentBehavior::default()).await
    }

    /// Start a mock agent with scripted behavior
    pub async fn start_with(behavior: AgentBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock agent");
        let addr = listener.local_addr().expect("Failed to get mock address");
        let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

        let log = received.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let log = log.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_session(stream, behavior, log).await {
                        eprintln!("Mock agent connection error: {e}");
                    }
                });
            }
        });

        Self {
            addr,
            received,
            accept_task,
        }
    }

    /// WebSocket URL for this mock, suitable as a signed-url response body
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Snapshot of every text frame the gateway has sent so far
    pub async fn received(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    /// Wait until a frame matching the predicate arrives, or panic on timeout
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Value
    where
        F: Fn(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(found) = self.received.lock().await.iter().find(|v| predicate(v)) {
                return found.clone();
            }
            if tokio::time::Instant::now() >= deadline {
                let seen = self.received.lock().await.clone();
                panic!("Timed out waiting for mock agent frame; received so far: {seen:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Serve one gateway connection according to the scripted behavior
async fn handle_session(
    stream: TcpStream,
    behavior: AgentBehavior,
    log: Arc<Mutex<Vec<Value>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let mut audio_chunks = 0u64;
    let mut event_id = 0u64;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                log.lock().await.push(value.clone());

                let message_type = value.get("type").and_then(|t| t.as_str());

                if message_type == Some("conversation_initiation_client_data") {
                    let metadata = json!({
                        "type": "conversation_initiation_metadata",
                        "conversation_initiation_metadata_event": {
                            "conversation_id": "conv-mock-1",
                            "agent_output_audio_format": "ulaw_8000"
                        }
                    });
                    write
                        .send(Message::Text(metadata.to_string().into()))
                        .await?;

                    if behavior.ping_on_start {
                        event_id += 1;
                        let ping = json!({
                            "type": "ping",
                            "ping_event": { "event_id": event_id, "ping_ms": 25 }
                        });
                        write.send(Message::Text(ping.to_string().into())).await?;
                    }

                    for n in 0..behavior.garbage_after_metadata {
                        if behavior.ping_between_garbage == Some(n) {
                            event_id += 1;
                            let ping = json!({
                                "type": "ping",
                                "ping_event": { "event_id": event_id, "ping_ms": 25 }
                            });
                            write.send(Message::Text(ping.to_string().into())).await?;
                        }
                        write
                            .send(Message::Text(format!("corrupted frame {n} <<not json>>").into()))
                            .await?;
                    }

                    if behavior.close_after_metadata {
                        write.send(Message::Close(None)).await?;
                        break;
                    }
                    continue;
                }

                if let Some(chunk) = value.get("user_audio_chunk").and_then(|c| c.as_str()) {
                    audio_chunks += 1;

                    if behavior.echo_audio {
                        event_id += 1;
                        let audio = json!({
                            "type": "audio",
                            "audio_event": {
                                "audio_base_64": chunk,
                                "event_id": event_id
                            }
                        });
                        write.send(Message::Text(audio.to_string().into())).await?;
                    }

                    if behavior.interrupt_after_chunks == Some(audio_chunks) {
                        event_id += 1;
                        let interruption = json!({
                            "type": "interruption",
                            "interruption_event": {
                                "reason": "user speech detected",
                                "event_id": event_id
                            }
                        });
                        write
                            .send(Message::Text(interruption.to_string().into()))
                            .await?;
                    }
                    continue;
                }

                if message_type == Some("contextual_update") && behavior.respond_to_context {
                    event_id += 1;
                    let response = json!({
                        "type": "agent_response",
                        "agent_response_event": {
                            "agent_response": "Are you still there?"
                        }
                    });
                    write
                        .send(Message::Text(response.to_string().into()))
                        .await?;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                write.send(Message::Pong(data)).await?;
            }
            Err(e) => {
                eprintln!("Mock agent WebSocket error: {e}");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
