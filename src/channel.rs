// src/channel.rs
//
// Duplex notification channel. The reconnect state machine is a
// standalone synchronous unit (`ChannelController`); a thin
// tokio-tungstenite runner drives it and forwards server pushes to the
// session over an mpsc channel. The channel is independent of the
// capture/recognition path — it exists for out-of-band detections,
// status pushes, and liveness.

use crate::config::ChannelConfig;
use crate::error::ScanError;
use crate::types::{CandidateMatch, RawDetection};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

// ============================================================================
// ENVELOPES
// ============================================================================

/// Client → server messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Base64-encoded frame push (alternative ingest path).
    Frame { data: String, timestamp: f64 },
    Ping,
}

impl ClientMessage {
    /// Wrap an encoded frame for the channel's ingest path.
    pub fn frame(jpeg: &[u8], timestamp_ms: f64) -> Self {
        use base64::Engine;
        ClientMessage::Frame {
            data: base64::engine::general_purpose::STANDARD.encode(jpeg),
            timestamp: timestamp_ms,
        }
    }
}

/// Server → client messages. Unknown types are preserved so the session
/// can log them; they are never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { message: String },
    Processing { message: String },
    Detection { cards: Vec<PushedCard> },
    Error { message: String },
    Ping,
    Pong,
    Unknown { kind: String },
}

/// One card pushed out-of-band by the server, without frame geometry.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PushedCard {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub card_id: Option<String>,
    #[serde(default)]
    pub set_id: Option<String>,
    #[serde(default)]
    pub distance: Option<f32>,
}

impl PushedCard {
    /// Polygon-less detection, cacheable but not renderable.
    pub fn into_detection(self) -> RawDetection {
        RawDetection {
            polygon: Vec::new(),
            crop_size: None,
            matches: vec![CandidateMatch {
                name: self.name,
                card_id: self.card_id,
                set_id: self.set_id,
                distance: self.distance,
            }],
        }
    }
}

pub fn parse_server_event(text: &str) -> Result<ServerEvent, ScanError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ScanError::Channel(format!("bad envelope: {}", e)))?;
    let kind = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ScanError::Channel("envelope missing type tag".to_string()))?;

    let message = || {
        value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    match kind {
        "connected" => Ok(ServerEvent::Connected { message: message() }),
        "processing" => Ok(ServerEvent::Processing { message: message() }),
        "error" => Ok(ServerEvent::Error { message: message() }),
        "ping" => Ok(ServerEvent::Ping),
        "pong" => Ok(ServerEvent::Pong),
        "detection" => {
            let cards = value.get("cards").cloned().unwrap_or_else(|| serde_json::json!([]));
            let cards: Vec<PushedCard> = serde_json::from_value(cards)
                .map_err(|e| ScanError::Channel(format!("bad detection payload: {}", e)))?;
            Ok(ServerEvent::Detection { cards })
        }
        other => Ok(ServerEvent::Unknown {
            kind: other.to_string(),
        }),
    }
}

// ============================================================================
// RECONNECT STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connecting => "connecting",
            ChannelState::Connected => "connected",
        }
    }
}

/// Pure connection lifecycle: Disconnected → Connecting → Connected →
/// Disconnected → (one scheduled reconnect) → Connecting → … The
/// heartbeat runs exactly while Connected; close/error schedules at
/// most one reconnect at a time.
pub struct ChannelController {
    state: ChannelState,
    reconnect_pending: bool,
    opens: u64,
    reconnects_scheduled: u64,
}

impl ChannelController {
    pub fn new() -> Self {
        Self {
            state: ChannelState::Disconnected,
            reconnect_pending: false,
            opens: 0,
            reconnects_scheduled: 0,
        }
    }

    /// Disconnected → Connecting. False from any other state.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ChannelState::Disconnected {
            return false;
        }
        self.state = ChannelState::Connecting;
        true
    }

    /// Connecting → Connected. The heartbeat starts here.
    pub fn on_open(&mut self) -> bool {
        if self.state != ChannelState::Connecting {
            return false;
        }
        self.state = ChannelState::Connected;
        self.opens += 1;
        true
    }

    /// Close or error from any state. Returns true when a reconnect was
    /// newly scheduled; a reconnect already pending is never doubled.
    pub fn on_close(&mut self) -> bool {
        self.state = ChannelState::Disconnected;
        if self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = true;
        self.reconnects_scheduled += 1;
        true
    }

    /// The scheduled reconnect delay elapsed.
    pub fn reconnect_elapsed(&mut self) -> bool {
        let was_pending = self.reconnect_pending;
        self.reconnect_pending = false;
        was_pending
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The heartbeat timer exists exactly while connected.
    pub fn heartbeat_active(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn opens(&self) -> u64 {
        self.opens
    }

    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled
    }
}

impl Default for ChannelController {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUNNER
// ============================================================================

/// What the runner reports back to the session task.
#[derive(Debug)]
pub enum ChannelNotice {
    StateChanged(ChannelState),
    Event(ServerEvent),
    Fault(String),
}

/// Drive the channel until the session drops the receiving side. All
/// timers (heartbeat, reconnect delay) live inside this task and die
/// with it on session teardown.
pub async fn run_channel(
    config: ChannelConfig,
    ws_url: String,
    notices: mpsc::Sender<ChannelNotice>,
) {
    let mut ctrl = ChannelController::new();
    let heartbeat_period = Duration::from_secs(config.heartbeat_secs.max(1));
    let reconnect_delay = Duration::from_millis(config.reconnect_delay_ms);

    loop {
        ctrl.begin_connect();
        if notices
            .send(ChannelNotice::StateChanged(ChannelState::Connecting))
            .await
            .is_err()
        {
            return;
        }

        match tokio_tungstenite::connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                ctrl.on_open();
                info!("🔌 Notification channel connected: {}", ws_url);
                if notices
                    .send(ChannelNotice::StateChanged(ChannelState::Connected))
                    .await
                    .is_err()
                {
                    return;
                }

                let (mut sink, mut reader) = stream.split();
                // First ping one full period after connect, not immediately.
                let mut heartbeat =
                    tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);

                loop {
                    tokio::select! {
                        _ = heartbeat.tick() => {
                            debug!("💓 heartbeat ping");
                            let Ok(ping) = serde_json::to_string(&ClientMessage::Ping) else {
                                continue;
                            };
                            if sink.send(Message::Text(ping)).await.is_err() {
                                break;
                            }
                        }
                        incoming = reader.next() => match incoming {
                            Some(Ok(Message::Text(text))) => match parse_server_event(&text) {
                                Ok(event) => {
                                    if notices.send(ChannelNotice::Event(event)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    let _ = notices.send(ChannelNotice::Fault(e.to_string())).await;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                warn!("🔌 Notification channel closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                let _ = notices
                                    .send(ChannelNotice::Fault(format!("channel error: {}", e)))
                                    .await;
                                break;
                            }
                        }
                    }
                }
                // Falling out of the read loop drops the heartbeat
                // interval — it never fires outside Connected.
            }
            Err(e) => {
                let _ = notices
                    .send(ChannelNotice::Fault(format!("connect failed: {}", e)))
                    .await;
            }
        }

        if ctrl.on_close() {
            if notices
                .send(ChannelNotice::StateChanged(ChannelState::Disconnected))
                .await
                .is_err()
            {
                return;
            }
            tokio::time::sleep(reconnect_delay).await;
            ctrl.reconnect_elapsed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- state machine ----

    #[test]
    fn test_connect_open_close_cycle() {
        let mut ctrl = ChannelController::new();
        assert_eq!(ctrl.state(), ChannelState::Disconnected);
        assert!(!ctrl.heartbeat_active());

        assert!(ctrl.begin_connect());
        assert_eq!(ctrl.state(), ChannelState::Connecting);
        assert!(!ctrl.heartbeat_active());

        assert!(ctrl.on_open());
        assert_eq!(ctrl.state(), ChannelState::Connected);
        assert!(ctrl.heartbeat_active());

        assert!(ctrl.on_close());
        assert_eq!(ctrl.state(), ChannelState::Disconnected);
        assert!(!ctrl.heartbeat_active(), "heartbeat must stop outside Connected");
    }

    #[test]
    fn test_open_requires_connecting() {
        let mut ctrl = ChannelController::new();
        assert!(!ctrl.on_open());
        assert_eq!(ctrl.state(), ChannelState::Disconnected);
    }

    #[test]
    fn test_repeated_close_schedules_single_reconnect() {
        let mut ctrl = ChannelController::new();
        ctrl.begin_connect();
        ctrl.on_open();

        assert!(ctrl.on_close(), "first close schedules the reconnect");
        assert!(!ctrl.on_close(), "second close must not double it");
        assert!(!ctrl.on_close());
        assert!(ctrl.reconnect_pending());
        assert_eq!(ctrl.reconnects_scheduled(), 1);

        assert!(ctrl.reconnect_elapsed());
        assert!(!ctrl.reconnect_pending());
        assert!(ctrl.begin_connect());
    }

    #[test]
    fn test_connect_attempt_blocked_while_connecting() {
        let mut ctrl = ChannelController::new();
        assert!(ctrl.begin_connect());
        assert!(!ctrl.begin_connect());
    }

    // ---- envelopes ----

    #[test]
    fn test_parse_status_envelopes() {
        assert_eq!(
            parse_server_event(r#"{"type": "connected", "message": "ready"}"#).unwrap(),
            ServerEvent::Connected {
                message: "ready".to_string()
            }
        );
        assert_eq!(
            parse_server_event(r#"{"type": "processing", "message": "1 frame"}"#).unwrap(),
            ServerEvent::Processing {
                message: "1 frame".to_string()
            }
        );
        assert_eq!(
            parse_server_event(r#"{"type": "error", "message": "boom"}"#).unwrap(),
            ServerEvent::Error {
                message: "boom".to_string()
            }
        );
        assert_eq!(parse_server_event(r#"{"type": "pong"}"#).unwrap(), ServerEvent::Pong);
    }

    #[test]
    fn test_parse_detection_envelope() {
        let event = parse_server_event(
            r#"{"type": "detection", "cards": [{"name": "Pikachu", "set_id": "base1"}]}"#,
        )
        .unwrap();
        let ServerEvent::Detection { cards } = event else {
            panic!("expected detection");
        };
        assert_eq!(cards.len(), 1);

        let detection = cards[0].clone().into_detection();
        assert!(detection.polygon.is_empty());
        assert_eq!(detection.display_name(), "Pikachu");
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let event = parse_server_event(r#"{"type": "telemetry", "load": 0.5}"#).unwrap();
        assert_eq!(
            event,
            ServerEvent::Unknown {
                kind: "telemetry".to_string()
            }
        );
    }

    #[test]
    fn test_envelope_without_type_is_an_error() {
        assert!(parse_server_event(r#"{"message": "hi"}"#).is_err());
        assert!(parse_server_event("not json").is_err());
    }

    #[test]
    fn test_client_message_wire_shapes() {
        let ping = serde_json::to_value(&ClientMessage::Ping).unwrap();
        assert_eq!(ping, serde_json::json!({"type": "ping"}));

        let frame = serde_json::to_value(&ClientMessage::frame(b"hello", 12.5)).unwrap();
        assert_eq!(
            frame,
            serde_json::json!({"type": "frame", "data": "aGVsbG8=", "timestamp": 12.5})
        );
    }
}
