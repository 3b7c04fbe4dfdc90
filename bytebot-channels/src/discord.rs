//! Discord integration using the Gateway WebSocket and REST API
//!
//! The Gateway session delivers `MESSAGE_CREATE` events which are forwarded
//! as [`PlatformEvent`]s; outbound messages go through the REST API.

use crate::base::{ChannelError, ChatPlatform, PlatformEvent, Result};
use async_trait::async_trait;
use bytebot_core::config::DiscordConfig;
use bytebot_core::{Message, MessageReference, User};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const INITIAL_RECONNECT_SECS: u64 = 5;
const MAX_RECONNECT_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_MS: u64 = 45_000;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Gateway close codes after which reconnecting cannot help
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;
const CLOSE_DISALLOWED_INTENTS: u16 = 4014;

type GatewayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Discord Gateway message opcodes
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum GatewayOp {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOp {
    fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(GatewayOp::Dispatch),
            1 => Some(GatewayOp::Heartbeat),
            2 => Some(GatewayOp::Identify),
            7 => Some(GatewayOp::Reconnect),
            9 => Some(GatewayOp::InvalidSession),
            10 => Some(GatewayOp::Hello),
            11 => Some(GatewayOp::HeartbeatAck),
            _ => None,
        }
    }
}

/// Discord Gateway payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<String>,
}

/// How a single gateway connection ended
#[derive(Debug, PartialEq)]
enum SessionEnd {
    Cancelled,
    /// The event receiver went away; nobody is listening any more
    EventsClosed,
    Reconnect(String),
}

/// Heartbeat task of one gateway connection
///
/// Each beat expects the previous one to have been acknowledged; a missed
/// ACK fires `lost` so the session can reconnect.
struct Heartbeat {
    handle: Option<JoinHandle<()>>,
    acked: Arc<AtomicBool>,
    lost: CancellationToken,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            handle: None,
            acked: Arc::new(AtomicBool::new(true)),
            lost: CancellationToken::new(),
        }
    }

    fn start(
        &mut self,
        interval_ms: u64,
        tx: mpsc::Sender<WsMessage>,
        seq: Arc<Mutex<Option<u64>>>,
    ) {
        self.stop();
        self.acked.store(true, Ordering::SeqCst);
        self.handle = Some(spawn_heartbeat(
            interval_ms,
            tx,
            seq,
            self.acked.clone(),
            self.lost.clone(),
        ));
    }

    fn ack(&self) {
        self.acked.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Discord bot session
pub struct DiscordClient {
    config: DiscordConfig,
    http: reqwest::Client,
    /// Bot user id, learned from `/users/@me` or READY
    self_id: RwLock<Option<String>>,
    /// Last dispatch sequence number, echoed in heartbeats
    seq: Arc<Mutex<Option<u64>>>,
}

impl DiscordClient {
    /// Create a client from config; no network I/O happens here
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(ChannelError::NotConfigured(
                "Discord token not configured".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChannelError::Error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            http,
            self_id: RwLock::new(None),
            seq: Arc::new(Mutex::new(None)),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.token)
    }

    async fn post_message(&self, channel_id: &str, body: serde_json::Value) -> Result<Message> {
        if channel_id.is_empty() {
            return Err(ChannelError::ApiError(
                "cannot send a message without a channel id".to_string(),
            ));
        }

        let url = self.endpoint(&format!("/channels/{}/messages", channel_id));
        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Request failed: {}", e)))?;

        check_status(response)
            .await?
            .json::<Message>()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Invalid message response: {}", e)))
    }

    /// Connect-and-read loop for a single gateway connection
    async fn run_session(
        &self,
        ws: GatewayStream,
        events: &mpsc::Sender<PlatformEvent>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let (mut write, mut read) = ws.split();

        // Heartbeats and IDENTIFY are written from more than one task
        let (tx, mut rx) = mpsc::channel::<WsMessage>(32);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        let mut heartbeat = Heartbeat::new();
        let heartbeat_lost = heartbeat.lost.clone();
        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(SessionEnd::Cancelled),
                _ = heartbeat_lost.cancelled() => {
                    break Ok(SessionEnd::Reconnect("heartbeat not acknowledged".to_string()))
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match self.handle_gateway_message(&text, &tx, events, &mut heartbeat).await {
                            Ok(Some(end)) => break Ok(end),
                            Ok(None) => {}
                            Err(e) => error!("Error handling gateway message: {}", e),
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => break close_outcome(frame),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Ok(SessionEnd::Reconnect(format!("WebSocket error: {}", e))),
                    None => break Ok(SessionEnd::Reconnect("stream ended".to_string())),
                }
            }
        };

        heartbeat.stop();
        drop(tx);
        let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;

        end
    }

    async fn handle_gateway_message(
        &self,
        text: &str,
        tx: &mpsc::Sender<WsMessage>,
        events: &mpsc::Sender<PlatformEvent>,
        heartbeat: &mut Heartbeat,
    ) -> Result<Option<SessionEnd>> {
        let payload: GatewayPayload = serde_json::from_str(text)
            .map_err(|e| ChannelError::Error(format!("Failed to parse payload: {}", e)))?;

        if let Some(s) = payload.s {
            *self.seq.lock().await = Some(s);
        }

        match GatewayOp::from_u8(payload.op) {
            Some(GatewayOp::Hello) => {
                let interval_ms = payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_HEARTBEAT_MS);

                heartbeat.start(interval_ms, tx.clone(), self.seq.clone());

                let identify = serde_json::json!({
                    "op": GatewayOp::Identify as u8,
                    "d": {
                        "token": self.config.token,
                        "intents": self.config.intents,
                        "properties": {
                            "os": std::env::consts::OS,
                            "browser": "bytebot",
                            "device": "bytebot"
                        }
                    }
                });
                tx.send(WsMessage::Text(identify.to_string()))
                    .await
                    .map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
            }
            Some(GatewayOp::Heartbeat) => {
                let seq = *self.seq.lock().await;
                tx.send(WsMessage::Text(heartbeat_payload(seq)))
                    .await
                    .map_err(|e| ChannelError::ConnectionError(e.to_string()))?;
            }
            Some(GatewayOp::HeartbeatAck) => {
                trace!("Discord heartbeat acknowledged");
                heartbeat.ack();
            }
            Some(GatewayOp::Dispatch) => {
                let Some(d) = payload.d else {
                    return Ok(None);
                };
                let event = match payload.t.as_deref() {
                    Some("READY") => {
                        let user_id = d
                            .get("user")
                            .and_then(|u| u.get("id"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        info!(user_id = %user_id, "Discord gateway READY");
                        *self.self_id.write() = Some(user_id.clone());
                        PlatformEvent::Ready { user_id }
                    }
                    Some("MESSAGE_CREATE") => {
                        let msg: Message = serde_json::from_value(d).map_err(|e| {
                            ChannelError::Error(format!("Failed to parse message: {}", e))
                        })?;
                        PlatformEvent::MessageCreate(msg)
                    }
                    other => {
                        trace!(event = ?other, "Ignoring Discord dispatch");
                        return Ok(None);
                    }
                };
                if events.send(event).await.is_err() {
                    return Ok(Some(SessionEnd::EventsClosed));
                }
            }
            Some(GatewayOp::Reconnect) => {
                info!("Discord requested reconnect");
                return Ok(Some(SessionEnd::Reconnect("requested by server".to_string())));
            }
            Some(GatewayOp::InvalidSession) => {
                warn!("Discord invalid session");
                *self.seq.lock().await = None;
                return Ok(Some(SessionEnd::Reconnect("invalid session".to_string())));
            }
            _ => debug!(op = payload.op, "Unhandled gateway opcode"),
        }
        Ok(None)
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    fn name(&self) -> &str {
        "discord"
    }

    fn self_user_id(&self) -> Option<String> {
        self.self_id.read().clone()
    }

    async fn verify(&self) -> Result<User> {
        let response = self
            .http
            .get(self.endpoint("/users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionError(format!("Discord unreachable: {}", e)))?;

        let user: User = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ChannelError::ApiError(format!("Invalid user response: {}", e)))?;

        info!(user_id = %user.id, username = %user.username, "Verified Discord session");
        *self.self_id.write() = Some(user.id.clone());
        Ok(user)
    }

    async fn run(
        &self,
        events: mpsc::Sender<PlatformEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut reconnect_delay = INITIAL_RECONNECT_SECS;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            info!("Connecting to Discord gateway...");
            match tokio_tungstenite::connect_async(self.config.gateway_url.as_str()).await {
                Ok((ws, _)) => {
                    info!("Connected to Discord gateway");
                    reconnect_delay = INITIAL_RECONNECT_SECS;

                    match self.run_session(ws, &events, &cancel).await? {
                        SessionEnd::Cancelled => break,
                        SessionEnd::EventsClosed => {
                            info!("Event receiver closed, ending Discord session");
                            break;
                        }
                        SessionEnd::Reconnect(reason) => {
                            warn!(reason = %reason, "Discord session ended");
                        }
                    }
                }
                Err(e) => {
                    warn!("Discord connection failed: {}", e);
                }
            }

            info!("Reconnecting to Discord in {} seconds...", reconnect_delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(reconnect_delay)) => {}
            }
            reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_SECS);
        }

        info!("Discord session stopped");
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<Message> {
        self.post_message(channel_id, serde_json::json!({ "content": content }))
            .await
    }

    async fn send_reply(
        &self,
        channel_id: &str,
        content: &str,
        reference: &MessageReference,
        mention_author: bool,
    ) -> Result<Message> {
        let body = serde_json::json!({
            "content": content,
            "message_reference": reference,
            "allowed_mentions": {
                "parse": ["users"],
                "replied_user": mention_author
            }
        });
        self.post_message(channel_id, body).await
    }
}

fn heartbeat_payload(seq: Option<u64>) -> String {
    serde_json::json!({ "op": GatewayOp::Heartbeat as u8, "d": seq }).to_string()
}

fn spawn_heartbeat(
    interval_ms: u64,
    tx: mpsc::Sender<WsMessage>,
    seq: Arc<Mutex<Option<u64>>>,
    acked: Arc<AtomicBool>,
    lost: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(interval_ms));
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if !acked.swap(false, Ordering::SeqCst) {
                warn!("Discord heartbeat not acknowledged, connection is stale");
                lost.cancel();
                break;
            }
            let current = *seq.lock().await;
            if tx.send(WsMessage::Text(heartbeat_payload(current))).await.is_err() {
                break;
            }
        }
    })
}

fn close_outcome(frame: Option<CloseFrame<'static>>) -> Result<SessionEnd> {
    let code = frame.as_ref().map(|f| u16::from(f.code));
    match code {
        Some(CLOSE_AUTHENTICATION_FAILED) => Err(ChannelError::AuthError(
            "Discord rejected the bot token (close code 4004)".to_string(),
        )),
        Some(CLOSE_DISALLOWED_INTENTS) => Err(ChannelError::InvalidConfig(
            "Discord rejected the requested intents (close code 4014)".to_string(),
        )),
        _ => {
            warn!(code = ?code, "Discord WebSocket closed");
            Ok(SessionEnd::Reconnect(format!("closed by server ({:?})", code)))
        }
    }
}

/// Map a non-success REST response to a [`ChannelError`]; sends are never retried
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        return Err(ChannelError::ApiError(format!(
            "Discord rate limited (retry after {}s)",
            retry_after
        )));
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ChannelError::AuthError(format!(
            "Discord rejected the bot token: {}",
            error_text
        )));
    }

    Err(ChannelError::ApiError(format!(
        "Discord API error: {} - {}",
        status, error_text
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn config(api_base: &str) -> DiscordConfig {
        DiscordConfig {
            token: "test_token".to_string(),
            api_base: api_base.to_string(),
            ..DiscordConfig::default()
        }
    }

    #[test]
    fn test_new_requires_token() {
        let err = DiscordClient::new(&DiscordConfig::default()).err().unwrap();
        assert!(matches!(err, ChannelError::NotConfigured(_)));

        let client = DiscordClient::new(&config("http://localhost")).unwrap();
        assert_eq!(client.name(), "discord");
        assert!(client.self_user_id().is_none());
    }

    #[test]
    fn test_gateway_op_from_u8() {
        assert_eq!(GatewayOp::from_u8(0), Some(GatewayOp::Dispatch));
        assert_eq!(GatewayOp::from_u8(10), Some(GatewayOp::Hello));
        assert_eq!(GatewayOp::from_u8(255), None);
    }

    #[test]
    fn test_close_codes() {
        let frame = |code: u16| {
            Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            })
        };

        assert!(matches!(
            close_outcome(frame(4004)),
            Err(ChannelError::AuthError(_))
        ));
        assert!(matches!(
            close_outcome(frame(4014)),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(matches!(
            close_outcome(frame(4000)),
            Ok(SessionEnd::Reconnect(_))
        ));
        assert!(matches!(close_outcome(None), Ok(SessionEnd::Reconnect(_))));
    }

    #[test]
    fn test_heartbeat_payload() {
        let parse = |raw: String| serde_json::from_str::<serde_json::Value>(&raw).unwrap();
        assert_eq!(
            parse(heartbeat_payload(None)),
            serde_json::json!({ "op": 1, "d": null })
        );
        assert_eq!(
            parse(heartbeat_payload(Some(42))),
            serde_json::json!({ "op": 1, "d": 42 })
        );
    }

    #[tokio::test]
    async fn test_missed_heartbeat_ack_marks_connection_lost() {
        let (tx, mut rx) = mpsc::channel(8);
        let seq = Arc::new(Mutex::new(Some(7)));
        let mut heartbeat = Heartbeat::new();
        heartbeat.start(20, tx, seq);

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("first heartbeat in time")
            .expect("heartbeat sent");
        let WsMessage::Text(text) = first else {
            panic!("expected a text frame, got {:?}", first);
        };
        let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(payload["d"], 7);

        // No ACK for the first beat, so the next one gives up
        tokio::time::timeout(Duration::from_secs(2), heartbeat.lost.cancelled())
            .await
            .expect("stale connection detected");
        heartbeat.stop();
    }

    #[tokio::test]
    async fn test_acknowledged_heartbeats_keep_connection() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut heartbeat = Heartbeat::new();
        heartbeat.start(100, tx, Arc::new(Mutex::new(None)));

        for _ in 0..3 {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("heartbeat in time")
                .expect("heartbeat sent");
            heartbeat.ack();
        }
        assert!(!heartbeat.lost.is_cancelled());
        heartbeat.stop();
    }

    #[tokio::test]
    async fn test_verify_records_self_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/@me")
            .match_header("authorization", "Bot test_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"bot1","username":"bytebot","bot":true,"avatar":null}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&config(&server.url())).unwrap();
        let user = client.verify().await.unwrap();

        assert_eq!(user.id, "bot1");
        assert!(user.bot);
        assert_eq!(client.self_user_id().as_deref(), Some("bot1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_verify_bad_token_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/@me")
            .with_status(401)
            .with_body(r#"{"message":"401: Unauthorized","code":0}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&config(&server.url())).unwrap();
        let err = client.verify().await.unwrap_err();
        assert!(matches!(err, ChannelError::AuthError(_)));
        assert!(client.self_user_id().is_none());
    }

    #[tokio::test]
    async fn test_send_message_posts_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/channels/c1/messages")
            .match_header("authorization", "Bot test_token")
            .match_body(Matcher::Json(serde_json::json!({ "content": "pong" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"m2","channel_id":"c1","content":"pong"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&config(&server.url())).unwrap();
        let sent = client.send_message("c1", "pong").await.unwrap();

        assert_eq!(sent.id, "m2");
        assert_eq!(sent.channel_id, "c1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_reply_carries_reference_and_mention() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/channels/c1/messages")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "content": "pong",
                "message_reference": {
                    "message_id": "m1",
                    "channel_id": "c1",
                    "guild_id": "g1"
                },
                "allowed_mentions": { "replied_user": true }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"m2","channel_id":"c1"}"#)
            .create_async()
            .await;

        let client = DiscordClient::new(&config(&server.url())).unwrap();
        let reference = MessageReference {
            message_id: "m1".to_string(),
            channel_id: "c1".to_string(),
            guild_id: "g1".to_string(),
        };
        client
            .send_reply("c1", "pong", &reference, true)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/channels/c1/messages")
            .with_status(429)
            .with_header("retry-after", "2")
            .with_body(r#"{"message":"You are being rate limited.","retry_after":2.0}"#)
            .expect(1)
            .create_async()
            .await;

        let client = DiscordClient::new(&config(&server.url())).unwrap();
        let err = client.send_message("c1", "pong").await.unwrap_err();

        assert!(matches!(err, ChannelError::ApiError(_)));
        assert!(err.to_string().contains("rate limited"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_without_channel_fails_locally() {
        let client = DiscordClient::new(&config("http://127.0.0.1:1")).unwrap();
        let err = client.send_message("", "pong").await.unwrap_err();
        assert!(matches!(err, ChannelError::ApiError(_)));
    }
}
