use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use beacon_types::gateway::{
    GatewayPayload, Hello, Identify, IdentifyProperties, Resume, intents, opcode,
};
use beacon_types::status::Snowflake;

use crate::cache::PresenceCache;
use crate::dispatch::{Action, DispatchHandler};
use crate::error::GatewayError;
use crate::source::SourceEvent;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
const DISCOVERY_URL: &str = "https://discord.com/api/v10/gateway/bot";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

/// Gap between queued outbound requests. The gateway allows 120 sends per
/// minute; this leaves room for heartbeats.
const OUTBOUND_SPACING: Duration = Duration::from_millis(600);

/// Close codes after which reconnecting cannot help.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Close codes that invalidate the session but allow a fresh identify.
const REIDENTIFY_CLOSE_CODES: &[u16] = &[4007, 4009];

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub target: Snowflake,
    /// Skip discovery and connect here
    pub url: Option<String>,
    pub intents: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl GatewayConfig {
    pub fn new(token: impl Into<String>, target: Snowflake) -> Self {
        let token = token.into();
        let token = token.strip_prefix("Bot ").unwrap_or(&token).to_string();
        Self {
            token,
            target,
            url: None,
            intents: intents::GUILDS | intents::GUILD_MEMBERS | intents::GUILD_PRESENCES,
            initial_backoff: INITIAL_RECONNECT_DELAY,
            max_backoff: MAX_RECONNECT_DELAY,
        }
    }
}

/// How a session ended, when it did not end in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Resume,
    Reidentify,
}

/// Exponential reconnect delay. Only a session that got through the
/// handshake resets it.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self, established: bool) -> Duration {
        if established {
            self.current = self.initial;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Requests the gateway rate limits, sent one per `spacing`.
struct OutboundQueue {
    pending: VecDeque<GatewayPayload>,
    spacing: Duration,
    next_send: Instant,
}

impl OutboundQueue {
    fn new(spacing: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            spacing,
            next_send: Instant::now(),
        }
    }

    fn push(&mut self, payload: GatewayPayload) {
        self.pending.push_back(payload);
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for the next send slot and take the oldest request. Cancel-safe:
    /// nothing is dequeued until the slot has arrived.
    async fn next(&mut self) -> Option<GatewayPayload> {
        tokio::time::sleep_until(self.next_send).await;
        let payload = self.pending.pop_front()?;
        self.next_send = Instant::now() + self.spacing;
        Some(payload)
    }
}

#[derive(Deserialize)]
struct GatewayBot {
    url: String,
}

/// Discord gateway client. Keeps the presence cache current and reports
/// source events to the watcher, reconnecting for as long as the watcher
/// is listening.
pub struct GatewayClient {
    config: GatewayConfig,
    handler: DispatchHandler,
    events: mpsc::Sender<SourceEvent>,
    seq: Option<u64>,
    /// Current session saw READY or RESUMED
    established: bool,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, cache: PresenceCache, events: mpsc::Sender<SourceEvent>) -> Self {
        let handler = DispatchHandler::new(cache, config.target);
        Self {
            config,
            handler,
            events,
            seq: None,
            established: false,
        }
    }

    /// Run until the watcher goes away or Discord rejects us for good.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let base_url = match &self.config.url {
            Some(url) => url.clone(),
            None => match discover_gateway_url(&self.config.token).await {
                Ok(url) => url,
                Err(e) => {
                    warn!("Gateway discovery failed, using default URL: {}", e);
                    DEFAULT_GATEWAY_URL.to_string()
                }
            },
        };

        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            self.established = false;
            let url = self
                .handler
                .session()
                .and_then(|s| s.resume_url.clone())
                .unwrap_or_else(|| base_url.clone());

            match self.run_session(&gateway_url(&url)).await {
                Ok(SessionEnd::Resume) => {
                    info!("Gateway session interrupted, will resume");
                }
                Ok(SessionEnd::Reidentify) => {
                    info!("Gateway session invalidated, will identify again");
                    self.handler.forget_session();
                    self.seq = None;
                }
                Err(GatewayError::ReceiverDropped) => {
                    info!("Presence watcher stopped, closing gateway client");
                    return Ok(());
                }
                Err(e @ GatewayError::Fatal { .. }) => {
                    error!("{}", e);
                    self.events.send(SourceEvent::Disconnected).await.ok();
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Gateway connection failed");
                }
            }

            if self.events.send(SourceEvent::Disconnected).await.is_err() {
                return Ok(());
            }

            let delay = backoff.next_delay(self.established);
            info!("Reconnecting to gateway in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_session(&mut self, url: &str) -> Result<SessionEnd, GatewayError> {
        debug!("Connecting to {}", url);
        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| GatewayError::Timeout("gateway connection"))??;
        let (mut sender, mut receiver) = socket.split();

        let hello = tokio::time::timeout(HELLO_TIMEOUT, wait_for_hello(&mut receiver))
            .await
            .map_err(|_| GatewayError::Timeout("Hello"))??;

        let handshake = match self.handler.session() {
            Some(session) => {
                info!("Resuming gateway session {}", session.id);
                GatewayPayload::new(
                    opcode::RESUME,
                    Resume {
                        token: self.config.token.clone(),
                        session_id: session.id.clone(),
                        seq: self.seq,
                    },
                )?
            }
            None => {
                info!("Identifying with gateway");
                GatewayPayload::new(
                    opcode::IDENTIFY,
                    Identify {
                        token: self.config.token.clone(),
                        intents: self.config.intents,
                        properties: IdentifyProperties {
                            os: std::env::consts::OS.to_string(),
                            browser: "beacon".to_string(),
                            device: "beacon".to_string(),
                        },
                    },
                )?
            }
        };
        send(&mut sender, &handshake).await?;

        // First beat is jittered so a fleet of restarts doesn't beat in lockstep
        let period = Duration::from_millis(hello.heartbeat_interval);
        let jitter = period.mul_f64(rand::random::<f64>());
        let mut heartbeat = tokio::time::interval_at(Instant::now() + jitter, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut acked = true;
        let mut outbound = OutboundQueue::new(OUTBOUND_SPACING);

        loop {
            tokio::select! {
                frame = receiver.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Resume);
                    };
                    match frame? {
                        Message::Text(text) => {
                            let payload = match serde_json::from_str::<GatewayPayload>(&text) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(
                                        "Undecodable gateway frame: {} -- raw: {}",
                                        e,
                                        text.chars().take(200).collect::<String>()
                                    );
                                    continue;
                                }
                            };
                            if let Some(end) = self.handle_payload(payload, &mut sender, &mut outbound, &mut acked).await? {
                                return Ok(end);
                            }
                        }
                        Message::Close(frame) => return close_outcome(frame),
                        _ => {}
                    }
                }
                _ = heartbeat.tick() => {
                    if !acked {
                        warn!("Heartbeat not acknowledged, dropping zombied connection");
                        return Ok(SessionEnd::Resume);
                    }
                    acked = false;
                    send(&mut sender, &GatewayPayload::heartbeat(self.seq)).await?;
                }
                Some(out) = outbound.next(), if !outbound.is_empty() => {
                    send(&mut sender, &out).await?;
                }
            }
        }
    }

    async fn handle_payload(
        &mut self,
        payload: GatewayPayload,
        sender: &mut SplitSink<Socket, Message>,
        outbound: &mut OutboundQueue,
        acked: &mut bool,
    ) -> Result<Option<SessionEnd>, GatewayError> {
        if let Some(seq) = payload.s {
            self.seq = Some(seq);
        }

        match payload.op {
            opcode::DISPATCH => {
                let Some(event) = payload.t else {
                    return Ok(None);
                };
                trace!("Dispatch {}", event);
                if event == "READY" || event == "RESUMED" {
                    self.established = true;
                }
                let actions = match self.handler.handle(&event, payload.d) {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!("Failed to decode {} dispatch: {}", event, e);
                        return Ok(None);
                    }
                };
                for action in actions {
                    match action {
                        Action::Emit(event) => self
                            .events
                            .send(event)
                            .await
                            .map_err(|_| GatewayError::ReceiverDropped)?,
                        Action::Send(out) => outbound.push(out),
                    }
                }
            }
            opcode::HEARTBEAT => {
                send(sender, &GatewayPayload::heartbeat(self.seq)).await?;
            }
            opcode::HEARTBEAT_ACK => {
                *acked = true;
            }
            opcode::RECONNECT => {
                info!("Gateway requested reconnect");
                return Ok(Some(SessionEnd::Resume));
            }
            opcode::INVALID_SESSION => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                warn!("Gateway reported invalid session (resumable: {})", resumable);
                return Ok(Some(if resumable {
                    SessionEnd::Resume
                } else {
                    SessionEnd::Reidentify
                }));
            }
            other => {
                trace!("Ignoring gateway opcode {}", other);
            }
        }

        Ok(None)
    }
}

async fn wait_for_hello(receiver: &mut SplitStream<Socket>) -> Result<Hello, GatewayError> {
    while let Some(frame) = receiver.next().await {
        if let Message::Text(text) = frame? {
            let payload: GatewayPayload = serde_json::from_str(&text)?;
            if payload.op == opcode::HELLO {
                return Ok(serde_json::from_value(payload.d)?);
            }
            return Err(GatewayError::Protocol(format!(
                "expected Hello, got opcode {}",
                payload.op
            )));
        }
    }
    Err(GatewayError::Protocol("connection closed before Hello".into()))
}

async fn send(
    sender: &mut SplitSink<Socket, Message>,
    payload: &GatewayPayload,
) -> Result<(), GatewayError> {
    let text = serde_json::to_string(payload)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn discover_gateway_url(token: &str) -> Result<String, GatewayError> {
    let bot: GatewayBot = reqwest::Client::new()
        .get(DISCOVERY_URL)
        .header("Authorization", format!("Bot {}", token))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(bot.url)
}

fn gateway_url(base: &str) -> String {
    format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
}

fn close_outcome(frame: Option<CloseFrame>) -> Result<SessionEnd, GatewayError> {
    let Some(frame) = frame else {
        return Ok(SessionEnd::Resume);
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.as_str().to_string();
    info!("Gateway closed connection: {} {}", code, reason);

    if FATAL_CLOSE_CODES.contains(&code) {
        Err(GatewayError::Fatal { code, reason })
    } else if REIDENTIFY_CLOSE_CODES.contains(&code) {
        Ok(SessionEnd::Reidentify)
    } else {
        Ok(SessionEnd::Resume)
    }
}
