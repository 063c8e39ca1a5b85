//! Persistent Socket.IO connection with heartbeat and reconnection.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ConnectionError;
use crate::types::ClientEvent;
use crate::wire::{self, Handshake, Inbound, Packet};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

const LOG_TARGET: &str = "trivia::connection";
const COMMAND_CAPACITY: usize = 64;

/// Websocket URL of a Socket.IO server.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Accepts `http://` or `ws://` base URLs. An optional path prefix is
    /// kept, so `http://host/trivia` maps to `ws://host/trivia/socket.io/`.
    pub fn parse(base: &str, query: &BTreeMap<String, String>) -> Result<Self, ConnectionError> {
        let mut url = Url::parse(base.trim())?;
        match url.scheme() {
            "http" | "ws" => {}
            other => return Err(ConnectionError::UnsupportedScheme(other.to_string())),
        }
        url.set_scheme("ws")
            .map_err(|()| ConnectionError::UnsupportedScheme(url.scheme().to_string()))?;

        let prefix = url.path().trim_end_matches('/').to_string();
        let path = if prefix.ends_with("/socket.io") {
            format!("{prefix}/")
        } else {
            format!("{prefix}/socket.io/")
        };
        url.set_path(&path);

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("EIO", "4").append_pair("transport", "websocket");
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.url.fmt(f)
    }
}

/// Exponential backoff with jitter between reconnection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub enabled: bool,
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub randomization_factor: f64,
}

impl Backoff {
    /// Delay before `attempt` (1-based). `roll` in `[-1, 1]` picks where in
    /// the jitter window the delay lands.
    pub fn delay(&self, attempt: u32, roll: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.base.saturating_mul(1u32 << exp).min(self.max);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        let jittered = raw.as_secs_f64() * (1.0 + factor * roll.clamp(-1.0, 1.0));
        Duration::from_secs_f64(jittered.max(0.0)).min(self.max)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt, rand::rng().random_range(-1.0..=1.0))
    }

    fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt <= self.attempts
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    pub backoff: Backoff,
    pub outbound_buffer: usize,
}

impl ConnectionConfig {
    /// Build from the client config. A fresh `clientId` is added to the
    /// handshake query for this process.
    pub fn from_client(config: &ClientConfig) -> Result<Self, ConnectionError> {
        let mut query = config.query.clone();
        query
            .entry("clientId".to_string())
            .or_insert_with(|| uuid::Uuid::new_v4().to_string());

        let reconnection = &config.reconnection;
        Ok(Self {
            endpoint: Endpoint::parse(&config.server_url, &query)?,
            connect_timeout: config.connect_timeout(),
            backoff: Backoff {
                enabled: reconnection.enabled,
                attempts: reconnection.attempts,
                base: Duration::from_millis(reconnection.delay_ms),
                max: Duration::from_millis(reconnection.delay_max_ms),
                randomization_factor: reconnection.randomization_factor,
            },
            outbound_buffer: config.outbound_buffer,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectReason {
    /// The server closed the namespace or the engine session.
    ServerDisconnect,
    /// We asked to disconnect.
    ClientDisconnect,
    TransportClose,
    TransportError(String),
    PingTimeout,
}

impl DisconnectReason {
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::ServerDisconnect | Self::ClientDisconnect)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerDisconnect => write!(f, "server disconnected us"),
            Self::ClientDisconnect => write!(f, "client disconnect"),
            Self::TransportClose => write!(f, "transport closed"),
            Self::TransportError(err) => write!(f, "transport error: {err}"),
            Self::PingTimeout => write!(f, "ping timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected { sid: Option<String> },
    Event(Inbound),
    Disconnected { reason: DisconnectReason },
    Reconnecting { attempt: u32, delay: Duration },
    ReconnectFailed { attempts: u32 },
    /// The server refused the namespace connect. No retry follows.
    ConnectError { message: String },
}

#[derive(Debug)]
enum Command {
    /// An encoded event frame.
    Emit(String),
    Disconnect,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// Queue an event. It is sent right away when connected, otherwise
    /// buffered until the next successful connect. Fails without queuing
    /// anything when the event can't be encoded.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        let frame = wire::encode_event(&event)?;
        self.cmd_tx
            .send(Command::Emit(frame))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    pub async fn disconnect(&self) -> Result<(), ConnectionError> {
        self.cmd_tx
            .send(Command::Disconnect)
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.cmd_tx.is_closed()
    }
}

pub struct Connection;

impl Connection {
    pub fn spawn(config: ConnectionConfig, events: mpsc::Sender<ConnectionEvent>) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let driver = Driver {
            config,
            commands: cmd_rx,
            events,
            outbox: VecDeque::new(),
        };
        tokio::spawn(driver.run());
        ConnectionHandle { cmd_tx }
    }
}

/// Outcome of waiting between attempts.
enum Wait {
    Elapsed,
    Stop,
}

struct Driver {
    config: ConnectionConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    outbox: VecDeque<String>,
}

impl Driver {
    async fn run(mut self) {
        info!(target: LOG_TARGET, url = %self.config.endpoint, "starting connection");
        let mut attempt = 0u32;

        loop {
            match self.connect().await {
                Ok((stream, handshake, sid)) => {
                    if attempt > 0 {
                        info!(target: LOG_TARGET, attempt, "reconnected");
                    }
                    attempt = 0;
                    if !self.report(ConnectionEvent::Connected { sid }).await {
                        break;
                    }
                    let reason = self.pump(stream, &handshake).await;
                    info!(target: LOG_TARGET, %reason, "disconnected");
                    let retry = reason.should_reconnect();
                    if !self.report(ConnectionEvent::Disconnected { reason }).await || !retry {
                        break;
                    }
                }
                Err(ConnectionError::Refused(message)) => {
                    warn!(target: LOG_TARGET, %message, "connect refused");
                    self.report(ConnectionEvent::ConnectError { message }).await;
                    break;
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to connect");
                }
            }

            attempt += 1;
            if !self.config.backoff.allows(attempt) {
                let attempts = attempt - 1;
                warn!(target: LOG_TARGET, attempts, "giving up on reconnection");
                self.report(ConnectionEvent::ReconnectFailed { attempts }).await;
                break;
            }
            let delay = self.config.backoff.next_delay(attempt);
            debug!(target: LOG_TARGET, attempt, delay_ms = delay.as_millis() as u64, "waiting before reconnect attempt");
            if !self.report(ConnectionEvent::Reconnecting { attempt, delay }).await {
                break;
            }
            if let Wait::Stop = self.wait(delay).await {
                self.report(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::ClientDisconnect,
                })
                .await;
                break;
            }
        }

        info!(target: LOG_TARGET, "connection task stopped");
    }

    /// Forward an event to the owner. `false` once nobody is listening.
    async fn report(&self, event: ConnectionEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn connect(&self) -> Result<(WsStream, Handshake, Option<String>), ConnectionError> {
        let limit = self.config.connect_timeout;
        timeout(limit, self.handshake())
            .await
            .map_err(|_| ConnectionError::Timeout(limit))?
    }

    async fn handshake(&self) -> Result<(WsStream, Handshake, Option<String>), ConnectionError> {
        let (mut stream, _) = connect_async(self.config.endpoint.as_str()).await?;

        let open = loop {
            match next_packet(&mut stream).await? {
                Packet::Open(handshake) => break handshake,
                Packet::Noop => {}
                other => {
                    return Err(ConnectionError::Handshake(format!(
                        "expected open packet, got {other:?}"
                    )));
                }
            }
        };
        debug!(target: LOG_TARGET, sid = %open.sid, ping_interval = open.ping_interval, "engine open");

        stream.send(Message::Text(wire::encode_connect(None))).await?;
        loop {
            match next_packet(&mut stream).await? {
                Packet::Connect { sid } => return Ok((stream, open, sid)),
                Packet::ConnectError { message } => return Err(ConnectionError::Refused(message)),
                Packet::Ping => stream.send(Message::Text(wire::PONG.to_string())).await?,
                Packet::Noop | Packet::Pong => {}
                Packet::Close | Packet::Disconnect => return Err(ConnectionError::Closed),
                other => debug!(target: LOG_TARGET, ?other, "ignoring packet before connect"),
            }
        }
    }

    async fn pump(&mut self, stream: WsStream, handshake: &Handshake) -> DisconnectReason {
        let (mut sink, mut source) = stream.split();

        while let Some(frame) = self.outbox.pop_front() {
            if let Err(reason) = send_frame(&mut sink, &frame).await {
                self.outbox.push_front(frame);
                return reason;
            }
        }

        let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let watchdog = sleep(liveness);
        tokio::pin!(watchdog);

        loop {
            tokio::select! {
                _ = &mut watchdog => {
                    warn!(target: LOG_TARGET, ?liveness, "no packet from server in time");
                    let _ = sink.close().await;
                    return DisconnectReason::PingTimeout;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Emit(frame)) => {
                        if let Err(reason) = send_frame(&mut sink, &frame).await {
                            self.buffer(frame);
                            return reason;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.send(Message::Text(wire::DISCONNECT.to_string())).await;
                        let _ = sink.close().await;
                        return DisconnectReason::ClientDisconnect;
                    }
                },
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        watchdog.as_mut().reset(Instant::now() + liveness);
                        match wire::decode(&text) {
                            Ok(Packet::Ping) => {
                                if let Err(err) = sink.send(Message::Text(wire::PONG.to_string())).await {
                                    return DisconnectReason::TransportError(err.to_string());
                                }
                            }
                            Ok(Packet::Event { name, data }) => match Inbound::from_parts(name, data) {
                                Ok(inbound) => {
                                    if !self.report(ConnectionEvent::Event(inbound)).await {
                                        let _ = sink.close().await;
                                        return DisconnectReason::ClientDisconnect;
                                    }
                                }
                                Err(err) => warn!(target: LOG_TARGET, error = %err, "dropping event"),
                            },
                            Ok(Packet::Disconnect | Packet::Close) => {
                                let _ = sink.close().await;
                                return DisconnectReason::ServerDisconnect;
                            }
                            Ok(packet) => debug!(target: LOG_TARGET, ?packet, "ignoring packet"),
                            Err(err) => warn!(target: LOG_TARGET, error = %err, "undecodable frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await.ok();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(target: LOG_TARGET, ?frame, "socket closed by server");
                        return DisconnectReason::TransportClose;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return DisconnectReason::TransportError(err.to_string()),
                    None => return DisconnectReason::TransportClose,
                }
            }
        }
    }

    /// Sleep out a backoff delay while still accepting commands.
    async fn wait(&mut self, delay: Duration) -> Wait {
        let pause = sleep(delay);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => return Wait::Elapsed,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Emit(frame)) => self.buffer(frame),
                    Some(Command::Disconnect) | None => return Wait::Stop,
                },
            }
        }
    }

    fn buffer(&mut self, frame: String) {
        if self.config.outbound_buffer == 0 {
            warn!(target: LOG_TARGET, %frame, "offline, dropping event");
            return;
        }
        while self.outbox.len() >= self.config.outbound_buffer {
            if let Some(dropped) = self.outbox.pop_front() {
                warn!(target: LOG_TARGET, %dropped, "outbound buffer full, dropping oldest event");
            }
        }
        self.outbox.push_back(frame);
    }
}

async fn next_packet(stream: &mut WsStream) -> Result<Packet, ConnectionError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(wire::decode(&text)?),
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

async fn send_frame(sink: &mut WsSink, frame: &str) -> Result<(), DisconnectReason> {
    debug!(target: LOG_TARGET, %frame, "emit");
    sink.send(Message::Text(frame.to_string()))
        .await
        .map_err(|err| DisconnectReason::TransportError(err.to_string()))
}
