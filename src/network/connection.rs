//! Connection manager
//!
//! Owns the single channel of a session, performs the mode handshake and
//! reconnects after an abnormal close.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ready + mode byte──▶ Open
//!                        │ timeout / error                │ close code != 1000
//!                        ▼                                ▼
//!                      Closed ◀──code 1000 / close()── Reconnecting ──5s──▶ Connecting
//! ```
//!
//! The manager is driven by [`ConnectionManager::next_event`]; every
//! pending operation lives inside the manager, so dropping that future
//! part-way never loses a scheduled reconnect.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Sleep};

use crate::config::{ConnectionConfig, SessionConfig};
use crate::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::error::NetworkError;
use crate::network::transport::{Channel, ChannelEvent, Transport};
use crate::protocol::{Frame, MediaMode};

/// How long `close` waits for the peer to acknowledge
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Reconnecting,
    Closed,
}

/// What the session sees from the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Binary frame from the peer
    Inbound(Bytes),
    /// Transport or reconnect error, surfaced to the user
    Error(String),
    /// The channel dropped abnormally; a fresh one follows after `delay`
    Reconnecting { code: u16, delay: Duration },
    /// A reconnect completed its handshake
    Reconnected,
    /// The session's channel is gone for good
    Ended { code: u16 },
}

type Establishing = BoxFuture<'static, Result<Channel, NetworkError>>;

pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    timing: ConnectionConfig,
    state: ConnectionState,
    /// Mode and endpoint of the current session, reused on reconnect
    target: Option<(MediaMode, SessionConfig)>,
    channel: Option<Channel>,
    /// The one pending reconnect timer
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    /// A reconnect handshake in flight
    establishing: Option<Establishing>,
    /// Cleared by a normal close or `close()`
    active: bool,
    reconnects: u64,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, timing: ConnectionConfig) -> Self {
        Self {
            transport,
            timing,
            state: ConnectionState::Idle,
            target: None,
            channel: None,
            reconnect_timer: None,
            establishing: None,
            active: false,
            reconnects: 0,
        }
    }

    /// Open the channel and send the mode byte as its first frame
    pub async fn connect(&mut self, mode: MediaMode, config: SessionConfig) -> Result<(), NetworkError> {
        self.shutdown_pending();
        self.channel = None;
        self.target = Some((mode, config.clone()));
        self.active = true;
        self.state = ConnectionState::Connecting;

        let result = establish(
            self.transport.clone(),
            mode,
            config,
            self.timing.connect_timeout(),
        )
        .await;

        match result {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = ConnectionState::Open;
                Ok(())
            }
            Err(e) => {
                self.active = false;
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    /// Queue one outbound chunk; fails unless the channel is open
    pub fn send_chunk(&self, data: Bytes) -> Result<(), NetworkError> {
        match (&self.state, &self.channel) {
            (ConnectionState::Open, Some(channel)) => channel.send(data),
            _ => Err(NetworkError::NotOpen),
        }
    }

    /// Wait for the next event worth reporting.
    ///
    /// Returns `None` when there is nothing left to wait for: no channel
    /// and no reconnect pending.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        loop {
            if self.channel.is_none() && self.reconnect_timer.is_none() && self.establishing.is_none() {
                return None;
            }

            tokio::select! {
                event = channel_event(&mut self.channel) => {
                    if let Some(event) = self.on_channel_event(event) {
                        return Some(event);
                    }
                }
                _ = timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.begin_reconnect();
                }
                result = handshake(&mut self.establishing) => {
                    self.establishing = None;
                    return Some(self.on_reconnect_result(result));
                }
            }
        }
    }

    /// Close with the normal code and cancel any pending reconnect; idempotent
    pub async fn close(&mut self) {
        self.active = false;
        self.shutdown_pending();

        if let Some(mut channel) = self.channel.take() {
            if self.state == ConnectionState::Open {
                self.state = ConnectionState::Closing;
                let acknowledged = tokio::time::timeout(CLOSE_GRACE, async {
                    channel.close(CLOSE_NORMAL).await;
                    while let Some(event) = channel.next_event().await {
                        if matches!(event, ChannelEvent::Closed { .. }) {
                            break;
                        }
                    }
                })
                .await;
                if acknowledged.is_err() {
                    tracing::debug!("Peer did not acknowledge close");
                }
            }
        }

        if self.state != ConnectionState::Closed && self.state != ConnectionState::Idle {
            tracing::info!("Connection closed");
        }
        self.state = ConnectionState::Closed;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some() || self.establishing.is_some()
    }

    /// Reconnect attempts made this session
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    fn on_channel_event(&mut self, event: Option<ChannelEvent>) -> Option<ConnectionEvent> {
        match event {
            Some(ChannelEvent::Message(data)) => Some(ConnectionEvent::Inbound(data)),
            Some(ChannelEvent::Text(text)) => {
                tracing::debug!("Ignoring text frame ({} bytes)", text.len());
                None
            }
            Some(ChannelEvent::Ready) => None,
            Some(ChannelEvent::Error(e)) => {
                tracing::warn!("Channel error: {}", e);
                Some(ConnectionEvent::Error(e))
            }
            Some(ChannelEvent::Closed { code, reason }) => {
                tracing::info!("Channel closed: code {} {}", code, reason);
                self.channel = None;
                Some(self.on_close(code))
            }
            None => {
                self.channel = None;
                Some(self.on_close(CLOSE_ABNORMAL))
            }
        }
    }

    fn on_close(&mut self, code: u16) -> ConnectionEvent {
        if code != CLOSE_NORMAL && self.active {
            self.schedule_reconnect();
            return ConnectionEvent::Reconnecting {
                code,
                delay: self.timing.reconnect_delay(),
            };
        }

        self.active = false;
        self.state = ConnectionState::Closed;
        ConnectionEvent::Ended { code }
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_pending() {
            tracing::debug!("Reconnect already pending");
            return;
        }
        let delay = self.timing.reconnect_delay();
        tracing::info!("Reconnecting in {:?}", delay);
        self.state = ConnectionState::Reconnecting;
        self.reconnect_timer = Some(Box::pin(sleep(delay)));
    }

    fn begin_reconnect(&mut self) {
        let Some((mode, config)) = self.target.clone() else {
            self.state = ConnectionState::Closed;
            return;
        };
        if !self.active {
            return;
        }

        self.reconnects += 1;
        self.state = ConnectionState::Connecting;
        tracing::info!("Reconnect attempt {} to {}", self.reconnects, config.url());
        self.establishing = Some(Box::pin(establish(
            self.transport.clone(),
            mode,
            config,
            self.timing.connect_timeout(),
        )));
    }

    fn on_reconnect_result(&mut self, result: Result<Channel, NetworkError>) -> ConnectionEvent {
        match result {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = ConnectionState::Open;
                tracing::info!("Reconnected");
                ConnectionEvent::Reconnected
            }
            Err(e) => {
                tracing::warn!("Reconnect failed: {}", e);
                self.state = ConnectionState::Closed;
                self.schedule_reconnect();
                ConnectionEvent::Error(e.to_string())
            }
        }
    }

    fn shutdown_pending(&mut self) {
        self.reconnect_timer = None;
        self.establishing = None;
    }
}

/// Open a channel, wait for it to become ready and send the mode byte
async fn establish<T: Transport>(
    transport: Arc<T>,
    mode: MediaMode,
    config: SessionConfig,
    timeout: Duration,
) -> Result<Channel, NetworkError> {
    tracing::info!("Connecting to {} ({} mode)", config.url(), mode);

    let opened = tokio::time::timeout(timeout, async {
        let mut channel = transport.open(&config).await?;
        wait_ready(&mut channel).await?;
        Ok::<_, NetworkError>(channel)
    })
    .await;

    let channel = match opened {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!("Connection to {} timed out after {:?}", config.url(), timeout);
            return Err(NetworkError::ConnectTimeout(timeout));
        }
    };

    channel.send_confirmed(Frame::ModeSelect(mode).encode()).await?;
    tracing::info!("Connected, mode {} selected", mode);
    Ok(channel)
}

async fn wait_ready(channel: &mut Channel) -> Result<(), NetworkError> {
    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Ready) => return Ok(()),
            Some(ChannelEvent::Error(e)) => return Err(NetworkError::ChannelError(e)),
            Some(ChannelEvent::Closed { code, reason }) => {
                return Err(NetworkError::ChannelError(format!(
                    "closed before ready (code {}) {}",
                    code, reason
                )));
            }
            Some(other) => tracing::debug!("Event before ready: {:?}", other),
            None => return Err(NetworkError::ChannelError("channel dropped".into())),
        }
    }
}

async fn channel_event(channel: &mut Option<Channel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

async fn timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn handshake(establishing: &mut Option<Establishing>) -> Result<Channel, NetworkError> {
    match establishing {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}
