//! Duplex channel abstraction
//!
//! A [`Transport`] opens a [`Channel`]: an outbound command queue plus a
//! stream of typed [`ChannelEvent`]s. Dropping the channel unsubscribes
//! from its events and tears the connection down.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SessionConfig;
use crate::error::NetworkError;

/// Frames queued for the writer before `send` starts refusing them
/// (about three seconds of 100 ms capture chunks)
pub const OUTBOUND_QUEUE: usize = 32;

/// Notifications from an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel can carry frames
    Ready,
    /// Binary frame
    Message(Bytes),
    /// Text frame
    Text(String),
    /// Transport error; the channel stays up until `Closed`
    Error(String),
    Closed { code: u16, reason: String },
}

/// Commands to the channel's writer
#[derive(Debug)]
pub enum Outbound {
    Binary {
        data: Bytes,
        /// Completed once the frame has been written
        ack: Option<oneshot::Sender<Result<(), NetworkError>>>,
    },
    Close {
        code: u16,
    },
}

/// One open duplex channel
#[derive(Debug)]
pub struct Channel {
    outbound: mpsc::Sender<Outbound>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Task pumping the underlying connection, aborted on drop
    task: Option<JoinHandle<()>>,
}

impl Channel {
    pub fn new(
        outbound: mpsc::Sender<Outbound>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            events,
            task,
        }
    }

    /// Queue one binary frame without waiting. A stalled writer makes
    /// this fail with `QueueFull` instead of growing the queue.
    pub fn send(&self, data: Bytes) -> Result<(), NetworkError> {
        self.outbound
            .try_send(Outbound::Binary { data, ack: None })
            .map_err(|e| match e {
                TrySendError::Full(_) => NetworkError::QueueFull,
                TrySendError::Closed(_) => NetworkError::NotOpen,
            })
    }

    /// Send one binary frame and wait until it has been written
    pub async fn send_confirmed(&self, data: Bytes) -> Result<(), NetworkError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.outbound
            .send(Outbound::Binary {
                data,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| NetworkError::NotOpen)?;
        ack_rx
            .await
            .map_err(|_| NetworkError::SendFailed("channel dropped before write".into()))?
    }

    /// Ask the peer to close; waits for room behind queued frames
    pub async fn close(&self, code: u16) {
        let _ = self.outbound.send(Outbound::Close { code }).await;
    }

    /// Next event; `None` once the connection task has gone away
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens channels to the remote peer
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start opening a channel. The returned channel reports
    /// [`ChannelEvent::Ready`] once frames can be sent.
    async fn open(&self, config: &SessionConfig) -> Result<Channel, NetworkError>;
}
