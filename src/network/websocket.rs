//! WebSocket transport

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::config::SessionConfig;
use crate::constants::CLOSE_ABNORMAL;
use crate::error::NetworkError;
use crate::network::transport::{Channel, ChannelEvent, Outbound, Transport, OUTBOUND_QUEUE};

/// Close code reported when the peer's close frame carries no status
const CLOSE_NO_STATUS: u16 = 1005;

/// WebSocket client transport
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, config: &SessionConfig) -> Result<Channel, NetworkError> {
        let url = config.url();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(pump(url, outbound_rx, events_tx));
        Ok(Channel::new(outbound_tx, events_rx, Some(task)))
    }
}

/// Drive one WebSocket connection until it closes
async fn pump(
    url: String,
    mut outbound: mpsc::Receiver<Outbound>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::warn!("WebSocket connect to {} failed: {}", url, e);
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            let _ = events.send(ChannelEvent::Closed {
                code: CLOSE_ABNORMAL,
                reason: e.to_string(),
            });
            return;
        }
    };

    tracing::debug!("WebSocket open: {}", url);
    let _ = events.send(ChannelEvent::Ready);
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Binary { data, ack }) => {
                    let result = write
                        .send(Message::Binary(data))
                        .await
                        .map_err(|e| NetworkError::SendFailed(e.to_string()));
                    if let Err(e) = &result {
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(result);
                    }
                }
                Some(Outbound::Close { code }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    // Keep reading until the peer echoes the close
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!("Close frame not sent: {}", e);
                        let _ = events.send(ChannelEvent::Closed {
                            code,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
                None => break,
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(ChannelEvent::Message(data));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ChannelEvent::Text(text.as_str().to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    let _ = events.send(ChannelEvent::Closed { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    let _ = events.send(ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    });
                    break;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: "connection dropped".into(),
                    });
                    break;
                }
            },
        }
    }

    let _ = write.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    use crate::config::ConnectionConfig;
    use crate::network::connection::{ConnectionEvent, ConnectionManager};
    use crate::protocol::MediaMode;

    type ServerStream = WebSocketStream<TcpStream>;

    /// Accept one WebSocket client on a loopback port and hand it to `handler`
    async fn serve<F, Fut>(handler: F) -> SessionConfig
    where
        F: FnOnce(ServerStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        SessionConfig {
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        }
    }

    /// First frame the client wrote
    async fn first_frame(ws: &mut ServerStream) -> Bytes {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => data,
            other => panic!("expected a binary frame, got {:?}", other),
        }
    }

    /// Send a close frame and keep reading until the client answers
    async fn close_with(mut ws: ServerStream, frame: Option<CloseFrame>) {
        ws.close(frame).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    }

    fn manager() -> ConnectionManager<WebSocketTransport> {
        ConnectionManager::new(Arc::new(WebSocketTransport::new()), ConnectionConfig::default())
    }

    async fn next_event(manager: &mut ConnectionManager<WebSocketTransport>) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(5), manager.next_event())
            .await
            .expect("no event within 5s")
            .expect("manager has nothing left to wait for")
    }

    /// Skip error notifications up to the close outcome
    async fn close_outcome(manager: &mut ConnectionManager<WebSocketTransport>) -> ConnectionEvent {
        loop {
            match next_event(manager).await {
                ConnectionEvent::Error(_) => continue,
                event => return event,
            }
        }
    }

    #[tokio::test]
    async fn test_mode_byte_then_binary_inbound_text_dropped() {
        let (mode_tx, mode_rx) = oneshot::channel();
        let config = serve(|mut ws| async move {
            let _ = mode_tx.send(first_frame(&mut ws).await);
            ws.send(Message::text("status")).await.unwrap();
            ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
            close_with(
                ws,
                Some(CloseFrame {
                    code: CloseCode::Away,
                    reason: "".into(),
                }),
            )
            .await;
        })
        .await;

        let mut manager = manager();
        manager.connect(MediaMode::Audio, config).await.unwrap();
        assert_eq!(mode_rx.await.unwrap().as_ref(), &[0x00]);

        match next_event(&mut manager).await {
            ConnectionEvent::Inbound(data) => assert_eq!(data.as_ref(), &[1, 2, 3]),
            other => panic!("expected inbound audio, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut manager).await,
            ConnectionEvent::Reconnecting { code: 1001, .. }
        ));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_close_without_status_reconnects() {
        let config = serve(|mut ws| async move {
            first_frame(&mut ws).await;
            close_with(ws, None).await;
        })
        .await;

        let mut manager = manager();
        manager.connect(MediaMode::Video, config).await.unwrap();
        assert!(matches!(
            close_outcome(&mut manager).await,
            ConnectionEvent::Reconnecting {
                code: CLOSE_NO_STATUS,
                ..
            }
        ));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_dropped_socket_is_abnormal() {
        let config = serve(|mut ws| async move {
            first_frame(&mut ws).await;
            // No close handshake
            drop(ws);
        })
        .await;

        let mut manager = manager();
        manager.connect(MediaMode::Audio, config).await.unwrap();
        assert!(matches!(
            close_outcome(&mut manager).await,
            ConnectionEvent::Reconnecting {
                code: CLOSE_ABNORMAL,
                ..
            }
        ));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_normal_close_ends() {
        let config = serve(|mut ws| async move {
            first_frame(&mut ws).await;
            close_with(
                ws,
                Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "done".into(),
                }),
            )
            .await;
        })
        .await;

        let mut manager = manager();
        manager.connect(MediaMode::Audio, config).await.unwrap();
        assert_eq!(
            close_outcome(&mut manager).await,
            ConnectionEvent::Ended { code: 1000 }
        );
        assert!(!manager.reconnect_pending());
    }

    #[tokio::test]
    async fn test_local_close_sends_normal_code() {
        let (close_tx, close_rx) = oneshot::channel();
        let config = serve(|mut ws| async move {
            first_frame(&mut ws).await;
            let mut close_tx = Some(close_tx);
            // Keep reading so the close echo gets flushed
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Close(frame) = message {
                    if let Some(tx) = close_tx.take() {
                        let _ = tx.send(frame.map(|f| u16::from(f.code)));
                    }
                }
            }
        })
        .await;

        let mut manager = manager();
        manager.connect(MediaMode::Audio, config).await.unwrap();
        manager.close().await;
        assert_eq!(close_rx.await.unwrap(), Some(1000));
    }

    #[tokio::test]
    async fn test_channel_reports_text_and_binary() {
        let config = serve(|mut ws| async move {
            let frame = first_frame(&mut ws).await;
            ws.send(Message::text("hello")).await.unwrap();
            ws.send(Message::Binary(frame)).await.unwrap();
            close_with(ws, None).await;
        })
        .await;

        let mut channel = WebSocketTransport::new().open(&config).await.unwrap();
        assert_eq!(channel.next_event().await, Some(ChannelEvent::Ready));
        channel
            .send_confirmed(Bytes::from_static(&[0x01, 0xAA]))
            .await
            .unwrap();

        assert_eq!(channel.next_event().await, Some(ChannelEvent::Text("hello".into())));
        assert_eq!(
            channel.next_event().await,
            Some(ChannelEvent::Message(Bytes::from_static(&[0x01, 0xAA])))
        );
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Closed {
                code: CLOSE_NO_STATUS,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_refused_connect_closes_abnormally() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = SessionConfig {
            host: "127.0.0.1".into(),
            port,
            ..Default::default()
        };

        let mut channel = WebSocketTransport::new().open(&config).await.unwrap();
        assert!(matches!(channel.next_event().await, Some(ChannelEvent::Error(_))));
        assert!(matches!(
            channel.next_event().await,
            Some(ChannelEvent::Closed {
                code: CLOSE_ABNORMAL,
                ..
            })
        ));
    }
}
