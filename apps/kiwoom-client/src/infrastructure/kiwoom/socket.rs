//! WebSocket Transport
//!
//! Connects to the Kiwoom real-time endpoint with tokio-tungstenite.
//!
//! # Stream URL
//!
//! - Production: `wss://api.kiwoom.com:10000/api/dostk/websocket`
//! - Mock: `wss://mockapi.kiwoom.com:10000/api/dostk/websocket`
//!
//! # Protocol
//!
//! After the upgrade the client sends `{"trnm":"LOGIN","token":"..."}`. The
//! server answers with a LOGIN frame and then pushes JSON text frames. A
//! reader task forwards every text frame, in arrival order, to the inbound
//! queue; it also answers protocol pings and sends its own ping every
//! heartbeat interval.
//!
//! The reader owns the inbound sender. When the server closes the socket or a
//! read fails the reader exits and drops it, which ends the stream session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connector, InboundSender, Transport, TransportError};
use crate::domain::realtime::TRNM_LOGIN;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Serialize)]
struct LoginRequest<'a> {
    trnm: &'static str,
    token: &'a str,
}

/// Opens WebSocket connections to the real-time endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    heartbeat_interval: Duration,
}

impl WebSocketConnector {
    /// Create a connector sending a protocol ping every `heartbeat_interval`.
    #[must_use]
    pub const fn new(heartbeat_interval: Duration) -> Self {
        Self { heartbeat_interval }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        token: &str,
        inbound: InboundSender,
    ) -> Result<Arc<dyn Transport>, TransportError> {
        tracing::info!(url, "Connecting to real-time stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (mut write, read) = ws_stream.split();

        let login = serde_json::to_string(&LoginRequest {
            trnm: TRNM_LOGIN,
            token,
        })
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        write
            .send(Message::Text(login.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let writer = Arc::new(Mutex::new(write));
        let cancel = CancellationToken::new();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(read_loop(
            read,
            Arc::clone(&writer),
            inbound,
            cancel.clone(),
            Arc::clone(&closed),
            self.heartbeat_interval,
        ));

        tracing::info!(url, "Real-time stream connected");
        Ok(Arc::new(WebSocketTransport {
            writer,
            cancel,
            closed,
        }))
    }
}

/// An open WebSocket connection.
pub struct WebSocketTransport {
    writer: Arc<Mutex<WsSink>>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tracing::trace!(frame = %text, "Sending frame");
        self.writer
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "Close frame not sent");
        }
        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "Socket close failed");
        }
        tracing::info!("Real-time stream closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }
}

async fn read_loop(
    mut read: WsSource,
    writer: Arc<Mutex<WsSink>>,
    inbound: InboundSender,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = heartbeat.tick() => {
                if let Err(e) = writer.lock().await.send(Message::Ping(Vec::new().into())).await {
                    tracing::warn!(error = %e, "Heartbeat ping failed");
                    break;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(text.to_string()).is_err() {
                        tracing::debug!("Inbound queue closed");
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = writer.lock().await.send(Message::Pong(payload)).await {
                        tracing::warn!(error = %e, "Pong failed");
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(?frame, "Real-time stream closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Real-time stream error");
                    break;
                }
                None => {
                    tracing::warn!("Real-time stream ended");
                    break;
                }
            }
        }
    }

    closed.store(true, Ordering::Release);
}
