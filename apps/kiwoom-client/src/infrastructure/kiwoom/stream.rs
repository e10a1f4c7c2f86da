//! Real-time Stream Client
//!
//! Owns the socket transport and the single receive task, routes inbound
//! frames to the callback registry, and sends REG / REMOVE frames.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected ──close()──► Closing ──► Disconnected
//!       ▲                          │              │
//!       └──── no token / failure ──┘              └── fatal dispatch error ──► Disconnected
//! ```
//!
//! Every `connect()` supersedes the previous connection: the old receive task
//! is stopped and awaited before a new one starts. Each connection gets its
//! own inbound queue, so frames left over from a superseded session are
//! dropped with it. When the transport drops its sender (peer close or read
//! error) the queue ends and the session fails with `Transport(Closed)`.
//! Fatal errors close the session and are not retried; callers reconnect
//! explicitly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::callbacks::{CallbackError, CallbackRegistry, CallbackResult, TransportSlot};
use super::codec;
use crate::application::ports::{Connector, InboundReceiver, TokenSource, Transport, TransportError};
use crate::domain::realtime::FeedType;
use crate::domain::subscription::{FeedTypes, Refresh, SubscriptionRequest};
use crate::error::KiwoomError;
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the stream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// `connect()` in progress.
    Connecting,
    /// Transport open and receive task running.
    Connected,
    /// `close()` in progress.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

type Outcome = Option<Result<(), KiwoomError>>;

struct ReceiveTask {
    stop: CancellationToken,
    handle: JoinHandle<Result<(), KiwoomError>>,
}

/// State shared between the client and its receive task.
struct Shared {
    registry: Arc<CallbackRegistry>,
    transport: TransportSlot,
    state: RwLock<ConnectionState>,
    running: AtomicUsize,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    async fn close_transport(&self) {
        let transport = self.transport.write().take();
        if let Some(transport) = transport
            && let Err(e) = transport.close().await
        {
            tracing::warn!(error = %e, "Failed to close transport");
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Real-time stream client.
pub struct StreamClient {
    url: String,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSource>,
    shared: Arc<Shared>,
    task: Mutex<Option<ReceiveTask>>,
    outcome: parking_lot::Mutex<Option<watch::Receiver<Outcome>>>,
}

impl StreamClient {
    /// Create a client for `url` allowing `max_concurrency` callback bodies
    /// to run at once.
    ///
    /// The default `PING` echo and `LOGIN` check handlers are registered.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenSource>,
        max_concurrency: usize,
    ) -> Self {
        let registry = Arc::new(CallbackRegistry::new(max_concurrency));
        let transport: TransportSlot = Arc::new(RwLock::new(None));
        super::callbacks::register_defaults(&registry, Arc::clone(&transport));

        Self {
            url: url.into(),
            connector,
            tokens,
            shared: Arc::new(Shared {
                registry,
                transport,
                state: RwLock::new(ConnectionState::Disconnected),
                running: AtomicUsize::new(0),
            }),
            task: Mutex::new(None),
            outcome: parking_lot::Mutex::new(None),
        }
    }

    /// Socket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Number of receive tasks currently running (0 or 1).
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    /// The callback registry.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.shared.registry
    }

    /// Register a synchronous handler for a routing key.
    pub fn add_callback<F>(&self, key: &str, handler: F)
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.shared.registry.add_callback(key, handler);
    }

    /// Register an asynchronous handler for a routing key.
    pub fn add_async_callback<F, Fut>(&self, key: &str, handler: F)
    where
        F: Fn(Arc<str>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.shared.registry.add_async_callback(key, handler);
    }

    /// Open a new connection, superseding any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::Authentication`] if no token is available, or
    /// [`KiwoomError::Transport`] if the socket cannot be opened. The client
    /// is left disconnected in both cases.
    pub async fn connect(&self) -> Result<(), KiwoomError> {
        let mut task = self.task.lock().await;
        let previous_state = self.state();
        self.shared.set_state(ConnectionState::Connecting);

        // A missing token leaves any running session untouched.
        let Some(token) = self.tokens.token().await else {
            self.shared.set_state(if previous_state == ConnectionState::Connected {
                previous_state
            } else {
                ConnectionState::Disconnected
            });
            return Err(KiwoomError::Authentication(
                "not connected: token is not available".to_string(),
            ));
        };

        if let Some(previous) = task.take() {
            stop_receive_task(previous).await;
        }
        self.shared.close_transport().await;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let transport = match self.connector.connect(&self.url, &token, inbound_tx).await {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        *self.shared.transport.write() = Some(transport);

        let stop = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let dispatcher = Dispatcher::new(Arc::clone(&self.shared), inbound_rx, stop.clone());
        let handle = tokio::spawn(async move {
            let result = dispatcher.run().await;
            outcome_tx.send_replace(Some(result.clone()));
            result
        });

        *task = Some(ReceiveTask { stop, handle });
        *self.outcome.lock() = Some(outcome_rx);
        self.shared.set_state(ConnectionState::Connected);
        metrics::record_connection();
        tracing::info!(url = %self.url, "Stream session started");
        Ok(())
    }

    /// Stop the receive task and close the transport. Idempotent.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature leaves room for transport errors.
    pub async fn close(&self) -> Result<(), KiwoomError> {
        let task = self.task.lock().await;
        if self.state() == ConnectionState::Disconnected
            && self.shared.transport.read().is_none()
        {
            if let Some(task) = task.as_ref() {
                task.stop.cancel();
            }
            return Ok(());
        }

        self.shared.set_state(ConnectionState::Closing);
        if let Some(task) = task.as_ref() {
            task.stop.cancel();
        }
        self.shared.close_transport().await;
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!(url = %self.url, "Stream session closed");
        Ok(())
    }

    /// Wait for the current receive task to finish.
    ///
    /// Returns immediately when no session was started.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that ended the session, if any.
    pub async fn wait(&self) -> Result<(), KiwoomError> {
        let receiver = self.outcome.lock().clone();
        let Some(mut receiver) = receiver else {
            return Ok(());
        };

        match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Ok(())),
            Err(_) => Ok(()),
        }
    }

    /// Send raw text over the current transport.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::Transport`] if not connected or the write fails.
    pub async fn send_raw(&self, text: String) -> Result<(), KiwoomError> {
        let transport = self.transport()?;
        transport.send(text).await?;
        Ok(())
    }

    /// Serialize and send a frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the frame cannot be sent.
    pub async fn send<T: Serialize + Sync>(&self, frame: &T) -> Result<(), KiwoomError> {
        let text = codec::encode(frame)?;
        self.send_raw(text).await
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, KiwoomError> {
        self.shared
            .transport
            .read()
            .clone()
            .ok_or(KiwoomError::Transport(TransportError::Closed))
    }

    /// Register codes for one feed type on a group.
    ///
    /// # Errors
    ///
    /// Returns [`KiwoomError::InvalidArgument`] for more than 100 codes, in
    /// which case nothing is sent.
    pub async fn register<S: AsRef<str> + Sync>(
        &self,
        grp_no: &str,
        codes: &[S],
        feed: &FeedType,
        refresh: Refresh,
    ) -> Result<(), KiwoomError> {
        let request = SubscriptionRequest::register(grp_no, codes, feed, refresh)?;
        tracing::info!(grp_no, feed = %feed, codes = request.code_count(), "Registering real-time feed");
        self.send(&request).await
    }

    /// Register trade ticks (`0B`) for up to 100 codes.
    ///
    /// # Errors
    ///
    /// See [`StreamClient::register`].
    pub async fn register_tick<S: AsRef<str> + Sync>(
        &self,
        grp_no: &str,
        codes: &[S],
        refresh: Refresh,
    ) -> Result<(), KiwoomError> {
        self.register(grp_no, codes, &FeedType::Tick, refresh).await
    }

    /// Register order-book depth (`0D`) for up to 100 codes.
    ///
    /// # Errors
    ///
    /// See [`StreamClient::register`].
    pub async fn register_order_book<S: AsRef<str> + Sync>(
        &self,
        grp_no: &str,
        codes: &[S],
        refresh: Refresh,
    ) -> Result<(), KiwoomError> {
        self.register(grp_no, codes, &FeedType::OrderBook, refresh)
            .await
    }

    /// Clear feed types from a group. Does nothing when either is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be sent.
    pub async fn remove_subscription(
        &self,
        grp_no: &str,
        types: impl Into<FeedTypes> + Send,
    ) -> Result<(), KiwoomError> {
        let Some(request) = SubscriptionRequest::remove(grp_no, types) else {
            return Ok(());
        };
        tracing::info!(grp_no, types = ?request.data[0].types, "Removing real-time feed");
        self.send(&request).await
    }
}

impl fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClient")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn stop_receive_task(task: ReceiveTask) {
    task.stop.cancel();
    match task.handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Previous receive task ended with error"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "Previous receive task panicked"),
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

enum Event {
    Stop,
    Frame(String),
    Failure(CallbackError),
    Hangup,
}

/// Receive loop bound to one connection.
struct Dispatcher {
    shared: Arc<Shared>,
    inbound: InboundReceiver,
    stop: CancellationToken,
    failures_tx: mpsc::UnboundedSender<CallbackError>,
    failures_rx: mpsc::UnboundedReceiver<CallbackError>,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatcher {
    fn new(
        shared: Arc<Shared>,
        inbound: InboundReceiver,
        stop: CancellationToken,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            inbound,
            stop,
            failures_tx,
            failures_rx,
        }
    }

    async fn run(mut self) -> Result<(), KiwoomError> {
        let shared = Arc::clone(&self.shared);
        shared.running.fetch_add(1, Ordering::AcqRel);
        let _running = RunningGuard(&shared.running);

        loop {
            let event = tokio::select! {
                biased;
                () = self.stop.cancelled() => Event::Stop,
                Some(failure) = self.failures_rx.recv() => Event::Failure(failure),
                frame = self.inbound.recv() => frame.map_or(Event::Hangup, Event::Frame),
            };

            let result = match event {
                Event::Stop => return Ok(()),
                Event::Frame(raw) => self.dispatch(raw),
                Event::Failure(failure) => Err(failure.into()),
                Event::Hangup => {
                    tracing::warn!("Transport hung up");
                    Err(KiwoomError::Transport(TransportError::Closed))
                }
            };

            if let Err(e) = result {
                tracing::error!(error = %e, "Closing stream session after fatal error");
                metrics::record_dispatch_failure();
                self.fail().await;
                return Err(e);
            }
        }
    }

    /// Route one frame. Callbacks are spawned and not awaited.
    fn dispatch(&self, raw: String) -> Result<(), KiwoomError> {
        let routed = codec::decode_routing(&raw)
            .map_err(|e| KiwoomError::DispatchFailure(format!("failed to decode frame: {e}")))?;
        metrics::record_frame_received(&routed.trnm);

        let frame: Arc<str> = Arc::from(raw);
        for key in routed.keys {
            self.schedule(key, Arc::clone(&frame));
        }
        Ok(())
    }

    fn schedule(&self, key: String, frame: Arc<str>) {
        metrics::record_callback_dispatched(&key);
        let invocation = self.shared.registry.invoke(&key, frame);
        let failures = self.failures_tx.clone();

        tokio::spawn(async move {
            let Err(e) = invocation.await else {
                return;
            };
            metrics::record_callback_failure(&key);
            if e.is_fatal() {
                let _ = failures.send(e);
            } else {
                tracing::error!(key = %key, error = %e, "Callback failed");
            }
        });
    }

    /// Close the session from inside the loop.
    async fn fail(&self) {
        self.stop.cancel();
        self.shared.set_state(ConnectionState::Closing);
        self.shared.close_transport().await;
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
