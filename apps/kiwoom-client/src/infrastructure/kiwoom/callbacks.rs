//! Callback Registry
//!
//! One handler per routing key (`trnm`, or an item's `type` for `REAL`
//! frames). Lookups that miss return the fallback handler, which logs the
//! frame.
//!
//! Handlers are either synchronous closures or functions returning a future.
//! Both are wrapped the same way: an invocation first takes a permit from a
//! shared semaphore, runs the handler body, then releases the permit whether
//! the body succeeded or not. Invocations are never dropped; those that
//! cannot get a permit wait for one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use crate::application::ports::{Transport, TransportError};
use crate::domain::realtime::{TRNM_LOGIN, TRNM_PING, routing_key};
use crate::infrastructure::metrics;

/// Errors returned by callbacks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallbackError {
    /// The LOGIN frame reported a non-zero status.
    #[error("login failed with return code {return_code}: {message}")]
    LoginFailure {
        /// `return_code` of the frame, `-1` when absent.
        return_code: i64,
        /// `return_msg` of the frame.
        message: String,
    },

    /// A frame could not be parsed by the handler.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A reply could not be written to the socket.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Handler failure that ends the session.
    #[error("fatal handler error: {0}")]
    Fatal(String),

    /// Handler failure that is logged and otherwise ignored.
    #[error("handler error: {0}")]
    Handler(String),
}

impl CallbackError {
    /// Whether the error must close the session.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoginFailure { .. } | Self::Transport(_) | Self::Fatal(_)
        )
    }
}

/// Result of a handler body.
pub type CallbackResult = Result<(), CallbackError>;

type SyncHandler = Arc<dyn Fn(&str) -> CallbackResult + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(Arc<str>) -> BoxFuture<'static, CallbackResult> + Send + Sync>;

/// A registered handler, receiving the raw frame text.
#[derive(Clone)]
pub enum Callback {
    /// Runs to completion when invoked.
    Sync(SyncHandler),
    /// Returns a future that is awaited.
    Async(AsyncHandler),
}

impl Callback {
    /// Wrap a synchronous handler.
    pub fn sync<F>(handler: F) -> Self
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(handler))
    }

    /// Wrap an asynchronous handler.
    pub fn asynchronous<F, Fut>(handler: F) -> Self
    where
        F: Fn(Arc<str>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |frame: Arc<str>| -> BoxFuture<'static, CallbackResult> {
                Box::pin(handler(frame))
            },
        ))
    }

    fn call(&self, frame: Arc<str>) -> BoxFuture<'static, CallbackResult> {
        match self {
            Self::Sync(handler) => Box::pin(future::ready(handler(&*frame))),
            Self::Async(handler) => handler(frame),
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Callback::Sync"),
            Self::Async(_) => f.write_str("Callback::Async"),
        }
    }
}

/// Routing key to handler, with a shared concurrency cap.
pub struct CallbackRegistry {
    entries: RwLock<HashMap<String, Callback>>,
    fallback: Callback,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    waiting: Arc<AtomicUsize>,
}

impl CallbackRegistry {
    /// Create a registry allowing `max_concurrency` handler bodies to run at
    /// once.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            entries: RwLock::new(HashMap::new()),
            fallback: Callback::sync(log_frame),
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a handler, replacing any previous one for the key.
    pub fn register(&self, key: &str, callback: Callback) {
        let key = routing_key(key);
        tracing::debug!(key = %key, ?callback, "Registering callback");
        self.entries.write().insert(key, callback);
    }

    /// Register a synchronous handler.
    pub fn add_callback<F>(&self, key: &str, handler: F)
    where
        F: Fn(&str) -> CallbackResult + Send + Sync + 'static,
    {
        self.register(key, Callback::sync(handler));
    }

    /// Register an asynchronous handler.
    pub fn add_async_callback<F, Fut>(&self, key: &str, handler: F)
    where
        F: Fn(Arc<str>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult> + Send + 'static,
    {
        self.register(key, Callback::asynchronous(handler));
    }

    /// Handler for a key, or the fallback when none is registered.
    #[must_use]
    pub fn get(&self, key: &str) -> Callback {
        self.entries
            .read()
            .get(&routing_key(key))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Whether an explicit handler exists for the key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(&routing_key(key))
    }

    /// Concurrency cap.
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Handler bodies currently executing.
    #[must_use]
    pub fn executing(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    /// Invocations waiting for a permit.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Build one permit-guarded invocation of the handler for `key`.
    ///
    /// The handler is resolved now; the body runs when the returned future
    /// is polled and a permit is free.
    pub fn invoke(&self, key: &str, frame: Arc<str>) -> BoxFuture<'static, CallbackResult> {
        let callback = self.get(key);
        let permits = Arc::clone(&self.permits);
        let waiting = Arc::clone(&self.waiting);
        let key = key.to_string();

        Box::pin(async move {
            metrics::set_callbacks_waiting(waiting.fetch_add(1, Ordering::AcqRel) + 1);
            let permit = permits.acquire_owned().await;
            metrics::set_callbacks_waiting(waiting.fetch_sub(1, Ordering::AcqRel) - 1);
            let _permit =
                permit.map_err(|_| CallbackError::Fatal("callback permits closed".to_string()))?;

            let started = Instant::now();
            let result = callback.call(frame).await;
            metrics::record_callback_duration(&key, started.elapsed());
            result
        })
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("keys", &self.entries.read().keys().collect::<Vec<_>>())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Default Handlers
// =============================================================================

/// The socket transport currently in use, shared with default handlers.
pub type TransportSlot = Arc<RwLock<Option<Arc<dyn Transport>>>>;

fn log_frame(frame: &str) -> CallbackResult {
    tracing::info!(target: "kiwoom_client::realtime", frame, "Received frame");
    Ok(())
}

/// Echo `PING` frames back verbatim over the current transport.
#[must_use]
pub fn ping_echo(transport: TransportSlot) -> Callback {
    Callback::asynchronous(move |frame: Arc<str>| {
        let transport = transport.read().clone();
        async move {
            let transport = transport.ok_or(TransportError::Closed)?;
            transport.send(frame.to_string()).await?;
            CallbackResult::Ok(())
        }
    })
}

/// Fail with [`CallbackError::LoginFailure`] unless the `LOGIN` frame's
/// `return_code` is zero.
#[must_use]
pub fn login_check() -> Callback {
    Callback::sync(|frame| {
        let msg: serde_json::Value =
            serde_json::from_str(frame).map_err(|e| CallbackError::Malformed(e.to_string()))?;

        let return_code = msg.get("return_code").and_then(|code| {
            code.as_i64()
                .or_else(|| code.as_str().and_then(|s| s.trim().parse().ok()))
        });
        let message = msg
            .get("return_msg")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        if return_code != Some(0) {
            return Err(CallbackError::LoginFailure {
                return_code: return_code.unwrap_or(-1),
                message: if message.is_empty() {
                    frame.to_string()
                } else {
                    message
                },
            });
        }

        tracing::info!(return_msg = %message, "Logged in to real-time stream");
        Ok(())
    })
}

/// Register the default `PING` and `LOGIN` handlers.
pub fn register_defaults(registry: &CallbackRegistry, transport: TransportSlot) {
    registry.register(TRNM_PING, ping_echo(transport));
    registry.register(TRNM_LOGIN, login_check());
}
