//! Kiwoom Client Binary
//!
//! Connects to the Kiwoom real-time stream and logs ticks and order-book
//! updates for a set of instruments.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kiwoom-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIWOOM_HOST`: real | mock
//! - `KIWOOM_APPKEY`: App key, or a path to a file containing it
//! - `KIWOOM_SECRETKEY`: Secret key, or a path to a file containing it
//!
//! ## Optional
//! - `KIWOOM_CODES`: Comma-separated instrument codes (default: 005930)
//! - `KIWOOM_WS_HEARTBEAT_SECS`: Socket ping interval (default: 30)
//! - `KIWOOM_WS_MAX_CONCURRENCY`: Concurrent callback bodies (default: 1000)
//! - `KIWOOM_REST_INTERVAL_MS`: Minimum REST request spacing (default: 205)
//! - `KIWOOM_DEBUG`: Log REST requests and responses (default: false)
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use anyhow::Context;
use kiwoom_client::domain::subscription::MAX_CODES_PER_REGISTRATION;
use kiwoom_client::{
    CallbackError, ClientConfig, FeedType, KiwoomApi, RealFrame, Refresh, init_metrics,
    init_telemetry,
};
use tokio::signal;

/// Subscription group used by the binary.
const GROUP: &str = "1";

/// Instruments streamed when `KIWOOM_CODES` is unset.
const DEFAULT_CODES: &str = "005930";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();
    let _telemetry_guard = init_telemetry()?;

    tracing::info!("Starting Kiwoom client");

    let _metrics_handle = init_metrics()?;

    let config = ClientConfig::from_env()?;
    tracing::info!(
        host = config.host.as_str(),
        heartbeat_secs = config.websocket.heartbeat_interval.as_secs(),
        max_concurrency = config.websocket.max_concurrency,
        "Configuration loaded"
    );

    let api = KiwoomApi::new(&config)?;
    register_loggers(&api);
    api.connect().await.context("failed to connect")?;

    let codes = parse_codes(
        &std::env::var("KIWOOM_CODES").unwrap_or_else(|_| DEFAULT_CODES.to_string()),
    );
    for (i, chunk) in codes.chunks(MAX_CODES_PER_REGISTRATION).enumerate() {
        let refresh = if i == 0 {
            Refresh::Replace
        } else {
            Refresh::Keep
        };
        api.register_tick(GROUP, chunk, refresh).await?;
        api.register_order_book(GROUP, chunk, Refresh::Keep).await?;
    }
    tracing::info!(codes = codes.len(), group = GROUP, "Subscribed");

    let outcome = tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Shutdown signal received");
            Ok(())
        }
        result = api.wait() => result,
    };

    if let Err(e) = api
        .remove_subscription(GROUP, vec![FeedType::Tick, FeedType::OrderBook])
        .await
    {
        tracing::debug!(error = %e, "Subscription removal skipped");
    }
    api.close().await?;
    tracing::info!("Kiwoom client stopped");

    outcome.map_err(Into::into)
}

fn register_loggers(api: &KiwoomApi) {
    api.add_callback(FeedType::Tick.code(), |raw| {
        let frame =
            RealFrame::from_raw(raw).map_err(|e| CallbackError::Malformed(e.to_string()))?;
        for tick in frame.ticks() {
            tracing::info!(
                code = %tick.code,
                time = %tick.time,
                price = tick.price,
                volume = tick.volume,
                "Tick"
            );
        }
        Ok(())
    });
    api.add_callback(FeedType::OrderBook.code(), |raw| {
        let frame =
            RealFrame::from_raw(raw).map_err(|e| CallbackError::Malformed(e.to_string()))?;
        for book in frame.order_books() {
            if let Some(best) = book.levels.first() {
                tracing::info!(
                    code = %book.code,
                    time = %book.time,
                    ask = best.ask_price,
                    bid = best.bid_price,
                    "Order book"
                );
            }
        }
        Ok(())
    });
}

fn parse_codes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}
