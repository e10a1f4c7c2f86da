//! Real-time Stream Types
//!
//! Routing keys and payload types for frames pushed over the Kiwoom
//! WebSocket stream.
//!
//! # Frame Shapes
//!
//! ```json
//! {"trnm": "PING"}
//! {"trnm": "LOGIN", "return_code": 0, "return_msg": "..."}
//! {"trnm": "REAL", "data": [{"type": "0B", "item": "005930", "values": {"20": "090001", ...}}]}
//! ```
//!
//! Every frame carries a `trnm` routing key. `REAL` frames carry a list of
//! items, each with its own `type` routing key (the feed type). Routing only
//! needs those two fields; the typed payloads below are decoded on demand by
//! callbacks that want them.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

// =============================================================================
// Routing Keys
// =============================================================================

/// `trnm` of push-data frames.
pub const TRNM_REAL: &str = "REAL";

/// `trnm` of server heartbeat frames.
pub const TRNM_PING: &str = "PING";

/// `trnm` of login request / response frames.
pub const TRNM_LOGIN: &str = "LOGIN";

/// `trnm` of registration frames and their acknowledgments.
pub const TRNM_REG: &str = "REG";

/// `trnm` of removal frames and their acknowledgments.
pub const TRNM_REMOVE: &str = "REMOVE";

/// Normalize a routing key for callback lookup.
#[must_use]
pub fn routing_key(key: &str) -> String {
    key.trim().to_uppercase()
}

// =============================================================================
// Feed Type
// =============================================================================

/// Real-time data category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedType {
    /// Stock trades (`0B`).
    Tick,
    /// Stock order book depth (`0D`).
    OrderBook,
    /// Any other feed code, stored uppercased.
    Other(String),
}

impl FeedType {
    /// Parse a feed code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match routing_key(code).as_str() {
            "0B" => Self::Tick,
            "0D" => Self::OrderBook,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire code of this feed.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Tick => "0B",
            Self::OrderBook => "0D",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Typed Payloads
// =============================================================================

/// Fully decoded `REAL` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RealFrame {
    /// Always `REAL`.
    pub trnm: String,
    /// Items in the order the server listed them.
    #[serde(default)]
    pub data: Vec<RealItem>,
}

impl RealFrame {
    /// Decode a raw `REAL` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object of this shape.
    pub fn from_raw(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Items of the given feed type.
    pub fn items_of<'a>(&'a self, feed: &'a FeedType) -> impl Iterator<Item = &'a RealItem> + 'a {
        self.data.iter().filter(move |item| &item.feed_type() == feed)
    }

    /// All tick items that carry a complete trade payload.
    #[must_use]
    pub fn ticks(&self) -> Vec<Tick> {
        self.data.iter().filter_map(RealItem::tick).collect()
    }

    /// All order-book items that carry a complete depth payload.
    #[must_use]
    pub fn order_books(&self) -> Vec<OrderBook> {
        self.data.iter().filter_map(RealItem::order_book).collect()
    }
}

/// One item of a `REAL` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct RealItem {
    /// Feed code (`0B`, `0D`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Instrument code.
    pub item: String,
    /// Feed name, when the server includes it.
    #[serde(default)]
    pub name: Option<String>,
    /// Field id to raw value.
    #[serde(default)]
    pub values: HashMap<String, String>,
}

impl RealItem {
    /// Feed type of this item.
    #[must_use]
    pub fn feed_type(&self) -> FeedType {
        FeedType::from_code(&self.kind)
    }

    /// Raw value of a field id.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    fn number(&self, field: &str) -> Option<i64> {
        self.value(field).and_then(parse_signed)
    }

    /// Trade payload, if this is a complete tick item.
    #[must_use]
    pub fn tick(&self) -> Option<Tick> {
        if self.feed_type() != FeedType::Tick {
            return None;
        }
        Some(Tick {
            code: self.item.clone(),
            time: self.value(tick_field::TIME)?.to_string(),
            price: self.number(tick_field::PRICE)?,
            volume: self.number(tick_field::VOLUME)?,
        })
    }

    /// Depth payload, if this is a complete order-book item.
    #[must_use]
    pub fn order_book(&self) -> Option<OrderBook> {
        if self.feed_type() != FeedType::OrderBook {
            return None;
        }
        let levels = (0..ORDER_BOOK_DEPTH)
            .map(|depth| {
                Some(BookLevel {
                    ask_price: self.number(&(41 + depth).to_string())?,
                    ask_size: self.number(&(61 + depth).to_string())?,
                    bid_price: self.number(&(51 + depth).to_string())?,
                    bid_size: self.number(&(71 + depth).to_string())?,
                })
            })
            .collect::<Option<Vec<_>>>()?;

        Some(OrderBook {
            code: self.item.clone(),
            time: self.value(order_book_field::TIME)?.to_string(),
            levels,
        })
    }
}

/// Field ids of the `0B` feed.
pub mod tick_field {
    /// Trade time (`HHMMSS`).
    pub const TIME: &str = "20";
    /// Last price, signed by direction.
    pub const PRICE: &str = "10";
    /// Trade volume, signed by aggressor side.
    pub const VOLUME: &str = "15";
}

/// Field ids of the `0D` feed.
pub mod order_book_field {
    /// Quote time (`HHMMSS`).
    pub const TIME: &str = "21";
}

/// Number of price levels in an order-book item.
pub const ORDER_BOOK_DEPTH: usize = 10;

/// A single trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Instrument code.
    pub code: String,
    /// Trade time (`HHMMSS`).
    pub time: String,
    /// Last price; negative when below the previous close.
    pub price: i64,
    /// Volume; negative for sell-initiated trades.
    pub volume: i64,
}

/// One price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    /// Ask price.
    pub ask_price: i64,
    /// Ask quantity.
    pub ask_size: i64,
    /// Bid price.
    pub bid_price: i64,
    /// Bid quantity.
    pub bid_size: i64,
}

/// Ten-level order-book snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    /// Instrument code.
    pub code: String,
    /// Quote time (`HHMMSS`).
    pub time: String,
    /// Levels, best first.
    pub levels: Vec<BookLevel>,
}

/// Parse a value such as `+60700`, `-120` or `0`.
#[must_use]
pub fn parse_signed(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .parse()
        .ok()
}
