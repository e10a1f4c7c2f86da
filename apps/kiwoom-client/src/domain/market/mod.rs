//! Market Data Request Tables
//!
//! Static request parameters for the REST market-data endpoints (stock list,
//! chart candles, trade history) and the pure helpers that decide paging and
//! date windows.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde_json::{Map, Value};

/// Date format used by every REST date field.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Trade history is only served for this many days back.
pub const TRADE_HISTORY_LIMIT_DAYS: i64 = 60;

/// Errors raised by market request helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    /// A date was not in `YYYYMMDD` format.
    #[error("invalid date '{0}', expected YYYYMMDD")]
    InvalidDate(String),

    /// Unknown chart period.
    #[error("'period' must be one of [tick, min, day], not '{0}'")]
    UnknownPeriod(String),

    /// Unknown chart target.
    #[error("'ctype' must be one of [stock, sector], not '{0}'")]
    UnknownTarget(String),
}

// =============================================================================
// Markets
// =============================================================================

/// Market selector for the stock list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    /// KOSPI.
    Kospi,
    /// KOSDAQ.
    Kosdaq,
    /// ELW.
    Elw,
    /// Mutual funds.
    MutualFund,
    /// Stock warrants.
    Warrant,
    /// REITs.
    Reits,
    /// ETF.
    Etf,
    /// High-yield funds.
    HighYield,
    /// K-OTC.
    KOtc,
    /// KONEX.
    Konex,
    /// ETN.
    Etn,
    /// Nextrade venue: KOSPI and KOSDAQ codes tradable on the alternative venue.
    Nxt,
}

impl Market {
    /// Wire code of the market, `None` for derived markets.
    #[must_use]
    pub const fn code(self) -> Option<&'static str> {
        match self {
            Self::Kospi => Some("0"),
            Self::Kosdaq => Some("10"),
            Self::Elw => Some("3"),
            Self::MutualFund => Some("4"),
            Self::Warrant => Some("5"),
            Self::Reits => Some("6"),
            Self::Etf => Some("8"),
            Self::HighYield => Some("9"),
            Self::KOtc => Some("30"),
            Self::Konex => Some("50"),
            Self::Etn => Some("60"),
            Self::Nxt => None,
        }
    }
}

/// Suffix of integrated codes that route across both venues.
pub const INTEGRATED_SUFFIX: &str = "_AL";

/// Extract instrument codes from a stock list body.
///
/// With `integrated`, codes the server marks as Nextrade-enabled get the
/// [`INTEGRATED_SUFFIX`].
#[must_use]
pub fn stock_codes(body: &Value, integrated: bool) -> Vec<String> {
    body.get("list")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let code = row.get("code")?.as_str()?;
                    let nxt = row.get("nxtEnable").and_then(Value::as_str) == Some("Y");
                    if integrated && nxt {
                        Some(format!("{code}{INTEGRATED_SUFFIX}"))
                    } else {
                        Some(code.to_string())
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Sorted integrated codes drawn from KOSPI and KOSDAQ lists.
#[must_use]
pub fn nxt_codes(kospi: &[String], kosdaq: &[String]) -> Vec<String> {
    let mut codes: Vec<String> = kospi
        .iter()
        .chain(kosdaq)
        .filter(|code| code.contains("AL"))
        .cloned()
        .collect();
    codes.sort();
    codes
}

// =============================================================================
// Charts
// =============================================================================

/// Candle period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartPeriod {
    /// Tick candles.
    Tick,
    /// Minute candles.
    Minute,
    /// Daily candles.
    Day,
}

impl ChartPeriod {
    /// Parse `tick`, `min` or `day`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownPeriod`] for any other value.
    pub fn parse(period: &str) -> Result<Self, MarketError> {
        match period.to_lowercase().as_str() {
            "tick" => Ok(Self::Tick),
            "min" => Ok(Self::Minute),
            "day" => Ok(Self::Day),
            _ => Err(MarketError::UnknownPeriod(period.to_string())),
        }
    }

    /// Field of a chart row carrying its timestamp.
    #[must_use]
    pub const fn time_key(self) -> &'static str {
        match self {
            Self::Tick | Self::Minute => "cntr_tm",
            Self::Day => "dt",
        }
    }
}

/// What a chart is drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartTarget {
    /// A single stock.
    Stock,
    /// A sector index.
    Sector,
}

impl ChartTarget {
    /// Parse `stock` or `sector`.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::UnknownTarget`] for any other value.
    pub fn parse(target: &str) -> Result<Self, MarketError> {
        match target.to_lowercase().as_str() {
            "stock" => Ok(Self::Stock),
            "sector" => Ok(Self::Sector),
            _ => Err(MarketError::UnknownTarget(target.to_string())),
        }
    }

    /// Request field that carries the instrument code.
    #[must_use]
    pub const fn code_field(self) -> &'static str {
        match self {
            Self::Stock => "stk_cd",
            Self::Sector => "inds_cd",
        }
    }
}

/// Static request parameters of one chart endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartSpec {
    /// `api-id` header value.
    pub api_id: &'static str,
    /// Body field carrying the candle rows.
    pub body_key: &'static str,
    /// Fixed request fields.
    pub template: &'static [(&'static str, &'static str)],
}

/// Chart endpoint.
pub const CHART_ENDPOINT: &str = "/api/dostk/chart";

/// Look up the chart endpoint parameters for a target and period.
#[must_use]
pub const fn chart_spec(target: ChartTarget, period: ChartPeriod) -> ChartSpec {
    match (target, period) {
        (ChartTarget::Stock, ChartPeriod::Tick) => ChartSpec {
            api_id: "ka10079",
            body_key: "stk_tic_chart_qry",
            template: &[("tic_scope", "1"), ("upd_stkpc_tp", "1")],
        },
        (ChartTarget::Stock, ChartPeriod::Minute) => ChartSpec {
            api_id: "ka10080",
            body_key: "stk_min_pole_chart_qry",
            template: &[("tic_scope", "1"), ("upd_stkpc_tp", "1")],
        },
        (ChartTarget::Stock, ChartPeriod::Day) => ChartSpec {
            api_id: "ka10081",
            body_key: "stk_dt_pole_chart_qry",
            template: &[("upd_stkpc_tp", "1")],
        },
        (ChartTarget::Sector, ChartPeriod::Tick) => ChartSpec {
            api_id: "ka20004",
            body_key: "inds_tic_chart_qry",
            template: &[("tic_scope", "1")],
        },
        (ChartTarget::Sector, ChartPeriod::Minute) => ChartSpec {
            api_id: "ka20005",
            body_key: "inds_min_pole_qry",
            template: &[("tic_scope", "1")],
        },
        (ChartTarget::Sector, ChartPeriod::Day) => ChartSpec {
            api_id: "ka20006",
            body_key: "inds_dt_pole_qry",
            template: &[],
        },
    }
}

/// Build the request body for a chart query.
#[must_use]
pub fn chart_request(
    target: ChartTarget,
    period: ChartPeriod,
    code: &str,
    base_date: Option<&str>,
) -> Map<String, Value> {
    let spec = chart_spec(target, period);
    let mut data: Map<String, Value> = spec
        .template
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
        .collect();
    data.insert(target.code_field().to_string(), Value::from(code));
    if period == ChartPeriod::Day
        && let Some(base) = base_date
    {
        data.insert("base_dt".to_string(), Value::from(base));
    }
    data
}

/// Whether a chart page carries candle rows.
#[must_use]
pub fn is_valid_chart_page(body: &Value, target: ChartTarget, period: ChartPeriod) -> bool {
    body.get(chart_spec(target, period).body_key)
        .and_then(Value::as_array)
        .is_some_and(|rows| !rows.is_empty())
}

/// Whether another chart page should be fetched.
///
/// Without a `start` date every valid page continues. With one, paging stops
/// once the earliest row of the page is older than `start`.
#[must_use]
pub fn should_continue_chart(
    body: &Value,
    target: ChartTarget,
    period: ChartPeriod,
    start: Option<&str>,
) -> bool {
    if !is_valid_chart_page(body, target, period) {
        return false;
    }
    let Some(start) = start else {
        return true;
    };

    let earliest = body
        .get(chart_spec(target, period).body_key)
        .and_then(Value::as_array)
        .and_then(|rows| rows.last())
        .and_then(|row| row.get(period.time_key()))
        .and_then(Value::as_str)
        .map(|time| time.get(..8).unwrap_or(time));

    earliest.is_some_and(|earliest| start <= earliest)
}

// =============================================================================
// Trade History
// =============================================================================

/// Account trade history endpoint.
pub const TRADE_ENDPOINT: &str = "/api/dostk/acnt";

/// `api-id` of the account trade history query.
pub const TRADE_API_ID: &str = "kt00009";

/// Body field carrying trade rows.
pub const TRADE_BODY_KEY: &str = "acnt_ord_cntr_prst_array";

/// Request body for one order date.
#[must_use]
pub fn trade_request(order_date: NaiveDate) -> Map<String, Value> {
    [
        ("ord_dt", order_date.format(DATE_FORMAT).to_string()),
        ("qry_tp", "1".to_string()),
        ("stk_bond_tp", "1".to_string()),
        ("mrkt_tp", "0".to_string()),
        ("sell_tp", "0".to_string()),
        ("dmst_stex_tp", "%".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), Value::from(v)))
    .collect()
}

/// Parse a `YYYYMMDD` date.
///
/// # Errors
///
/// Returns [`MarketError::InvalidDate`] if the value does not parse.
pub fn parse_date(raw: &str) -> Result<NaiveDate, MarketError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| MarketError::InvalidDate(raw.to_string()))
}

/// Clamp a requested range to what the server serves.
///
/// # Errors
///
/// Returns [`MarketError::InvalidDate`] if either bound does not parse.
pub fn trade_window(
    start: &str,
    end: Option<&str>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), MarketError> {
    let start = parse_date(start)?.max(today - Duration::days(TRADE_HISTORY_LIMIT_DAYS));
    let end = match end.filter(|e| !e.is_empty()) {
        Some(end) => parse_date(end)?.min(today),
        None => today,
    };
    Ok((start, end))
}

/// Weekdays from `start` to `end`, inclusive.
#[must_use]
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|day| *day <= end)
        .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}
