//! Subscription Frames
//!
//! Builders for the REG / REMOVE control frames that add instrument codes to,
//! or clear feed types from, a server-side subscription group.
//!
//! # Wire Format
//!
//! ```json
//! {"trnm": "REG", "grp_no": "1", "refresh": "1", "data": [{"item": ["005930"], "type": ["0B"]}]}
//! {"trnm": "REMOVE", "grp_no": "1", "refresh": "", "data": [{"type": ["0B", "0D"]}]}
//! ```
//!
//! No client-side record of group membership is kept; the server is the only
//! authority on what a group currently holds.

use serde::Serialize;

use super::realtime::{FeedType, TRNM_REG, TRNM_REMOVE};

/// Maximum instrument codes accepted by a single REG frame.
pub const MAX_CODES_PER_REGISTRATION: usize = 100;

/// Errors raised while building subscription frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Too many codes for one registration.
    #[error("max {max} codes per registration, got {0}", max = MAX_CODES_PER_REGISTRATION)]
    TooManyCodes(usize),
}

/// Whether a registration keeps the group's existing codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    /// Keep existing registrations (`"1"`).
    #[default]
    Keep,
    /// Replace existing registrations (`"0"`).
    Replace,
}

impl Refresh {
    /// Wire value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "1",
            Self::Replace => "0",
        }
    }
}

/// One or more feed codes.
///
/// A single code converts into a one-element list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedTypes(Vec<String>);

impl FeedTypes {
    /// Whether no feed code is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Codes in the given order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FeedTypes {
    fn from(code: &str) -> Self {
        if code.is_empty() {
            Self::default()
        } else {
            Self(vec![code.to_string()])
        }
    }
}

impl From<String> for FeedTypes {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<FeedType> for FeedTypes {
    fn from(feed: FeedType) -> Self {
        Self(vec![feed.code().to_string()])
    }
}

impl From<Vec<String>> for FeedTypes {
    fn from(codes: Vec<String>) -> Self {
        Self(codes)
    }
}

impl From<Vec<FeedType>> for FeedTypes {
    fn from(feeds: Vec<FeedType>) -> Self {
        Self(feeds.iter().map(|feed| feed.code().to_string()).collect())
    }
}

impl From<&[&str]> for FeedTypes {
    fn from(codes: &[&str]) -> Self {
        Self(codes.iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FeedTypes {
    fn from(codes: [&str; N]) -> Self {
        Self::from(codes.as_slice())
    }
}

/// Entry of a subscription frame's `data` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEntry {
    /// Instrument codes (REG only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<String>>,
    /// Feed codes.
    #[serde(rename = "type")]
    pub types: Vec<String>,
}

/// REG or REMOVE control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// `REG` or `REMOVE`.
    pub trnm: &'static str,
    /// Group identifier.
    pub grp_no: String,
    /// `"1"`, `"0"`, or empty for REMOVE.
    pub refresh: String,
    /// Single entry describing codes and feed types.
    pub data: Vec<SubscriptionEntry>,
}

impl SubscriptionRequest {
    /// Build a REG frame for `codes` on one feed.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::TooManyCodes`] if more than
    /// [`MAX_CODES_PER_REGISTRATION`] codes are given.
    pub fn register<S: AsRef<str>>(
        grp_no: &str,
        codes: &[S],
        feed: &FeedType,
        refresh: Refresh,
    ) -> Result<Self, SubscriptionError> {
        if codes.len() > MAX_CODES_PER_REGISTRATION {
            return Err(SubscriptionError::TooManyCodes(codes.len()));
        }

        Ok(Self {
            trnm: TRNM_REG,
            grp_no: grp_no.to_string(),
            refresh: refresh.as_str().to_string(),
            data: vec![SubscriptionEntry {
                item: Some(codes.iter().map(|c| c.as_ref().to_string()).collect()),
                types: vec![feed.code().to_string()],
            }],
        })
    }

    /// Build a REMOVE frame clearing `types` from a group.
    ///
    /// Returns `None` when the group id or the type list is empty; nothing
    /// should be sent in that case.
    #[must_use]
    pub fn remove(grp_no: &str, types: impl Into<FeedTypes>) -> Option<Self> {
        let types = types.into();
        if grp_no.is_empty() || types.is_empty() {
            return None;
        }

        Some(Self {
            trnm: TRNM_REMOVE,
            grp_no: grp_no.to_string(),
            refresh: String::new(),
            data: vec![SubscriptionEntry {
                item: None,
                types: types.0,
            }],
        })
    }

    /// Number of instrument codes carried.
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.data
            .iter()
            .filter_map(|entry| entry.item.as_ref())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{i:06}")).collect()
    }

    #[test]
    fn register_serializes_in_wire_order() {
        let request =
            SubscriptionRequest::register("1", &["005930"], &FeedType::Tick, Refresh::Keep)
                .unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"trnm":"REG","grp_no":"1","refresh":"1","data":[{"item":["005930"],"type":["0B"]}]}"#
        );
    }

    #[test]
    fn register_accepts_exactly_max_codes() {
        let request = SubscriptionRequest::register(
            "1",
            &codes(MAX_CODES_PER_REGISTRATION),
            &FeedType::OrderBook,
            Refresh::Replace,
        )
        .unwrap();
        assert_eq!(request.code_count(), 100);
        assert_eq!(request.refresh, "0");
        assert_eq!(request.data[0].types, vec!["0D"]);
    }

    #[test]
    fn register_rejects_too_many_codes() {
        let err = SubscriptionRequest::register("1", &codes(101), &FeedType::Tick, Refresh::Keep)
            .unwrap_err();
        assert_eq!(err, SubscriptionError::TooManyCodes(101));
    }

    #[test]
    fn remove_serializes_without_items() {
        let request = SubscriptionRequest::remove("1", ["0B", "0D"]).unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"trnm":"REMOVE","grp_no":"1","refresh":"","data":[{"type":["0B","0D"]}]}"#
        );
    }

    #[test]
    fn remove_wraps_single_type() {
        let request = SubscriptionRequest::remove("2", "0B").unwrap();
        assert_eq!(request.data[0].types, vec!["0B"]);

        let request = SubscriptionRequest::remove("2", FeedType::OrderBook).unwrap();
        assert_eq!(request.data[0].types, vec!["0D"]);
    }

    #[test]
    fn remove_is_noop_on_empty_input() {
        assert!(SubscriptionRequest::remove("1", Vec::<String>::new()).is_none());
        assert!(SubscriptionRequest::remove("1", "").is_none());
        assert!(SubscriptionRequest::remove("", ["0B"]).is_none());
    }
}
