//! Stream Codec
//!
//! Routing decode for inbound frames and JSON encoding for outbound control
//! frames.
//!
//! The decoder reads only `trnm` and, for `REAL` frames, each item's `type`.
//! Field values are borrowed from the raw text and every other field is
//! skipped, so a 200-item `REAL` batch costs one scan and no per-value
//! allocation.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::domain::realtime::{TRNM_REAL, routing_key};

/// Codec errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(String),

    /// A `REAL` frame without an item list.
    #[error("REAL frame has no data list")]
    MissingData,
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Routing fields of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedFrame {
    /// Normalized `trnm`.
    pub trnm: String,
    /// Callback keys in dispatch order: each item's `type` for `REAL`
    /// frames, otherwise `trnm` alone.
    pub keys: Vec<String>,
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    trnm: Cow<'a, str>,
    #[serde(default, borrow)]
    data: Option<Vec<ItemKey<'a>>>,
}

#[derive(Deserialize)]
struct ItemKey<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
}

#[derive(Deserialize)]
struct Head<'a> {
    #[serde(borrow)]
    trnm: Cow<'a, str>,
}

/// Decode the routing fields of a raw frame.
///
/// Control frames whose `data` is not an item list still route by `trnm`;
/// only `REAL` frames need the item shape.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object with a string `trnm`,
/// or if a `REAL` frame lacks a well-formed item list.
pub fn decode_routing(raw: &str) -> Result<RoutedFrame, CodecError> {
    let (trnm, items) = match serde_json::from_str::<Envelope<'_>>(raw) {
        Ok(envelope) => (routing_key(&envelope.trnm), envelope.data),
        Err(err) => {
            let Ok(head) = serde_json::from_str::<Head<'_>>(raw) else {
                return Err(err.into());
            };
            let trnm = routing_key(&head.trnm);
            if trnm == TRNM_REAL {
                return Err(err.into());
            }
            (trnm, None)
        }
    };

    if trnm != TRNM_REAL {
        return Ok(RoutedFrame {
            keys: vec![trnm.clone()],
            trnm,
        });
    }

    let items = items.ok_or(CodecError::MissingData)?;
    Ok(RoutedFrame {
        keys: items.iter().map(|item| routing_key(&item.kind)).collect(),
        trnm,
    })
}

/// Encode an outbound frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}
