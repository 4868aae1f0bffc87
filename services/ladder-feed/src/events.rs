//! Message contract between the ladder core and the feed backend
//!
//! Inbound messages are line-delimited JSON objects discriminated by a
//! `type` field. They are decoded once, at the parse boundary, into the
//! closed [`FeedMessage`] union; everything downstream matches on it.
//!
//! Outbound control commands are single-line JSON objects discriminated by
//! `cmd`, written to the backend's standard input.

use ladder_types::errors::FeedError;
use ladder_types::ticks::Tick;
use serde::{Deserialize, Serialize};

/// A decimal value as it appeared on the wire.
///
/// Kept textual so the tick codec can quantize it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecimalField {
    Number(f64),
    Text(String),
}

impl DecimalField {
    /// Decimal representation suitable for exact parsing.
    pub fn as_decimal_string(&self) -> String {
        match self {
            DecimalField::Number(v) => format!("{}", v),
            DecimalField::Text(s) => s.trim().to_string(),
        }
    }

    /// Lossy float value; `0.0` when unparseable.
    pub fn as_f64(&self) -> f64 {
        match self {
            DecimalField::Number(v) => *v,
            DecimalField::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        }
    }
}

/// A tick index as the backend may send it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TickField {
    Integer(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl TickField {
    /// Resolve to a tick: integers as-is, finite floats rounded half away
    /// from zero, base-10 integer strings parsed. Anything else is absent.
    pub fn resolve(&self) -> Option<Tick> {
        match self {
            TickField::Integer(v) => Some(*v),
            TickField::Float(v) if v.is_finite() => Some(v.round() as Tick),
            TickField::Float(_) => None,
            TickField::Text(s) => s.trim().parse::<Tick>().ok(),
            TickField::Other(_) => None,
        }
    }
}

/// A row of a full ladder message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BookRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<TickField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<DecimalField>,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
}

/// A row of a delta message. Missing sides keep their previous quantity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeltaRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<TickField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<DecimalField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
}

/// `{"type":"trade", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<DecimalField>,
    #[serde(default)]
    pub qty: f64,
    #[serde(default = "default_side")]
    pub side: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<TickField>,
}

fn default_side() -> String {
    "buy".to_string()
}

/// `{"type":"ladder", ...}`: a full replacement of the mirrored window.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderMessage {
    #[serde(default)]
    pub best_bid: f64,
    #[serde(default)]
    pub best_ask: f64,
    #[serde(default)]
    pub tick_size: f64,
    #[serde(default)]
    pub rows: Vec<BookRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_min_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_max_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// `{"type":"ladder_delta", ...}`: an incremental update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LadderDeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_ask: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_size: Option<f64>,
    #[serde(default)]
    pub updates: Vec<DeltaRow>,
    #[serde(default)]
    pub removals: Vec<TickField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_min_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_max_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_tick: Option<Tick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl LadderDeltaMessage {
    /// Reinterpret a delta as a full message, for mirrors that have no book yet.
    pub fn to_full(&self) -> LadderMessage {
        LadderMessage {
            best_bid: self.best_bid.unwrap_or(0.0),
            best_ask: self.best_ask.unwrap_or(0.0),
            tick_size: self.tick_size.unwrap_or(0.0),
            rows: self
                .updates
                .iter()
                .map(|row| BookRow {
                    tick: row.tick.clone(),
                    price: row.price.clone(),
                    bid: row.bid.unwrap_or(0.0),
                    ask: row.ask.unwrap_or(0.0),
                })
                .collect(),
            window_min_tick: self.window_min_tick,
            window_max_tick: self.window_max_tick,
            center_tick: self.center_tick,
            timestamp: self.timestamp,
        }
    }
}

/// Every inbound message the feed backend can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Trade(TradeMessage),
    Ladder(LadderMessage),
    LadderDelta(LadderDeltaMessage),
    /// Any other `type`. Still counts as feed liveness.
    #[serde(other)]
    Unknown,
}

impl FeedMessage {
    /// Decode one complete line.
    pub fn parse(line: &[u8]) -> Result<Self, FeedError> {
        match serde_json::from_slice::<FeedMessage>(line) {
            Ok(message) => Ok(message),
            Err(err) => {
                // Well-formed objects without a string `type` are untyped
                // chatter, not corruption.
                let untyped = serde_json::from_slice::<serde_json::Value>(line)
                    .map(|v| v.is_object() && !v.get("type").map_or(false, |t| t.is_string()))
                    .unwrap_or(false);
                if untyped {
                    Ok(FeedMessage::Unknown)
                } else {
                    Err(FeedError::MalformedMessage {
                        reason: err.to_string(),
                    })
                }
            }
        }
    }

    /// Short label for logs and metrics.
    pub fn type_label(&self) -> &'static str {
        match self {
            FeedMessage::Trade(_) => "trade",
            FeedMessage::Ladder(_) => "ladder",
            FeedMessage::LadderDelta(_) => "ladder_delta",
            FeedMessage::Unknown => "unknown",
        }
    }

    /// Backend timestamp (Unix millis) carried by ladder messages.
    pub fn timestamp_ms(&self) -> Option<i64> {
        match self {
            FeedMessage::Ladder(m) => m.timestamp,
            FeedMessage::LadderDelta(m) => m.timestamp,
            _ => None,
        }
    }
}

/// Control commands written to the backend's standard input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Move the backend's tracked window by `ticks` (positive = up).
    Shift { ticks: i64 },
    /// Drop any manual centre and track the market again.
    CenterAuto,
}

impl ControlCommand {
    /// Serialize as a single line, newline-terminated.
    pub fn to_line(&self) -> Result<String, FeedError> {
        let mut line = serde_json::to_string(self).map_err(|e| FeedError::Io {
            reason: e.to_string(),
        })?;
        line.push('\n');
        Ok(line)
    }
}
