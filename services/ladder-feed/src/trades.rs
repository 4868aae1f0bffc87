//! Trade prints
//!
//! Turns `trade` messages into display prints, snapped to the same tick
//! grid as the book so a print and the level it hit always agree. Keeps a
//! small rolling buffer of the newest prints with a per-ladder monotonic
//! sequence number.

use std::collections::VecDeque;

use ladder_types::market::Side;
use ladder_types::ticks::{approximate_tick, Tick, TickGrid};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::events::TradeMessage;
use crate::snapshot::price_of_tick;

/// Prints kept per ladder.
pub const DEFAULT_PRINT_CAPACITY: usize = 128;

/// A trade ready for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    /// Price snapped to the tick grid when the tick size is known.
    pub price: f64,
    /// Traded value in quote currency (`price × qty`).
    pub quote_qty: f64,
    pub side: Side,
    /// `None` when no tick size has been seen yet.
    pub tick: Option<Tick>,
    /// Local receive time, Unix millis.
    pub time_ms: i64,
    pub seq: u64,
}

/// Bounded history of recent prints.
#[derive(Debug, Clone)]
pub struct PrintBuffer {
    prints: VecDeque<TradePrint>,
    capacity: usize,
    seq: u64,
}

impl Default for PrintBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PRINT_CAPACITY)
    }
}

impl PrintBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            prints: VecDeque::with_capacity(capacity),
            capacity,
            seq: 0,
        }
    }

    /// Record a trade message against the ladder's current tick size.
    ///
    /// Returns `None` for prints with a non-positive price or quantity.
    pub fn record(
        &mut self,
        msg: &TradeMessage,
        grid: Option<&TickGrid>,
        tick_size: f64,
        now_ms: i64,
    ) -> Option<TradePrint> {
        let mut price = msg.price.as_ref().map_or(0.0, |p| p.as_f64());
        let qty = msg.qty;
        if !(price > 0.0) || !(qty > 0.0) {
            trace!(price, qty, "Ignoring empty trade");
            return None;
        }

        let mut tick = msg.tick.as_ref().and_then(|t| t.resolve());
        if let Some(t) = tick {
            if tick_size > 0.0 {
                price = price_of_tick(grid, t, tick_size);
            }
        } else if tick_size > 0.0 {
            let quantized = grid.zip(msg.price.as_ref()).and_then(|(grid, raw)| {
                grid.quantize_str(&raw.as_decimal_string()).ok()
            });
            match quantized {
                Some(q) => {
                    tick = Some(q.tick);
                    price = q.snapped_price;
                }
                None => {
                    tick = approximate_tick(price, tick_size);
                    if let Some(t) = tick {
                        price = t as f64 * tick_size;
                    }
                }
            }
        }

        let quote_qty = price * qty;
        if !(quote_qty > 0.0) {
            return None;
        }

        self.seq += 1;
        let print = TradePrint {
            price,
            quote_qty,
            side: Side::from_wire(&msg.side),
            tick,
            time_ms: now_ms,
            seq: self.seq,
        };
        if self.prints.len() >= self.capacity {
            self.prints.pop_front();
        }
        self.prints.push_back(print);
        Some(print)
    }

    /// Prints from oldest to newest.
    pub fn prints(&self) -> impl Iterator<Item = &TradePrint> {
        self.prints.iter()
    }

    pub fn latest(&self) -> Option<&TradePrint> {
        self.prints.back()
    }

    pub fn len(&self) -> usize {
        self.prints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prints.is_empty()
    }

    /// Last assigned sequence number.
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Drop all prints. Sequence numbers keep increasing.
    pub fn clear(&mut self) {
        self.prints.clear();
    }
}
