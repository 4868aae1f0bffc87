//! In-memory order book mirror
//!
//! Maintains a sparse tick → {bid, ask} map from feed ladder messages.
//! Uses `BTreeMap` so range scans for snapshots walk ticks in ascending
//! order. Prices are never keys; rows are resolved to ticks first.
//!
//! The mirror processes:
//! - `ladder` → clear and rebuild the window
//! - `ladder_delta` → upsert present sides, erase removals, move the window
//!
//! After either call no key lies outside `[buffer_min_tick, buffer_max_tick]`,
//! which bounds memory no matter how long a ladder runs.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use ladder_types::ticks::{approximate_tick, Tick, TickGrid};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::events::{DecimalField, LadderDeltaMessage, LadderMessage, TickField};

/// Resting quantities at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BookEntry {
    pub bid_quantity: f64,
    pub ask_quantity: f64,
}

/// The tick range the mirror currently holds, as declared by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferBounds {
    pub min_tick: Tick,
    pub max_tick: Tick,
    pub center_tick: Tick,
    pub tick_size: f64,
}

impl BufferBounds {
    /// Number of ticks in the window, inclusive.
    pub fn span(&self) -> i64 {
        self.max_tick.saturating_sub(self.min_tick).saturating_add(1)
    }

    pub fn contains(&self, tick: Tick) -> bool {
        tick >= self.min_tick && tick <= self.max_tick
    }
}

/// Local sparse copy of one ladder's order book.
#[derive(Debug, Clone, Default)]
pub struct OrderBookMirror {
    /// Ascending tick → entry.
    book: BTreeMap<Tick, BookEntry>,
    /// Last positive tick size seen; survives messages that omit it.
    tick_size: f64,
    grid: Option<TickGrid>,
    best_bid: f64,
    best_ask: f64,
    buffer_min_tick: Tick,
    buffer_max_tick: Tick,
    center_tick: Tick,
    has_book: bool,
    rows_dropped: u64,
}

impl OrderBookMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, including the tick size.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Replace the mirrored window with a full ladder message.
    ///
    /// Returns the new bounds when the mirror holds a book afterwards.
    pub fn apply_full(&mut self, msg: &LadderMessage) -> Option<BufferBounds> {
        self.best_bid = msg.best_bid;
        self.best_ask = msg.best_ask;
        self.set_tick_size(msg.tick_size);

        self.book.clear();
        for row in &msg.rows {
            let Some(tick) = self.resolve_row_tick(row.tick.as_ref(), row.price.as_ref()) else {
                continue;
            };
            let entry = self.book.entry(tick).or_default();
            entry.bid_quantity = row.bid;
            entry.ask_quantity = row.ask;
        }

        let (first, last) = match (self.book.keys().next(), self.book.keys().next_back()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                self.clear_bounds();
                return None;
            }
        };

        let mut min_tick = msg.window_min_tick.unwrap_or(first);
        let mut max_tick = msg.window_max_tick.unwrap_or(last);
        if min_tick > max_tick {
            min_tick = first;
            max_tick = last;
        }
        self.buffer_min_tick = min_tick;
        self.buffer_max_tick = max_tick;
        self.center_tick = msg
            .center_tick
            .unwrap_or_else(|| midpoint(min_tick, max_tick));

        self.trim_to_window(min_tick, max_tick);
        self.finish_update()
    }

    /// Merge an incremental update into the mirror.
    ///
    /// A mirror without a book treats the delta as a full message.
    pub fn apply_delta(&mut self, msg: &LadderDeltaMessage) -> Option<BufferBounds> {
        if !self.has_book {
            return self.apply_full(&msg.to_full());
        }

        if let Some(best_bid) = msg.best_bid {
            self.best_bid = best_bid;
        }
        if let Some(best_ask) = msg.best_ask {
            self.best_ask = best_ask;
        }
        if let Some(tick_size) = msg.tick_size {
            self.set_tick_size(tick_size);
        }

        for row in &msg.updates {
            let Some(tick) = self.resolve_row_tick(row.tick.as_ref(), row.price.as_ref()) else {
                continue;
            };
            let entry = self.book.entry(tick).or_default();
            if let Some(bid) = row.bid {
                entry.bid_quantity = bid;
            }
            if let Some(ask) = row.ask {
                entry.ask_quantity = ask;
            }
        }

        for removal in &msg.removals {
            if let Some(tick) = removal.resolve() {
                self.book.remove(&tick);
            }
        }

        let min_tick = msg.window_min_tick.unwrap_or(self.buffer_min_tick);
        let max_tick = msg.window_max_tick.unwrap_or(self.buffer_max_tick);
        if min_tick <= max_tick {
            self.buffer_min_tick = min_tick;
            self.buffer_max_tick = max_tick;
        }
        if let Some(center) = msg.center_tick {
            self.center_tick = center;
        }

        self.trim_to_window(self.buffer_min_tick, self.buffer_max_tick);
        self.finish_update()
    }

    /// Erase every entry outside `[min_tick, max_tick]`.
    pub fn trim_to_window(&mut self, min_tick: Tick, max_tick: Tick) {
        if min_tick > max_tick {
            return;
        }
        let before = self.book.len();
        self.book.retain(|tick, _| *tick >= min_tick && *tick <= max_tick);
        let trimmed = before - self.book.len();
        if trimmed > 0 {
            trace!(trimmed, min_tick, max_tick, "Trimmed mirror to window");
        }
    }

    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    /// Exact grid for the current tick size, when one exists.
    pub fn grid(&self) -> Option<&TickGrid> {
        self.grid.as_ref()
    }

    pub fn best_bid(&self) -> f64 {
        self.best_bid
    }

    pub fn best_ask(&self) -> f64 {
        self.best_ask
    }

    pub fn buffer_min_tick(&self) -> Tick {
        self.buffer_min_tick
    }

    pub fn buffer_max_tick(&self) -> Tick {
        self.buffer_max_tick
    }

    pub fn center_tick(&self) -> Tick {
        self.center_tick
    }

    pub fn has_book(&self) -> bool {
        self.has_book
    }

    /// Current bounds, if the mirror holds a book.
    pub fn bounds(&self) -> Option<BufferBounds> {
        self.has_book.then(|| BufferBounds {
            min_tick: self.buffer_min_tick,
            max_tick: self.buffer_max_tick,
            center_tick: self.center_tick,
            tick_size: self.tick_size,
        })
    }

    /// Number of populated ticks.
    pub fn len(&self) -> usize {
        self.book.len()
    }

    pub fn is_empty(&self) -> bool {
        self.book.is_empty()
    }

    pub fn get(&self, tick: Tick) -> Option<&BookEntry> {
        self.book.get(&tick)
    }

    /// Entries with ticks inside `range`, ascending.
    pub fn range(&self, range: RangeInclusive<Tick>) -> impl Iterator<Item = (&Tick, &BookEntry)> {
        self.book.range(range)
    }

    /// All populated ticks, ascending.
    pub fn ticks(&self) -> impl Iterator<Item = &Tick> {
        self.book.keys()
    }

    /// Rows dropped because they had neither a tick nor a resolvable price.
    pub fn rows_dropped(&self) -> u64 {
        self.rows_dropped
    }

    /// Tick of the midpoint between best bid and best ask.
    ///
    /// Falls back to whichever side is known, then to the window centre.
    pub fn spread_center_tick(&self) -> Option<Tick> {
        if !self.has_book {
            return None;
        }
        let bid = self.price_tick(self.best_bid);
        let ask = self.price_tick(self.best_ask);
        match (bid, ask) {
            (Some(b), Some(a)) => Some(midpoint(b, a)),
            (Some(t), None) | (None, Some(t)) => Some(t),
            (None, None) => Some(self.center_tick),
        }
    }

    fn price_tick(&self, price: f64) -> Option<Tick> {
        if !(price > 0.0) {
            return None;
        }
        match &self.grid {
            Some(grid) => grid.quantize_f64(price).ok().map(|q| q.tick),
            None => approximate_tick(price, self.tick_size),
        }
    }

    fn set_tick_size(&mut self, tick_size: f64) {
        if tick_size > 0.0 && tick_size.is_finite() && tick_size != self.tick_size {
            self.tick_size = tick_size;
            self.grid = TickGrid::new(tick_size).ok();
            debug!(tick_size, exact = self.grid.is_some(), "Tick size updated");
        }
    }

    /// Explicit tick first, then the exact codec, then `round(price / tick_size)`.
    fn resolve_row_tick(
        &mut self,
        tick: Option<&TickField>,
        price: Option<&DecimalField>,
    ) -> Option<Tick> {
        if let Some(tick) = tick.and_then(TickField::resolve) {
            return Some(tick);
        }

        let resolved = price.and_then(|price| {
            if !(self.tick_size > 0.0) {
                return None;
            }
            self.grid
                .as_ref()
                .and_then(|grid| grid.quantize_str(&price.as_decimal_string()).ok())
                .map(|q| q.tick)
                .or_else(|| approximate_tick(price.as_f64(), self.tick_size))
        });

        if resolved.is_none() {
            self.rows_dropped += 1;
            debug!(tick_size = self.tick_size, "Dropping ladder row without a resolvable tick");
        }
        resolved
    }

    fn clear_bounds(&mut self) {
        self.has_book = false;
        self.buffer_min_tick = 0;
        self.buffer_max_tick = 0;
        self.center_tick = 0;
    }

    fn finish_update(&mut self) -> Option<BufferBounds> {
        self.has_book = !self.book.is_empty();
        if !self.has_book {
            self.clear_bounds();
            return None;
        }
        self.bounds()
    }
}

/// Midpoint truncated toward zero, without intermediate overflow.
pub(crate) fn midpoint(a: Tick, b: Tick) -> Tick {
    ((a as i128 + b as i128) / 2) as Tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BookRow, DeltaRow};

    fn price_row(price: f64, bid: f64, ask: f64) -> BookRow {
        BookRow {
            tick: None,
            price: Some(DecimalField::Number(price)),
            bid,
            ask,
        }
    }

    fn tick_row(tick: Tick, bid: f64, ask: f64) -> BookRow {
        BookRow {
            tick: Some(TickField::Integer(tick)),
            price: None,
            bid,
            ask,
        }
    }

    fn scenario_one() -> OrderBookMirror {
        let mut mirror = OrderBookMirror::new();
        let msg = LadderMessage {
            best_bid: 100.0,
            best_ask: 100.5,
            tick_size: 0.5,
            rows: vec![price_row(100.0, 5.0, 0.0), price_row(100.5, 0.0, 3.0)],
            ..Default::default()
        };
        mirror.apply_full(&msg);
        mirror
    }

    #[test]
    fn test_empty_mirror() {
        let mirror = OrderBookMirror::new();
        assert!(!mirror.has_book());
        assert!(mirror.is_empty());
        assert!(mirror.bounds().is_none());
        assert!(mirror.spread_center_tick().is_none());
    }

    #[test]
    fn test_full_message_resolves_prices_to_ticks() {
        let mirror = scenario_one();
        let ticks: Vec<Tick> = mirror.ticks().copied().collect();
        assert_eq!(ticks, vec![200, 201]);
        assert_eq!(mirror.get(200).unwrap().bid_quantity, 5.0);
        assert_eq!(mirror.get(201).unwrap().ask_quantity, 3.0);
        assert!(mirror.has_book());
    }

    #[test]
    fn test_full_message_bounds_fall_back_to_keys() {
        let mirror = scenario_one();
        let bounds = mirror.bounds().unwrap();
        assert_eq!(bounds.min_tick, 200);
        assert_eq!(bounds.max_tick, 201);
        assert_eq!(bounds.center_tick, 200);
        assert_eq!(bounds.tick_size, 0.5);
    }

    #[test]
    fn test_full_message_declared_window_and_center() {
        let mut mirror = OrderBookMirror::new();
        let bounds = mirror
            .apply_full(&LadderMessage {
                tick_size: 1.0,
                rows: vec![tick_row(10, 1.0, 0.0), tick_row(90, 0.0, 1.0)],
                window_min_tick: Some(0),
                window_max_tick: Some(100),
                center_tick: Some(42),
                ..Default::default()
            })
            .unwrap();
        assert_eq!((bounds.min_tick, bounds.max_tick, bounds.center_tick), (0, 100, 42));
        assert_eq!(bounds.span(), 101);
    }

    #[test]
    fn test_full_message_trims_rows_outside_declared_window() {
        let mut mirror = OrderBookMirror::new();
        mirror.apply_full(&LadderMessage {
            tick_size: 1.0,
            rows: vec![tick_row(5, 1.0, 0.0), tick_row(50, 1.0, 0.0), tick_row(500, 0.0, 1.0)],
            window_min_tick: Some(10),
            window_max_tick: Some(100),
            ..Default::default()
        });
        let ticks: Vec<Tick> = mirror.ticks().copied().collect();
        assert_eq!(ticks, vec![50]);
    }

    #[test]
    fn test_full_message_replaces_previous_book() {
        let mut mirror = scenario_one();
        mirror.apply_full(&LadderMessage {
            tick_size: 0.5,
            rows: vec![tick_row(300, 1.0, 0.0)],
            ..Default::default()
        });
        assert_eq!(mirror.len(), 1);
        assert!(mirror.get(200).is_none());
    }

    #[test]
    fn test_empty_full_message_clears_book() {
        let mut mirror = scenario_one();
        let bounds = mirror.apply_full(&LadderMessage {
            tick_size: 0.5,
            ..Default::default()
        });
        assert!(bounds.is_none());
        assert!(!mirror.has_book());
        assert_eq!(mirror.buffer_min_tick(), 0);
        assert_eq!(mirror.buffer_max_tick(), 0);
    }

    #[test]
    fn test_delta_removal() {
        let mut mirror = scenario_one();
        mirror.apply_delta(&LadderDeltaMessage {
            removals: vec![TickField::Integer(200)],
            ..Default::default()
        });
        assert!(mirror.get(200).is_none());
        assert!(mirror.get(201).is_some());
        assert_eq!(mirror.len(), 1);
    }

    #[test]
    fn test_delta_missing_side_preserves_previous_value() {
        let mut mirror = scenario_one();
        mirror.apply_delta(&LadderDeltaMessage {
            updates: vec![DeltaRow {
                tick: Some(TickField::Integer(200)),
                ask: Some(7.0),
                ..Default::default()
            }],
            ..Default::default()
        });
        let entry = mirror.get(200).unwrap();
        assert_eq!(entry.bid_quantity, 5.0);
        assert_eq!(entry.ask_quantity, 7.0);
    }

    #[test]
    fn test_delta_without_book_acts_as_full() {
        let mut mirror = OrderBookMirror::new();
        let bounds = mirror.apply_delta(&LadderDeltaMessage {
            tick_size: Some(0.5),
            updates: vec![DeltaRow {
                price: Some(DecimalField::Text("100.0".to_string())),
                bid: Some(2.0),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert!(bounds.is_some());
        assert_eq!(mirror.get(200).unwrap().bid_quantity, 2.0);
        assert_eq!(mirror.get(200).unwrap().ask_quantity, 0.0);
    }

    #[test]
    fn test_delta_moves_window_and_trims() {
        let mut mirror = OrderBookMirror::new();
        mirror.apply_full(&LadderMessage {
            tick_size: 1.0,
            rows: (0..=100).map(|t| tick_row(t, 1.0, 0.0)).collect(),
            window_min_tick: Some(0),
            window_max_tick: Some(100),
            ..Default::default()
        });
        let bounds = mirror
            .apply_delta(&LadderDeltaMessage {
                window_min_tick: Some(50),
                window_max_tick: Some(150),
                center_tick: Some(100),
                ..Default::default()
            })
            .unwrap();
        assert_eq!((bounds.min_tick, bounds.max_tick, bounds.center_tick), (50, 150, 100));
        assert_eq!(mirror.ticks().next().copied(), Some(50));
        assert_eq!(mirror.len(), 51);
    }

    #[test]
    fn test_delta_with_inverted_window_keeps_previous_bounds() {
        let mut mirror = scenario_one();
        mirror.apply_delta(&LadderDeltaMessage {
            window_min_tick: Some(300),
            window_max_tick: Some(100),
            ..Default::default()
        });
        assert_eq!(mirror.buffer_min_tick(), 200);
        assert_eq!(mirror.buffer_max_tick(), 201);
        assert_eq!(mirror.len(), 2);
    }

    #[test]
    fn test_delta_removing_everything_drops_book() {
        let mut mirror = scenario_one();
        let bounds = mirror.apply_delta(&LadderDeltaMessage {
            removals: vec![TickField::Integer(200), TickField::Integer(201)],
            ..Default::default()
        });
        assert!(bounds.is_none());
        assert!(!mirror.has_book());
    }

    #[test]
    fn test_invalid_tick_size_drops_rows_without_tick() {
        let mut mirror = OrderBookMirror::new();
        mirror.apply_full(&LadderMessage {
            best_bid: 10.0,
            tick_size: 0.0,
            rows: vec![price_row(10.0, 1.0, 0.0), tick_row(7, 0.0, 2.0)],
            ..Default::default()
        });
        assert_eq!(mirror.len(), 1);
        assert!(mirror.get(7).is_some());
        assert_eq!(mirror.rows_dropped(), 1);
        assert_eq!(mirror.best_bid(), 10.0);
    }

    #[test]
    fn test_tick_size_survives_messages_without_it() {
        let mut mirror = scenario_one();
        mirror.apply_delta(&LadderDeltaMessage {
            tick_size: Some(0.0),
            updates: vec![DeltaRow {
                price: Some(DecimalField::Number(100.5)),
                bid: Some(1.0),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(mirror.tick_size(), 0.5);
        assert_eq!(mirror.get(201).unwrap().bid_quantity, 1.0);
    }

    #[test]
    fn test_spread_center_tick() {
        let mirror = scenario_one();
        // bid 100.0 → 200, ask 100.5 → 201.
        assert_eq!(mirror.spread_center_tick(), Some(200));
    }

    #[test]
    fn test_midpoint_does_not_overflow() {
        assert_eq!(midpoint(i64::MAX, i64::MAX), i64::MAX);
        assert_eq!(midpoint(-3, 0), -1);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use crate::events::{BookRow, DeltaRow};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Full {
            ticks: Vec<Tick>,
            window: Option<(Tick, Tick)>,
        },
        Delta {
            updates: Vec<Tick>,
            removals: Vec<Tick>,
            window: Option<(Tick, Tick)>,
        },
    }

    fn any_window() -> impl Strategy<Value = Option<(Tick, Tick)>> {
        prop::option::of((-500i64..500, -500i64..500))
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (prop::collection::vec(-600i64..600, 0..40), any_window())
                .prop_map(|(ticks, window)| Op::Full { ticks, window }),
            (
                prop::collection::vec(-600i64..600, 0..20),
                prop::collection::vec(-600i64..600, 0..10),
                any_window()
            )
                .prop_map(|(updates, removals, window)| Op::Delta {
                    updates,
                    removals,
                    window
                }),
        ]
    }

    proptest! {
        #[test]
        fn prop_keys_stay_inside_bounds(ops in prop::collection::vec(any_op(), 1..30)) {
            let mut mirror = OrderBookMirror::new();
            for op in ops {
                match op {
                    Op::Full { ticks, window } => {
                        mirror.apply_full(&LadderMessage {
                            tick_size: 0.5,
                            rows: ticks
                                .iter()
                                .map(|t| BookRow {
                                    tick: Some(TickField::Integer(*t)),
                                    price: None,
                                    bid: 1.0,
                                    ask: 0.0,
                                })
                                .collect(),
                            window_min_tick: window.map(|w| w.0),
                            window_max_tick: window.map(|w| w.1),
                            ..Default::default()
                        });
                    }
                    Op::Delta { updates, removals, window } => {
                        mirror.apply_delta(&LadderDeltaMessage {
                            updates: updates
                                .iter()
                                .map(|t| DeltaRow {
                                    tick: Some(TickField::Integer(*t)),
                                    ask: Some(1.0),
                                    ..Default::default()
                                })
                                .collect(),
                            removals: removals.into_iter().map(TickField::Integer).collect(),
                            window_min_tick: window.map(|w| w.0),
                            window_max_tick: window.map(|w| w.1),
                            ..Default::default()
                        });
                    }
                }

                if mirror.has_book() {
                    let (lo, hi) = (mirror.buffer_min_tick(), mirror.buffer_max_tick());
                    prop_assert!(lo <= hi);
                    for tick in mirror.ticks() {
                        prop_assert!(*tick >= lo && *tick <= hi);
                    }
                } else {
                    prop_assert!(mirror.is_empty());
                }
            }
        }
    }
}
