//! Snapshot Builder
//!
//! Produces a compressed, bucketed, bounded slice of the order book mirror
//! for a requested tick range. Snapshots are plain values: they hold no
//! reference into the mirror and rebuilding against an unchanged mirror
//! yields an identical result.
//!
//! Bids are accumulated into the bucket at `floor_bucket(tick)` and asks
//! into `ceil_bucket(tick)`. Using one rounding for both sides would pull
//! the ask side down by up to `c - 1` ticks when compression is above 1.

use ladder_types::ticks::{ceil_bucket, floor_bucket, Tick, TickGrid};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::order_book::OrderBookMirror;

/// Hard cap on buckets in one snapshot.
pub const MAX_SNAPSHOT_BUCKETS: i128 = 2_000_000;

/// One displayed row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomLevel {
    pub tick: Tick,
    pub price: f64,
    pub bid_quantity: f64,
    pub ask_quantity: f64,
}

/// A bucketed slice of the book, levels in descending tick order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomSnapshot {
    pub tick_size: f64,
    pub best_bid: f64,
    pub best_ask: f64,
    pub compression: i64,
    pub min_tick: Tick,
    pub max_tick: Tick,
    pub levels: Vec<DomLevel>,
}

impl DomSnapshot {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level whose bucket tick equals `tick`.
    pub fn level(&self, tick: Tick) -> Option<&DomLevel> {
        // Levels are sorted descending.
        self.levels
            .binary_search_by(|level| tick.cmp(&level.tick))
            .ok()
            .map(|idx| &self.levels[idx])
    }

    /// Total resting quantity on each side, as `(bids, asks)`.
    pub fn totals(&self) -> (f64, f64) {
        self.levels.iter().fold((0.0, 0.0), |(b, a), level| {
            (b + level.bid_quantity, a + level.ask_quantity)
        })
    }
}

/// Builds [`DomSnapshot`]s at a fixed compression.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotBuilder {
    compression: i64,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self { compression: 1 }
    }
}

impl SnapshotBuilder {
    pub fn new(compression: i64) -> Self {
        Self {
            compression: compression.max(1),
        }
    }

    pub fn compression(&self) -> i64 {
        self.compression
    }

    pub fn set_compression(&mut self, compression: i64) {
        self.compression = compression.max(1);
    }

    /// Bucket `[min_tick, max_tick]` of the mirror.
    ///
    /// Returns an empty snapshot when the mirror has no book, the tick size
    /// is unknown, or the range would exceed [`MAX_SNAPSHOT_BUCKETS`].
    pub fn build(&self, mirror: &OrderBookMirror, min_tick: Tick, max_tick: Tick) -> DomSnapshot {
        let (min_tick, max_tick) = if min_tick <= max_tick {
            (min_tick, max_tick)
        } else {
            (max_tick, min_tick)
        };
        let c = self.compression;

        let mut snapshot = DomSnapshot {
            tick_size: mirror.tick_size(),
            best_bid: mirror.best_bid(),
            best_ask: mirror.best_ask(),
            compression: c,
            min_tick,
            max_tick,
            levels: Vec::new(),
        };
        if !mirror.has_book() || !(mirror.tick_size() > 0.0) {
            return snapshot;
        }

        let bucket_min = floor_bucket(min_tick, c);
        let bucket_max = ceil_bucket(max_tick, c);
        snapshot.min_tick = bucket_min;
        snapshot.max_tick = bucket_max;
        if bucket_max < bucket_min {
            return snapshot;
        }

        let count = (bucket_max as i128 - bucket_min as i128) / c as i128 + 1;
        if count > MAX_SNAPSHOT_BUCKETS {
            warn!(
                min_tick,
                max_tick,
                compression = c,
                buckets = count as u64,
                "Snapshot range exceeds bucket cap"
            );
            return snapshot;
        }
        let count = count as usize;

        let grid = mirror.grid();
        let tick_size = mirror.tick_size();
        let mut buckets: Vec<DomLevel> = (0..count)
            .map(|i| {
                let tick = bucket_min.saturating_add((i as i64).saturating_mul(c));
                DomLevel {
                    tick,
                    price: price_of_tick(grid, tick, tick_size),
                    bid_quantity: 0.0,
                    ask_quantity: 0.0,
                }
            })
            .collect();

        let index_of = |tick: Tick| -> Option<usize> {
            let offset = (tick as i128 - bucket_min as i128) / c as i128;
            usize::try_from(offset).ok().filter(|idx| *idx < count)
        };

        for (&tick, entry) in mirror.range(min_tick..=max_tick) {
            if entry.bid_quantity > 0.0 {
                if let Some(idx) = index_of(floor_bucket(tick, c)) {
                    buckets[idx].bid_quantity += entry.bid_quantity;
                }
            }
            if entry.ask_quantity > 0.0 {
                if let Some(idx) = index_of(ceil_bucket(tick, c)) {
                    buckets[idx].ask_quantity += entry.ask_quantity;
                }
            }
        }

        buckets.reverse();
        snapshot.levels = buckets;
        snapshot
    }
}

/// `tick × tick_size`, exact when the grid is known.
pub fn price_of_tick(grid: Option<&TickGrid>, tick: Tick, tick_size: f64) -> f64 {
    grid.and_then(|g| g.price_of_tick_exact(tick).ok())
        .unwrap_or(tick as f64 * tick_size)
}

/// Display text for a tick's price with the grid's exact decimals.
pub fn format_tick_price(grid: Option<&TickGrid>, tick: Tick, tick_size: f64) -> String {
    grid.and_then(|g| g.format_price(tick))
        .unwrap_or_else(|| format!("{}", tick as f64 * tick_size))
}
