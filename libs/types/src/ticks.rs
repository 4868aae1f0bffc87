//! Decimal tick codec
//!
//! Converts decimal prices to integer tick indices without floating-point
//! drift. A tick size is first mapped onto an integer grid (`tick_size_scaled`
//! at `10^decimals`), then prices are parsed as exact decimals with
//! `rust_decimal` at the same precision and divided in integer space.
//!
//! Quantizing the same decimal price twice always yields the same tick, no
//! matter which message type carried it.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::TickError;
use crate::market::LadderDirection;

/// Integer index of a price level: `price = tick × tick_size`.
pub type Tick = i64;

/// Maximum number of decimals a tick size may carry.
pub const MAX_TICK_DECIMALS: u32 = 12;

/// Absolute tolerance when deciding that `tick_size × 10^d` is an integer.
const SCALE_TOLERANCE: f64 = 1e-9;

/// Nudge applied before rounding anchor-relative tick offsets.
const ANCHOR_NUDGE: f64 = 1e-9;

/// A tick size mapped onto an exact integer grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickGrid {
    tick_size: f64,
    decimals: u32,
    scale: i64,
    tick_size_scaled: i64,
}

/// Result of snapping a price onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantized {
    pub tick: Tick,
    pub snapped_price: f64,
}

impl TickGrid {
    /// Find the smallest `decimals ∈ [0, 12]` for which `tick_size × 10^decimals`
    /// rounds to a positive integer within tolerance.
    pub fn new(tick_size: f64) -> Result<Self, TickError> {
        if !(tick_size > 0.0) || !tick_size.is_finite() {
            return Err(TickError::InvalidTickSize(tick_size));
        }

        let mut scale: i64 = 1;
        for decimals in 0..=MAX_TICK_DECIMALS {
            let scaled = tick_size * scale as f64;
            if scaled.is_finite() {
                let rounded = scaled.round();
                if rounded >= 1.0
                    && rounded < i64::MAX as f64
                    && (scaled - rounded).abs() <= SCALE_TOLERANCE
                {
                    return Ok(Self {
                        tick_size,
                        decimals,
                        scale,
                        tick_size_scaled: rounded as i64,
                    });
                }
            }
            scale *= 10;
        }

        Err(TickError::InvalidTickSize(tick_size))
    }

    pub fn tick_size(&self) -> f64 {
        self.tick_size
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn tick_size_scaled(&self) -> i64 {
        self.tick_size_scaled
    }

    /// Parse a decimal string into an integer at this grid's precision.
    ///
    /// Digits beyond the grid precision are rounded half away from zero,
    /// which is round-half-up on the first truncated digit of the magnitude.
    pub fn parse_scaled(&self, price: &str) -> Result<i128, TickError> {
        let value = parse_decimal(price)?;
        let rounded =
            value.round_dp_with_strategy(self.decimals, RoundingStrategy::MidpointAwayFromZero);
        rounded
            .checked_mul(Decimal::from(self.scale))
            .and_then(|scaled| scaled.to_i128())
            .ok_or_else(|| TickError::Overflow(price.to_string()))
    }

    /// Quantize a decimal price string to its tick and snapped price.
    pub fn quantize_str(&self, price: &str) -> Result<Quantized, TickError> {
        let price_scaled = self.parse_scaled(price)?;
        let step = self.tick_size_scaled as i128;
        let half = step / 2;

        // Separate branches so negative prices round away from zero too.
        let tick = if price_scaled >= 0 {
            (price_scaled + half) / step
        } else {
            -((-price_scaled + half) / step)
        };
        let tick = Tick::try_from(tick).map_err(|_| TickError::Overflow(price.to_string()))?;

        let snapped_price = self.price_of_tick_exact(tick)?;
        Ok(Quantized {
            tick,
            snapped_price,
        })
    }

    /// Quantize a float price through its shortest round-trip decimal form.
    pub fn quantize_f64(&self, price: f64) -> Result<Quantized, TickError> {
        if !price.is_finite() {
            return Err(TickError::InvalidPrice(price.to_string()));
        }
        self.quantize_str(&format!("{}", price))
    }

    /// `tick × tick_size_scaled / scale`, computed from exact integers.
    pub fn price_of_tick_exact(&self, tick: Tick) -> Result<f64, TickError> {
        let scaled = (tick as i128)
            .checked_mul(self.tick_size_scaled as i128)
            .ok_or_else(|| TickError::Overflow(tick.to_string()))?;
        let price = scaled as f64 / self.scale as f64;
        if price.is_finite() {
            Ok(price)
        } else {
            Err(TickError::Overflow(tick.to_string()))
        }
    }

    /// Exact decimal value of a tick.
    pub fn snapped_decimal(&self, tick: Tick) -> Result<Decimal, TickError> {
        let scaled = (tick as i128)
            .checked_mul(self.tick_size_scaled as i128)
            .ok_or_else(|| TickError::Overflow(tick.to_string()))?;
        Decimal::try_from_i128_with_scale(scaled, self.decimals)
            .map_err(|_| TickError::Overflow(tick.to_string()))
    }

    /// Render a tick's price with exactly `decimals` fractional digits.
    pub fn format_price(&self, tick: Tick) -> Option<String> {
        let scaled = (tick as i128).checked_mul(self.tick_size_scaled as i128)?;
        let negative = scaled < 0;
        let magnitude = scaled.unsigned_abs();
        let scale = self.scale as u128;
        let int_part = magnitude / scale;
        let frac_part = magnitude % scale;
        let sign = if negative { "-" } else { "" };

        if self.decimals == 0 {
            return Some(format!("{}{}", sign, int_part));
        }
        Some(format!(
            "{}{}.{:0width$}",
            sign,
            int_part,
            frac_part,
            width = self.decimals as usize
        ))
    }
}

/// Quantize `price` onto the grid of `tick_size`.
///
/// Returns `(tick, snapped_price)`. Fails with [`TickError::InvalidTickSize`]
/// when no grid exists for the tick size.
pub fn quantize(price: &str, tick_size: f64) -> Result<(Tick, f64), TickError> {
    let grid = TickGrid::new(tick_size)?;
    let q = grid.quantize_str(price)?;
    Ok((q.tick, q.snapped_price))
}

/// Best-effort `round(price / tick_size)` for callers that have neither an
/// explicit tick nor a valid grid.
pub fn approximate_tick(price: f64, tick_size: f64) -> Option<Tick> {
    if !(tick_size > 0.0) || !price.is_finite() {
        return None;
    }
    let ratio = (price / tick_size).round();
    if ratio.is_finite() {
        Some(ratio as Tick)
    } else {
        None
    }
}

/// Tick offset of `price` relative to a moving ladder anchor.
///
/// Descending ladders count rows downward from the anchor, ascending ladders
/// upward. The offset is nudged by `±1e-9` before rounding so prices sitting
/// on a row boundary do not flicker between neighbours.
pub fn tick_for_price(
    price: f64,
    tick_size: f64,
    anchor_price: f64,
    direction: LadderDirection,
) -> Result<Tick, TickError> {
    if !(tick_size > 0.0) || !tick_size.is_finite() {
        return Err(TickError::InvalidTickSize(tick_size));
    }
    if !price.is_finite() || !anchor_price.is_finite() {
        return Err(TickError::InvalidPrice(price.to_string()));
    }

    let delta = match direction {
        LadderDirection::Descending => (anchor_price - price) / tick_size,
        LadderDirection::Ascending => (price - anchor_price) / tick_size,
    };
    let nudged = delta + if delta >= 0.0 { ANCHOR_NUDGE } else { -ANCHOR_NUDGE };
    Ok(nudged.round() as Tick)
}

/// Largest multiple of `compression` not above `tick`.
pub fn floor_bucket(tick: Tick, compression: i64) -> Tick {
    let c = compression.max(1);
    if c == 1 {
        return tick;
    }
    tick.saturating_sub(tick.rem_euclid(c))
}

/// Smallest multiple of `compression` not below `tick`.
pub fn ceil_bucket(tick: Tick, compression: i64) -> Tick {
    let c = compression.max(1);
    if c == 1 {
        return tick;
    }
    let rem = tick.rem_euclid(c);
    if rem == 0 {
        tick
    } else {
        (tick - rem).saturating_add(c)
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, TickError> {
    let trimmed = raw.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if unsigned.is_empty() {
        return Err(TickError::InvalidPrice(raw.to_string()));
    }
    Decimal::from_str(unsigned)
        .or_else(|_| Decimal::from_scientific(unsigned))
        .map_err(|_| TickError::InvalidPrice(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_for_common_tick_sizes() {
        let grid = TickGrid::new(0.5).unwrap();
        assert_eq!(grid.decimals(), 1);
        assert_eq!(grid.tick_size_scaled(), 5);
        assert_eq!(grid.scale(), 10);

        let grid = TickGrid::new(0.01).unwrap();
        assert_eq!(grid.decimals(), 2);
        assert_eq!(grid.tick_size_scaled(), 1);

        let grid = TickGrid::new(25.0).unwrap();
        assert_eq!(grid.decimals(), 0);
        assert_eq!(grid.tick_size_scaled(), 25);

        let grid = TickGrid::new(0.00001).unwrap();
        assert_eq!(grid.decimals(), 5);
        assert_eq!(grid.tick_size_scaled(), 1);
    }

    #[test]
    fn test_invalid_tick_sizes() {
        assert!(matches!(TickGrid::new(0.0), Err(TickError::InvalidTickSize(_))));
        assert!(matches!(TickGrid::new(-0.5), Err(TickError::InvalidTickSize(_))));
        assert!(TickGrid::new(f64::NAN).is_err());
        assert!(TickGrid::new(f64::INFINITY).is_err());
        // More than 12 decimals.
        assert!(TickGrid::new(1e-14).is_err());
    }

    #[test]
    fn test_quantize_on_grid() {
        assert_eq!(quantize("100.0", 0.5).unwrap(), (200, 100.0));
        assert_eq!(quantize("100.5", 0.5).unwrap(), (201, 100.5));
        assert_eq!(quantize("0.00012", 0.00001).unwrap().0, 12);
    }

    #[test]
    fn test_quantize_rounds_half_away_from_zero() {
        // 100.25 sits exactly between ticks 200 and 201.
        assert_eq!(quantize("100.25", 0.5).unwrap().0, 201);
        assert_eq!(quantize("100.24", 0.5).unwrap().0, 200);
        assert_eq!(quantize("-100.25", 0.5).unwrap().0, -201);
        assert_eq!(quantize("-100.24", 0.5).unwrap().0, -200);
    }

    #[test]
    fn test_quantize_truncated_digit_rounding() {
        // Grid precision is 2 decimals; the third digit decides.
        assert_eq!(quantize("1.005", 0.01).unwrap().0, 101);
        assert_eq!(quantize("1.0049", 0.01).unwrap().0, 100);
    }

    #[test]
    fn test_quantize_avoids_float_drift() {
        // 0.3 / 0.1 is 2.9999999999999996 in binary floating point.
        assert_eq!(quantize("0.3", 0.1).unwrap().0, 3);
        let grid = TickGrid::new(0.1).unwrap();
        assert_eq!(grid.quantize_f64(0.3).unwrap().tick, 3);
        assert_eq!(grid.quantize_f64(0.3).unwrap().snapped_price, 0.3);
    }

    #[test]
    fn test_quantize_accepts_signs_and_whitespace() {
        assert_eq!(quantize(" +2.5 ", 0.5).unwrap().0, 5);
        assert!(matches!(quantize("", 0.5), Err(TickError::InvalidPrice(_))));
        assert!(matches!(quantize("abc", 0.5), Err(TickError::InvalidPrice(_))));
    }

    #[test]
    fn test_quantize_rejects_bad_tick_size() {
        assert!(matches!(
            quantize("100.0", 0.0),
            Err(TickError::InvalidTickSize(_))
        ));
    }

    #[test]
    fn test_quantize_f64_rejects_non_finite() {
        let grid = TickGrid::new(0.5).unwrap();
        assert!(grid.quantize_f64(f64::NAN).is_err());
    }

    #[test]
    fn test_approximate_tick() {
        assert_eq!(approximate_tick(100.5, 0.5), Some(201));
        assert_eq!(approximate_tick(100.5, 0.0), None);
        assert_eq!(approximate_tick(f64::NAN, 0.5), None);
    }

    #[test]
    fn test_tick_for_price_descending_and_ascending() {
        let t = tick_for_price(99.0, 0.5, 100.0, LadderDirection::Descending).unwrap();
        assert_eq!(t, 2);
        let t = tick_for_price(99.0, 0.5, 100.0, LadderDirection::Ascending).unwrap();
        assert_eq!(t, -2);
        assert!(tick_for_price(99.0, 0.0, 100.0, LadderDirection::Ascending).is_err());
    }

    #[test]
    fn test_tick_for_price_nudges_boundary() {
        // (0.3 - 0.0) / 0.1 lands just below 3 in floating point.
        let t = tick_for_price(0.3, 0.1, 0.0, LadderDirection::Ascending).unwrap();
        assert_eq!(t, 3);
        // An exact half row rounds away from the anchor.
        let t = tick_for_price(100.25, 0.5, 100.0, LadderDirection::Ascending).unwrap();
        assert_eq!(t, 1);
    }

    #[test]
    fn test_bucket_helpers_positive() {
        assert_eq!(floor_bucket(7, 5), 5);
        assert_eq!(ceil_bucket(7, 5), 10);
        assert_eq!(floor_bucket(10, 5), 10);
        assert_eq!(ceil_bucket(10, 5), 10);
    }

    #[test]
    fn test_bucket_helpers_negative_do_not_truncate_toward_zero() {
        assert_eq!(floor_bucket(-7, 5), -10);
        assert_eq!(ceil_bucket(-7, 5), -5);
        assert_eq!(floor_bucket(-10, 5), -10);
        assert_eq!(ceil_bucket(-10, 5), -10);
    }

    #[test]
    fn test_bucket_helpers_identity_without_compression() {
        assert_eq!(floor_bucket(-7, 1), -7);
        assert_eq!(ceil_bucket(-7, 1), -7);
        assert_eq!(floor_bucket(13, 0), 13);
        assert_eq!(ceil_bucket(13, -4), 13);
    }

    #[test]
    fn test_format_price() {
        let grid = TickGrid::new(0.5).unwrap();
        assert_eq!(grid.format_price(201).unwrap(), "100.5");
        assert_eq!(grid.format_price(-3).unwrap(), "-1.5");

        let grid = TickGrid::new(0.0001).unwrap();
        assert_eq!(grid.format_price(5).unwrap(), "0.0005");

        let grid = TickGrid::new(5.0).unwrap();
        assert_eq!(grid.format_price(7).unwrap(), "35");
    }

    #[test]
    fn test_snapped_decimal_is_exact() {
        let grid = TickGrid::new(0.1).unwrap();
        assert_eq!(
            grid.snapped_decimal(3).unwrap(),
            Decimal::from_str("0.3").unwrap()
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn grid_price(tick: i64, tick_size_scaled: i64, decimals: u32) -> String {
        let scaled = tick as i128 * tick_size_scaled as i128;
        let scale = 10i128.pow(decimals);
        let sign = if scaled < 0 { "-" } else { "" };
        let magnitude = scaled.abs();
        if decimals == 0 {
            format!("{}{}", sign, magnitude)
        } else {
            format!(
                "{}{}.{:0width$}",
                sign,
                magnitude / scale,
                magnitude % scale,
                width = decimals as usize
            )
        }
    }

    proptest! {
        #[test]
        fn prop_quantize_round_trip(
            decimals in 0u32..=MAX_TICK_DECIMALS,
            tick_size_scaled in 1i64..=10_000,
            tick in -1_000_000_000i64..=1_000_000_000,
        ) {
            let tick_size = tick_size_scaled as f64 / 10f64.powi(decimals as i32);
            let price = grid_price(tick, tick_size_scaled, decimals);

            let grid = TickGrid::new(tick_size).unwrap();
            let q = grid.quantize_str(&price).unwrap();
            prop_assert_eq!(q.tick, tick);

            let reconstructed = grid.snapped_decimal(q.tick).unwrap();
            prop_assert_eq!(reconstructed, Decimal::from_str(&price).unwrap());
        }

        #[test]
        fn prop_quantize_is_deterministic(
            decimals in 0u32..=6,
            tick_size_scaled in 1i64..=1_000,
            whole in -1_000_000i64..=1_000_000,
            frac in 0u32..1_000_000,
        ) {
            let tick_size = tick_size_scaled as f64 / 10f64.powi(decimals as i32);
            let price = format!("{}.{:06}", whole, frac);
            let a = quantize(&price, tick_size).unwrap();
            let b = quantize(&price, tick_size).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_buckets_bracket_tick(tick in -1_000_000i64..=1_000_000, c in 1i64..=50) {
            let lo = floor_bucket(tick, c);
            let hi = ceil_bucket(tick, c);
            prop_assert!(lo <= tick && tick <= hi);
            prop_assert_eq!(lo.rem_euclid(c), 0);
            prop_assert_eq!(hi.rem_euclid(c), 0);
            prop_assert!(hi - lo < 2 * c);
        }
    }
}
