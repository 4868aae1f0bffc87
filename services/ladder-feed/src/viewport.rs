//! Viewport controller
//!
//! Maps a fixed number of visible rows at a tick compression onto the
//! mirror's current buffer, and decides when to slide the display window,
//! recenter it, or ask the backend for more depth.
//!
//! Three nested ranges, all inclusive tick ranges:
//!
//! ```text
//! buffer  [buffer_min ............................ buffer_max]   held by the mirror
//! display        [display_min ............ display_max]           prepared window
//! visible                  [bottom .. top]                        rows on screen
//! ```
//!
//! `scroll_offset` is measured in ticks down from `display_max`, so 0 shows
//! the top of the display window. While a buffer is known, the display
//! window never leaves it.

use ladder_types::ticks::Tick;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ViewportConfig;
use crate::order_book::BufferBounds;

/// Work the viewport needs from the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportRequest {
    /// Move the backend window by this many raw ticks (positive = up).
    Shift(i64),
    /// Drop the manual centre and track the market again.
    CenterAuto,
}

/// How an edge check was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// Wheel, keys, explicit scroll.
    Discrete,
    /// Active drag; urgency grows with drag speed.
    Dragging { urgency: u32 },
}

/// A snapshot pull waiting for the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingViewport {
    pub bottom: Tick,
    pub top: Tick,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Per-ladder viewport state.
#[derive(Debug, Clone)]
pub struct ViewportController {
    config: ViewportConfig,
    compression: i64,
    has_buffer: bool,
    buffer_min: Tick,
    buffer_max: Tick,
    center_tick: Tick,
    display_min: Tick,
    display_max: Tick,
    scroll_offset: i64,
    pending_extend_up: bool,
    pending_extend_down: bool,
    queued_shift_up: i64,
    queued_shift_down: i64,
    buffer_revision: u64,
    pending_viewport: Option<PendingViewport>,
    last_built: Option<PendingViewport>,
    pending_auto_center: bool,
    pending_center_target: Option<Tick>,
}

impl ViewportController {
    pub fn new(config: ViewportConfig, compression: i64) -> Self {
        Self {
            config,
            compression: compression.max(1),
            has_buffer: false,
            buffer_min: 0,
            buffer_max: 0,
            center_tick: 0,
            display_min: 0,
            display_max: 0,
            scroll_offset: 0,
            pending_extend_up: false,
            pending_extend_down: false,
            queued_shift_up: 0,
            queued_shift_down: 0,
            buffer_revision: 0,
            pending_viewport: None,
            last_built: None,
            pending_auto_center: false,
            pending_center_target: None,
        }
    }

    /// Forget the buffer and every in-flight request. Used on restart and
    /// on symbol or exchange changes.
    pub fn reset(&mut self) {
        let revision = self.buffer_revision;
        *self = Self::new(self.config.clone(), self.compression);
        // Pulls queued before the reset must not match a later build.
        self.buffer_revision = revision.wrapping_add(1);
    }

    /// React to new buffer bounds from the mirror.
    ///
    /// Resolves in-flight depth shifts, flushes queued ones, completes a
    /// pending recenter, and keeps the display window inside the buffer.
    pub fn on_buffer_bounds(&mut self, bounds: &BufferBounds) -> Vec<ViewportRequest> {
        if bounds.min_tick > bounds.max_tick {
            return Vec::new();
        }
        self.buffer_revision = self.buffer_revision.wrapping_add(1);

        let first = !self.has_buffer;
        self.has_buffer = true;
        self.buffer_min = bounds.min_tick;
        self.buffer_max = bounds.max_tick;
        self.center_tick = bounds.center_tick;

        let mut requests = Vec::new();
        self.flush_queued(Direction::Up, &mut requests);
        self.flush_queued(Direction::Down, &mut requests);

        if self.pending_auto_center {
            self.pending_auto_center = false;
            let target = self
                .pending_center_target
                .take()
                .filter(|t| bounds.contains(*t))
                .unwrap_or(bounds.center_tick);
            debug!(target, "Completing pending recenter");
            self.recenter(target);
        } else if first || self.display_max <= self.display_min {
            self.recenter(bounds.center_tick);
        } else {
            self.slide_into_buffer();
        }
        requests
    }

    /// Mark the mirror contents as changed without new bounds.
    pub fn invalidate(&mut self) {
        self.buffer_revision = self.buffer_revision.wrapping_add(1);
    }

    /// Scroll by whole rows; positive moves toward lower prices.
    pub fn scroll_by(&mut self, rows: i64) -> Vec<ViewportRequest> {
        self.set_scroll_offset(
            self.scroll_offset
                .saturating_add(rows.saturating_mul(self.compression)),
        );
        self.evaluate_edges(EdgeMode::Discrete)
    }

    /// Move by raw ticks during an active drag.
    pub fn drag_by(&mut self, ticks: i64, urgency: u32) -> Vec<ViewportRequest> {
        self.set_scroll_offset(self.scroll_offset.saturating_add(ticks));
        self.evaluate_edges(EdgeMode::Dragging { urgency })
    }

    /// Set the scroll offset, clamped to the display window.
    pub fn set_scroll_offset(&mut self, offset: i64) {
        self.scroll_offset = offset.clamp(0, self.max_scroll());
    }

    /// Slide the display window or request depth when the visible rows come
    /// within `edge_ratio` of either end of the display window.
    pub fn evaluate_edges(&mut self, mode: EdgeMode) -> Vec<ViewportRequest> {
        let mut requests = Vec::new();
        let Some((bottom, top)) = self.visible_range() else {
            return requests;
        };
        let span = self.display_span() as f64;
        let ratio_top = self.display_max.saturating_sub(top) as f64 / span;
        let ratio_bottom = bottom.saturating_sub(self.display_min) as f64 / span;

        if ratio_top <= self.config.edge_ratio {
            self.extend(Direction::Up, mode, &mut requests);
        } else if ratio_bottom <= self.config.edge_ratio {
            self.extend(Direction::Down, mode, &mut requests);
        }
        requests
    }

    /// Center on `target`. Inside the buffer this applies now; otherwise
    /// the backend is asked to track the market and the recenter completes
    /// on the next buffer.
    pub fn center_on(&mut self, target: Tick) -> Vec<ViewportRequest> {
        if self.has_buffer && target >= self.buffer_min && target <= self.buffer_max {
            self.recenter(target);
            self.invalidate();
            return Vec::new();
        }
        self.pending_auto_center = true;
        self.pending_center_target = Some(target);
        vec![ViewportRequest::CenterAuto]
    }

    /// Center on the current spread, or on wherever the backend recenters
    /// when the spread is unknown.
    pub fn center_on_spread(&mut self, spread_tick: Option<Tick>) -> Vec<ViewportRequest> {
        match spread_tick {
            Some(tick) => self.center_on(tick),
            None => {
                self.pending_auto_center = true;
                self.pending_center_target = None;
                vec![ViewportRequest::CenterAuto]
            }
        }
    }

    /// Change ticks per row, keeping the visible centre in place.
    pub fn set_compression(&mut self, compression: i64) {
        let compression = compression.max(1);
        if compression == self.compression {
            return;
        }
        let center = self.visible_center();
        self.compression = compression;
        if let Some(center) = center {
            self.recenter(center);
        }
        self.invalidate();
    }

    /// Change the number of rows on screen, keeping the visible centre.
    pub fn set_visible_rows(&mut self, rows: usize) {
        let rows = rows.max(1);
        if rows == self.config.visible_rows {
            return;
        }
        let center = self.visible_center();
        self.config.visible_rows = rows;
        if let Some(center) = center {
            self.recenter(center);
        }
        self.invalidate();
    }

    /// A shift request could not be sent; allow the next one.
    pub fn cancel_extend(&mut self, up: bool) {
        if up {
            self.pending_extend_up = false;
            self.queued_shift_up = 0;
        } else {
            self.pending_extend_down = false;
            self.queued_shift_down = 0;
        }
    }

    /// Drop a pending recenter whose request could not be sent.
    pub fn cancel_auto_center(&mut self) {
        self.pending_auto_center = false;
        self.pending_center_target = None;
    }

    /// Record the current visible range for the next flush.
    ///
    /// Overwrites any earlier pending pull. Returns true when the slot was
    /// empty, meaning a flush must be scheduled.
    pub fn request_snapshot(&mut self) -> bool {
        let Some((bottom, top)) = self.visible_range() else {
            return false;
        };
        let was_empty = self.pending_viewport.is_none();
        self.pending_viewport = Some(PendingViewport {
            bottom,
            top,
            revision: self.buffer_revision,
        });
        was_empty
    }

    /// Take the pending pull unless the same range was already built at
    /// the same revision.
    pub fn take_pending(&mut self) -> Option<PendingViewport> {
        let pending = self.pending_viewport.take()?;
        if self.last_built == Some(pending) {
            trace!(?pending, "Snapshot pull coalesced");
            return None;
        }
        self.last_built = Some(pending);
        Some(pending)
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.pending_viewport.is_some()
    }

    /// `(bottom, top)` of the rows on screen.
    pub fn visible_range(&self) -> Option<(Tick, Tick)> {
        if !self.has_buffer {
            return None;
        }
        let top = self
            .display_max
            .saturating_sub(self.scroll_offset.clamp(0, self.max_scroll()));
        let bottom = top
            .saturating_sub(self.required_ticks() - 1)
            .max(self.display_min);
        Some((bottom, top))
    }

    /// `(display_min, display_max)`.
    pub fn display_range(&self) -> Option<(Tick, Tick)> {
        self.has_buffer.then_some((self.display_min, self.display_max))
    }

    /// `(buffer_min, buffer_max)`.
    pub fn buffer_range(&self) -> Option<(Tick, Tick)> {
        self.has_buffer.then_some((self.buffer_min, self.buffer_max))
    }

    pub fn has_buffer(&self) -> bool {
        self.has_buffer
    }

    pub fn scroll_offset(&self) -> i64 {
        self.scroll_offset
    }

    pub fn compression(&self) -> i64 {
        self.compression
    }

    pub fn visible_rows(&self) -> usize {
        self.config.visible_rows
    }

    pub fn buffer_revision(&self) -> u64 {
        self.buffer_revision
    }

    pub fn pending_extend(&self, up: bool) -> bool {
        if up {
            self.pending_extend_up
        } else {
            self.pending_extend_down
        }
    }

    /// Ticks queued behind the in-flight shift in one direction.
    pub fn queued_shift(&self, up: bool) -> i64 {
        if up {
            self.queued_shift_up
        } else {
            self.queued_shift_down
        }
    }

    pub fn pending_auto_center(&self) -> bool {
        self.pending_auto_center
    }

    /// Ticks covered by the visible rows.
    pub fn required_ticks(&self) -> i64 {
        (self.config.visible_rows.max(1) as i64).saturating_mul(self.compression)
    }

    // Spans saturate: a declared window may cover most of the i64 range.
    fn display_span(&self) -> i64 {
        self.display_max
            .saturating_sub(self.display_min)
            .saturating_add(1)
    }

    fn buffer_span(&self) -> i64 {
        self.buffer_max.saturating_sub(self.buffer_min).saturating_add(1)
    }

    fn max_scroll(&self) -> i64 {
        if !self.has_buffer {
            return 0;
        }
        self.display_span()
            .saturating_sub(self.required_ticks())
            .max(0)
    }

    fn visible_center(&self) -> Option<Tick> {
        self.visible_range()
            .map(|(bottom, top)| bottom.saturating_add(top.saturating_sub(bottom) / 2))
    }

    /// Place a fresh display window around `target`, clamped into the
    /// buffer, with the visible rows centred on it.
    fn recenter(&mut self, target: Tick) {
        let c = self.compression;
        let visible = self.config.visible_rows.max(1) as i64;
        let background = self.config.background_levels as i64;
        let target_span = visible
            .saturating_mul(2)
            .saturating_mul(c)
            .min(background.saturating_mul(2).saturating_mul(c));
        let span = target_span.min(self.buffer_span()).max(1);
        let target = target.clamp(self.buffer_min, self.buffer_max);

        let mut min = target.saturating_sub((span - 1) / 2).max(self.buffer_min);
        let mut max = min.saturating_add(span - 1);
        if max >= self.buffer_max {
            max = self.buffer_max;
            min = max.saturating_sub(span - 1).max(self.buffer_min);
        }
        self.display_min = min;
        self.display_max = max;

        let top = target.saturating_add(self.required_ticks() / 2);
        self.set_scroll_offset(max.saturating_sub(top));
        trace!(
            target,
            display_min = min,
            display_max = max,
            offset = self.scroll_offset,
            "Viewport recentered"
        );
    }

    /// Clamp the display window into the buffer, keeping its span where
    /// possible and the visible top tick where possible.
    fn slide_into_buffer(&mut self) {
        let old_top = self.visible_range().map(|(_, top)| top);
        let span = self.display_span().min(self.buffer_span()).max(1);

        let mut min = self.display_min.max(self.buffer_min);
        let mut max = min.saturating_add(span - 1);
        if max >= self.buffer_max {
            max = self.buffer_max;
            min = max.saturating_sub(span - 1).max(self.buffer_min);
        }
        self.display_min = min;
        self.display_max = max;
        if let Some(top) = old_top {
            self.set_scroll_offset(max.saturating_sub(top));
        }
    }

    fn extend(&mut self, direction: Direction, mode: EdgeMode, requests: &mut Vec<ViewportRequest>) {
        let c = self.compression;
        let span = self.display_span();
        let headroom = match direction {
            Direction::Up => self.buffer_max.saturating_sub(self.display_max),
            Direction::Down => self.display_min.saturating_sub(self.buffer_min),
        };

        if headroom > 0 {
            let step = match mode {
                EdgeMode::Discrete => (span / 4).max(c.saturating_mul(2)),
                EdgeMode::Dragging { urgency } => {
                    (span / 16)
                        .max(c)
                        .saturating_mul(i64::from(self.clamp_urgency(urgency)))
                }
            }
            .min(headroom);
            // The visible rows keep their ticks; only the window moves.
            match direction {
                Direction::Up => {
                    self.display_min = self.display_min.saturating_add(step);
                    self.display_max = self.display_max.saturating_add(step);
                    self.set_scroll_offset(self.scroll_offset.saturating_add(step));
                }
                Direction::Down => {
                    self.display_min = self.display_min.saturating_sub(step);
                    self.display_max = self.display_max.saturating_sub(step);
                    self.set_scroll_offset(self.scroll_offset.saturating_sub(step));
                }
            }
            trace!(?direction, step, "Display window slid");
            return;
        }

        let urgency = match mode {
            EdgeMode::Discrete => 1,
            EdgeMode::Dragging { urgency } => self.clamp_urgency(urgency),
        };
        let ticks = i64::from(self.config.depth_chunk_levels)
            .saturating_mul(c)
            .saturating_mul(i64::from(urgency));
        if let Some(request) = self.request_shift(direction, ticks) {
            requests.push(request);
        }
    }

    fn clamp_urgency(&self, urgency: u32) -> u32 {
        urgency.clamp(1, self.config.max_urgency.max(1))
    }

    /// One shift in flight per direction; later ones queue up to a cap.
    fn request_shift(&mut self, direction: Direction, ticks: i64) -> Option<ViewportRequest> {
        let cap = i64::from(self.config.max_queued_shift_chunks)
            .saturating_mul(i64::from(self.config.depth_chunk_levels))
            .saturating_mul(self.compression);
        let (pending, queued) = match direction {
            Direction::Up => (&mut self.pending_extend_up, &mut self.queued_shift_up),
            Direction::Down => (&mut self.pending_extend_down, &mut self.queued_shift_down),
        };
        if *pending {
            *queued = queued.saturating_add(ticks).min(cap);
            trace!(?direction, queued = *queued, "Depth shift queued");
            return None;
        }
        *pending = true;
        debug!(?direction, ticks, "Requesting depth shift");
        Some(ViewportRequest::Shift(match direction {
            Direction::Up => ticks,
            Direction::Down => -ticks,
        }))
    }

    /// The in-flight shift in `direction` has landed; send what queued.
    fn flush_queued(&mut self, direction: Direction, requests: &mut Vec<ViewportRequest>) {
        let (pending, queued) = match direction {
            Direction::Up => (&mut self.pending_extend_up, &mut self.queued_shift_up),
            Direction::Down => (&mut self.pending_extend_down, &mut self.queued_shift_down),
        };
        if !*pending {
            return;
        }
        *pending = false;
        let ticks = std::mem::take(queued);
        if ticks > 0 {
            *pending = true;
            requests.push(ViewportRequest::Shift(match direction {
                Direction::Up => ticks,
                Direction::Down => -ticks,
            }));
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Bounds(Tick, i64, i64),
        Scroll(i64),
        Drag(i64, u32),
        Center(Tick),
        Compression(i64),
        Rows(usize),
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-100_000i64..100_000, 1i64..5_000, 0i64..5_000)
                .prop_map(|(min, span, c)| Op::Bounds(min, span, c)),
            (-200i64..200).prop_map(Op::Scroll),
            (-2_000i64..2_000, 0u32..8).prop_map(|(t, u)| Op::Drag(t, u)),
            (-110_000i64..110_000).prop_map(Op::Center),
            (0i64..12).prop_map(Op::Compression),
            (0usize..120).prop_map(Op::Rows),
        ]
    }

    proptest! {
        #[test]
        fn prop_display_stays_inside_buffer(ops in prop::collection::vec(any_op(), 1..60)) {
            let mut vp = ViewportController::new(ViewportConfig::default(), 1);
            for op in ops {
                match op {
                    Op::Bounds(min, span, center) => {
                        vp.on_buffer_bounds(&BufferBounds {
                            min_tick: min,
                            max_tick: min + span - 1,
                            center_tick: min + center % span,
                            tick_size: 1.0,
                        });
                    }
                    Op::Scroll(rows) => { vp.scroll_by(rows); }
                    Op::Drag(ticks, urgency) => { vp.drag_by(ticks, urgency); }
                    Op::Center(tick) => { vp.center_on(tick); }
                    Op::Compression(c) => vp.set_compression(c),
                    Op::Rows(rows) => vp.set_visible_rows(rows),
                }

                if let (Some((dmin, dmax)), Some((bmin, bmax))) = (vp.display_range(), vp.buffer_range()) {
                    prop_assert!(dmin >= bmin, "display_min {} < buffer_min {}", dmin, bmin);
                    prop_assert!(dmax <= bmax, "display_max {} > buffer_max {}", dmax, bmax);
                    prop_assert!(dmin <= dmax);
                    let (bottom, top) = vp.visible_range().unwrap();
                    prop_assert!(bottom >= dmin && top <= dmax && bottom <= top);
                }
            }
        }
    }
}
