//! One ladder instance
//!
//! Owns the feed connection, order book mirror, snapshot builder, viewport
//! and trade prints of a single ladder column, and routes feed events and
//! user input between them. Everything here is synchronous; the runtime
//! loop executes the [`SessionOutput`]s.

use std::sync::Arc;
use std::time::Instant;

use ladder_types::errors::FeedError;
use ladder_types::ticks::Tick;
use tracing::{debug, warn};

use crate::config::LadderConfig;
use crate::events::FeedMessage;
use crate::feed::connection::{FeedAction, FeedConnection, FeedEvent, FeedState};
use crate::feed::proxy::SystemProxyResolver;
use crate::metrics::LadderMetrics;
use crate::order_book::OrderBookMirror;
use crate::snapshot::{DomSnapshot, SnapshotBuilder};
use crate::trades::{PrintBuffer, TradePrint};
use crate::viewport::{PendingViewport, ViewportController, ViewportRequest};

/// Work for the runtime produced by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    /// Process-facing action for the feed driver.
    Driver(FeedAction),
    /// Decorated status text.
    Status(String),
    /// A new trade print.
    Print(TradePrint),
}

/// Per-ladder state and its wiring.
pub struct LadderSession {
    config: LadderConfig,
    connection: FeedConnection,
    mirror: OrderBookMirror,
    builder: SnapshotBuilder,
    viewport: ViewportController,
    prints: PrintBuffer,
    metrics: Arc<LadderMetrics>,
    last_ping_ms: Option<u64>,
    last_failure: Option<FeedError>,
}

impl LadderSession {
    pub fn new(config: LadderConfig, resolver: Box<dyn SystemProxyResolver + Send>) -> Self {
        let metrics = Arc::new(LadderMetrics::new());
        let compression = config.compression.max(1);
        Self {
            connection: FeedConnection::new(config.feed.clone(), resolver, Arc::clone(&metrics)),
            mirror: OrderBookMirror::new(),
            builder: SnapshotBuilder::new(compression),
            viewport: ViewportController::new(config.viewport.clone(), compression),
            prints: PrintBuffer::new(config.print_capacity),
            metrics,
            last_ping_ms: None,
            last_failure: None,
            config,
        }
    }

    /// Start the backend.
    pub fn start(&mut self, now: Instant) -> Vec<SessionOutput> {
        let actions = self.connection.start(now);
        self.process(actions, 0)
    }

    /// Restart on a new symbol, depth or exchange; an empty exchange keeps
    /// the current one.
    pub fn restart_with(
        &mut self,
        symbol: &str,
        levels: u32,
        exchange: &str,
        now: Instant,
    ) -> Vec<SessionOutput> {
        let actions = self.connection.restart_with(symbol, levels, exchange, now);
        self.config.feed = self.connection.config().clone();
        self.process(actions, 0)
    }

    pub fn stop(&mut self) -> Vec<SessionOutput> {
        let actions = self.connection.stop();
        self.process(actions, 0)
    }

    /// Apply a driver event. `now_ms` is wall-clock Unix millis, used for
    /// ping and print timestamps.
    pub fn handle_event(&mut self, event: FeedEvent, now: Instant, now_ms: i64) -> Vec<SessionOutput> {
        let actions = self.connection.handle(event, now);
        self.process(actions, now_ms)
    }

    /// Scroll by rows; positive moves toward lower prices.
    pub fn scroll_by(&mut self, rows: i64) -> Vec<SessionOutput> {
        let requests = self.viewport.scroll_by(rows);
        self.after_viewport_change(requests)
    }

    /// Drag by raw ticks at an urgency factor.
    pub fn drag_by(&mut self, ticks: i64, urgency: u32) -> Vec<SessionOutput> {
        let requests = self.viewport.drag_by(ticks, urgency);
        self.after_viewport_change(requests)
    }

    /// Center the display on the current spread.
    pub fn center_on_spread(&mut self) -> Vec<SessionOutput> {
        let spread = self.mirror.spread_center_tick();
        let requests = self.viewport.center_on_spread(spread);
        self.after_viewport_change(requests)
    }

    pub fn center_on(&mut self, tick: Tick) -> Vec<SessionOutput> {
        let requests = self.viewport.center_on(tick);
        self.after_viewport_change(requests)
    }

    /// Change ticks per row.
    pub fn set_compression(&mut self, compression: i64) -> Vec<SessionOutput> {
        let compression = compression.max(1);
        self.config.compression = compression;
        self.builder.set_compression(compression);
        self.viewport.set_compression(compression);
        self.after_viewport_change(Vec::new())
    }

    pub fn set_visible_rows(&mut self, rows: usize) -> Vec<SessionOutput> {
        self.viewport.set_visible_rows(rows);
        self.config.viewport.visible_rows = self.viewport.visible_rows();
        self.after_viewport_change(Vec::new())
    }

    /// Queue a snapshot pull for the next flush.
    pub fn request_render(&mut self) {
        self.viewport.request_snapshot();
    }

    pub fn has_pending_snapshot(&self) -> bool {
        self.viewport.has_pending_snapshot()
    }

    /// Build the pending snapshot, if any pull survived coalescing.
    pub fn flush(&mut self) -> Option<DomSnapshot> {
        let PendingViewport { bottom, top, .. } = self.viewport.take_pending()?;
        Some(self.build_snapshot(bottom, top))
    }

    /// Build `[min_tick, max_tick]` at the current compression.
    pub fn build_snapshot(&self, min_tick: Tick, max_tick: Tick) -> DomSnapshot {
        let started = Instant::now();
        let snapshot = self.builder.build(&self.mirror, min_tick, max_tick);
        let elapsed = u64::try_from(started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.metrics.record_snapshot(elapsed);
        snapshot
    }

    pub fn config(&self) -> &LadderConfig {
        &self.config
    }

    pub fn state(&self) -> FeedState {
        self.connection.state()
    }

    pub fn connection(&self) -> &FeedConnection {
        &self.connection
    }

    pub fn mirror(&self) -> &OrderBookMirror {
        &self.mirror
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn prints(&self) -> &PrintBuffer {
        &self.prints
    }

    pub fn metrics(&self) -> &Arc<LadderMetrics> {
        &self.metrics
    }

    /// Latest feed latency measured from ladder timestamps.
    pub fn last_ping_ms(&self) -> Option<u64> {
        self.last_ping_ms
    }

    pub fn last_failure(&self) -> Option<&FeedError> {
        self.last_failure.as_ref()
    }

    fn process(&mut self, actions: Vec<FeedAction>, now_ms: i64) -> Vec<SessionOutput> {
        let mut out = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                FeedAction::Reset => self.reset_ladder(),
                FeedAction::Deliver(message) => self.apply_message(message, now_ms, &mut out),
                FeedAction::Status(text) => out.push(SessionOutput::Status(text)),
                FeedAction::Failure(err) => {
                    if !err.is_recoverable() {
                        warn!(error = %err, "Feed halted");
                    }
                    self.last_failure = Some(err);
                }
                driver => out.push(SessionOutput::Driver(driver)),
            }
        }
        out
    }

    fn reset_ladder(&mut self) {
        debug!(symbol = %self.connection.config().symbol, "Resetting ladder state");
        self.mirror.reset();
        self.viewport.reset();
        self.prints.clear();
        self.last_ping_ms = None;
    }

    fn apply_message(&mut self, message: FeedMessage, now_ms: i64, out: &mut Vec<SessionOutput>) {
        if let Some(ts) = message.timestamp_ms() {
            let ping = now_ms.saturating_sub(ts).max(0) as u64;
            self.last_ping_ms = Some(ping);
            self.metrics.record_ping(ping);
        }

        let bounds = match &message {
            FeedMessage::Trade(trade) => {
                let print = self.prints.record(
                    trade,
                    self.mirror.grid(),
                    self.mirror.tick_size(),
                    now_ms,
                );
                if let Some(print) = print {
                    self.metrics.record_print();
                    out.push(SessionOutput::Print(print));
                }
                return;
            }
            FeedMessage::Ladder(full) => self.mirror.apply_full(full),
            FeedMessage::LadderDelta(delta) => self.mirror.apply_delta(delta),
            FeedMessage::Unknown => return,
        };

        let requests = match bounds {
            Some(bounds) => self.viewport.on_buffer_bounds(&bounds),
            None => {
                self.viewport.invalidate();
                Vec::new()
            }
        };
        out.extend(self.after_viewport_change(requests));
    }

    /// Forward viewport requests to the backend and queue a repaint.
    fn after_viewport_change(&mut self, requests: Vec<ViewportRequest>) -> Vec<SessionOutput> {
        let mut out = Vec::new();
        for request in requests {
            match request {
                ViewportRequest::Shift(ticks) => match self.connection.shift_window(ticks) {
                    Some(action) => {
                        self.metrics.record_shift_request();
                        out.push(SessionOutput::Driver(action));
                    }
                    None => self.viewport.cancel_extend(ticks > 0),
                },
                ViewportRequest::CenterAuto => match self.connection.reset_to_automatic_center() {
                    Some(action) => {
                        self.metrics.record_center_request();
                        out.push(SessionOutput::Driver(action));
                    }
                    None => self.viewport.cancel_auto_center(),
                },
            }
        }
        self.viewport.request_snapshot();
        out
    }
}
