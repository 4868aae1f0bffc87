//! Async runtime loop for one ladder
//!
//! A single task owns the session and its feed driver. Child process
//! output, watchdog and restart timers, and UI commands are consumed one at
//! a time by one `tokio::select!`, so no state is shared across threads.
//! Snapshot pulls are flushed when nothing else is ready, which coalesces
//! bursts of input into one build. A backend that never pauses still gets a
//! flush after [`MAX_EVENTS_PER_FLUSH`] driver events.

use std::collections::VecDeque;
use std::time::Instant;

use chrono::Utc;
use ladder_types::ticks::Tick;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::SettingsProvider;
use crate::feed::driver::FeedDriver;
use crate::session::{LadderSession, SessionOutput};
use crate::snapshot::DomSnapshot;
use crate::trades::TradePrint;

/// Driver events handled before a pending snapshot is flushed regardless
/// of further ready input.
pub const MAX_EVENTS_PER_FLUSH: usize = 64;

/// Receives built snapshots and trade prints.
pub trait RenderTarget: Send {
    fn render(&mut self, snapshot: &DomSnapshot);

    fn print(&mut self, _print: &TradePrint) {}
}

/// Receives decorated status text.
pub trait StatusSink: Send {
    fn status(&mut self, message: &str);
}

/// UI input for a running ladder.
#[derive(Debug, Clone, PartialEq)]
pub enum LadderCommand {
    /// Rows; positive moves toward lower prices.
    Scroll(i64),
    Drag { ticks: i64, urgency: u32 },
    CenterOnSpread,
    CenterOn(Tick),
    SetCompression(i64),
    SetVisibleRows(usize),
    Restart {
        symbol: String,
        levels: u32,
        exchange: String,
    },
    Stop,
    RequestRender,
    /// Stop the backend and end the loop.
    Shutdown,
}

/// Collaborators for [`run_ladder`].
pub struct LadderHooks<R, S> {
    pub render: R,
    pub status: S,
    /// Receives compression changes for persistence.
    pub settings: Option<Box<dyn SettingsProvider + Send>>,
}

/// Run one ladder until `Shutdown` arrives or the command channel closes.
///
/// Returns the session and hooks so callers can inspect the final state.
pub async fn run_ladder<R, S>(
    mut session: LadderSession,
    mut commands: mpsc::Receiver<LadderCommand>,
    mut hooks: LadderHooks<R, S>,
) -> (LadderSession, LadderHooks<R, S>)
where
    R: RenderTarget,
    S: StatusSink,
{
    let mut driver = FeedDriver::new(session.config().feed.kill_timeout());
    let mut queue: VecDeque<SessionOutput> = session.start(Instant::now()).into();
    let mut events_since_flush = 0usize;
    info!(symbol = %session.config().feed.symbol, "Ladder runtime started");

    loop {
        drain(&mut queue, &mut session, &mut driver, &mut hooks).await;
        let flush_due = session.has_pending_snapshot();
        if flush_due && events_since_flush >= MAX_EVENTS_PER_FLUSH {
            flush(&mut session, &mut hooks);
            events_since_flush = 0;
            continue;
        }

        tokio::select! {
            biased;

            command = commands.recv() => {
                let Some(command) = command else { break };
                if command == LadderCommand::Shutdown {
                    break;
                }
                queue.extend(dispatch(&mut session, command, &mut hooks));
            }
            event = driver.next_event() => {
                events_since_flush = events_since_flush.saturating_add(1);
                let now_ms = Utc::now().timestamp_millis();
                queue.extend(session.handle_event(event, Instant::now(), now_ms));
            }
            _ = std::future::ready(()), if flush_due => {
                flush(&mut session, &mut hooks);
                events_since_flush = 0;
            }
        }
    }

    queue.extend(session.stop());
    drain(&mut queue, &mut session, &mut driver, &mut hooks).await;
    info!(symbol = %session.config().feed.symbol, "Ladder runtime stopped");
    (session, hooks)
}

fn flush<R, S>(session: &mut LadderSession, hooks: &mut LadderHooks<R, S>)
where
    R: RenderTarget,
{
    if let Some(snapshot) = session.flush() {
        hooks.render.render(&snapshot);
    }
}

/// Execute queued outputs. Events the driver produces synchronously are
/// handled immediately and their outputs run before anything queued later.
async fn drain<R, S>(
    queue: &mut VecDeque<SessionOutput>,
    session: &mut LadderSession,
    driver: &mut FeedDriver,
    hooks: &mut LadderHooks<R, S>,
) where
    R: RenderTarget,
    S: StatusSink,
{
    while let Some(output) = queue.pop_front() {
        match output {
            SessionOutput::Driver(action) => {
                if let Some(event) = driver.apply(&action).await {
                    let now_ms = Utc::now().timestamp_millis();
                    let follow_up = session.handle_event(event, Instant::now(), now_ms);
                    for output in follow_up.into_iter().rev() {
                        queue.push_front(output);
                    }
                }
            }
            SessionOutput::Status(text) => hooks.status.status(&text),
            SessionOutput::Print(print) => hooks.render.print(&print),
        }
    }
}

fn dispatch<R, S>(
    session: &mut LadderSession,
    command: LadderCommand,
    hooks: &mut LadderHooks<R, S>,
) -> Vec<SessionOutput> {
    debug!(?command, "Ladder command");
    match command {
        LadderCommand::Scroll(rows) => session.scroll_by(rows),
        LadderCommand::Drag { ticks, urgency } => session.drag_by(ticks, urgency),
        LadderCommand::CenterOnSpread => session.center_on_spread(),
        LadderCommand::CenterOn(tick) => session.center_on(tick),
        LadderCommand::SetCompression(compression) => {
            let out = session.set_compression(compression);
            if let Some(settings) = hooks.settings.as_mut() {
                let symbol = session.config().feed.symbol.clone();
                settings.set_compression(&symbol, session.config().compression);
            }
            out
        }
        LadderCommand::SetVisibleRows(rows) => session.set_visible_rows(rows),
        LadderCommand::Restart {
            symbol,
            levels,
            exchange,
        } => session.restart_with(&symbol, levels, &exchange, Instant::now()),
        LadderCommand::Stop => session.stop(),
        LadderCommand::RequestRender => {
            session.request_render();
            Vec::new()
        }
        LadderCommand::Shutdown => Vec::new(),
    }
}
