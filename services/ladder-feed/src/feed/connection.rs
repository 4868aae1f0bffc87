//! Feed Connection Manager state machine
//!
//! A pure transition function over backend lifecycle events. The caller
//! feeds [`FeedEvent`]s in and executes the returned [`FeedAction`]s; no
//! I/O happens here, so every transition is testable with plain values.
//!
//! ```text
//! Stopped → Starting → Running → {CrashExit, NormalExit} → Restarting → Starting
//!                                                        ↘ Stopped
//! ```
//!
//! `stop_requested` and `restart_in_progress` suppress crash notifications
//! and automatic restarts when the termination was self-inflicted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ladder_types::errors::FeedError;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::events::{ControlCommand, FeedMessage};
use crate::feed::diagnostics::{is_surfaced, BackendLog, StderrTail};
use crate::feed::launch::LaunchSpec;
use crate::feed::proxy::SystemProxyResolver;
use crate::ingestion::Ingester;
use crate::metrics::LadderMetrics;

/// Stderr text emitted by the backend when the symbol cannot be resolved.
const UNRESOLVABLE_SYMBOL_MARKER: &str = "failed to resolve market_id/tickSize";

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Stopped,
    Starting,
    Running,
    CrashExit,
    NormalExit,
    Restarting,
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Normal,
    Crash,
}

impl ExitKind {
    /// Zero exit code is normal; anything else, including a signal, is a crash.
    pub fn classify(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitKind::Normal,
            _ => ExitKind::Crash,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ExitKind::Normal => "NormalExit",
            ExitKind::Crash => "CrashExit",
        }
    }
}

/// Process-level failures reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessErrorKind {
    FailedToStart,
    Timedout,
    WriteError,
    ReadError,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Started,
    Stdout(Vec<u8>),
    StderrLine(String),
    Error {
        kind: ProcessErrorKind,
        message: String,
    },
    Exited {
        code: Option<i32>,
        kind: ExitKind,
    },
    WatchdogFired,
    RestartDue,
}

/// Outputs of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedAction {
    /// Spawn a new backend.
    Launch(LaunchSpec),
    /// Kill the current backend and wait for it (bounded).
    Terminate,
    /// Drop all ladder state; a new backend is about to start.
    Reset,
    /// A parsed inbound message.
    Deliver(FeedMessage),
    /// Decorated status text for the status sink.
    Status(String),
    Failure(FeedError),
    ArmWatchdog(Instant),
    DisarmWatchdog,
    ScheduleRestart(Duration),
    /// Write a control command to the backend's stdin.
    Send(ControlCommand),
}

/// One ladder's connection to its feed backend.
pub struct FeedConnection {
    config: FeedConfig,
    state: FeedState,
    ingester: Ingester,
    stderr: StderrTail,
    log: BackendLog,
    resolver: Box<dyn SystemProxyResolver + Send>,
    metrics: Arc<LadderMetrics>,
    last_inbound: Option<Instant>,
    watchdog_deadline: Option<Instant>,
    restart_in_progress: bool,
    stop_requested: bool,
    restart_scheduled: bool,
    last_error: Option<String>,
    last_exit: Option<(Option<i32>, ExitKind)>,
}

impl FeedConnection {
    pub fn new(
        config: FeedConfig,
        resolver: Box<dyn SystemProxyResolver + Send>,
        metrics: Arc<LadderMetrics>,
    ) -> Self {
        let log = BackendLog::new(config.log_dir.as_deref(), &config.exchange, &config.symbol);
        Self {
            stderr: StderrTail::new(config.stderr_capacity),
            config,
            state: FeedState::Stopped,
            ingester: Ingester::with_defaults(),
            log,
            resolver,
            metrics,
            last_inbound: None,
            watchdog_deadline: None,
            restart_in_progress: false,
            stop_requested: false,
            restart_scheduled: false,
            last_error: None,
            last_exit: None,
        }
    }

    /// Start the backend, replacing any running one.
    pub fn start(&mut self, now: Instant) -> Vec<FeedAction> {
        self.restart_in_progress = true;
        self.stop_requested = true;

        let mut actions = vec![FeedAction::Reset];
        if self.is_running() {
            actions.push(FeedAction::Terminate);
        }
        self.ingester.reset_stream();
        self.stderr.clear();
        self.last_error = None;
        self.last_exit = None;
        self.stop_requested = false;

        let spec = LaunchSpec::build(&self.config, self.resolver.as_ref());
        if let Some(proxy) = &spec.proxy {
            actions.push(self.status(format!(
                "{} Backend proxy: {}",
                self.backend_prefix(),
                proxy.label()
            )));
        }
        actions.push(self.status(format!(
            "Starting backend ({}, {} levels, {})...",
            self.config.symbol,
            self.config.levels,
            self.exchange_label()
        )));

        let redacted = spec.redacted_args();
        info!(
            symbol = %self.config.symbol,
            exchange = %self.exchange_label(),
            args = ?redacted,
            "Starting feed backend"
        );
        self.log.event(&format!("start args={}", redacted.join(" ")));
        self.metrics.record_start();

        self.state = FeedState::Starting;
        actions.push(FeedAction::Launch(spec));
        self.arm_watchdog(now, &mut actions);
        actions
    }

    /// Restart with a new symbol, depth and exchange. An empty exchange
    /// keeps the current one.
    pub fn restart_with(
        &mut self,
        symbol: &str,
        levels: u32,
        exchange: &str,
        now: Instant,
    ) -> Vec<FeedAction> {
        let exchange_changed = !exchange.is_empty() && exchange != self.config.exchange;
        let symbol_changed = symbol != self.config.symbol;
        self.config.symbol = symbol.to_string();
        self.config.levels = levels.max(1);
        if !exchange.is_empty() {
            self.config.exchange = exchange.to_string();
        }
        if exchange_changed || symbol_changed {
            self.log = BackendLog::new(
                self.config.log_dir.as_deref(),
                &self.config.exchange,
                &self.config.symbol,
            );
        }
        self.start(now)
    }

    /// Stop the backend. Termination is reported quietly and never restarts.
    pub fn stop(&mut self) -> Vec<FeedAction> {
        self.stop_requested = true;
        self.restart_scheduled = false;
        let mut actions = Vec::new();
        if self.is_running() {
            actions.push(FeedAction::Terminate);
            actions.push(self.status("Backend stopped".to_string()));
            self.log.event("stop requested");
        }
        self.watchdog_deadline = None;
        actions.push(FeedAction::DisarmWatchdog);
        self.state = FeedState::Stopped;
        actions
    }

    /// Apply one lifecycle event.
    pub fn handle(&mut self, event: FeedEvent, now: Instant) -> Vec<FeedAction> {
        match event {
            FeedEvent::Started => {
                self.restart_in_progress = false;
                if self.state == FeedState::Starting {
                    self.state = FeedState::Running;
                }
                self.log.event("started");
                Vec::new()
            }
            FeedEvent::Stdout(chunk) => self.on_stdout(&chunk, now),
            FeedEvent::StderrLine(line) => self.on_stderr(&line),
            FeedEvent::Error { kind, message } => self.on_error(kind, message),
            FeedEvent::Exited { code, kind } => self.on_exit(code, kind),
            FeedEvent::WatchdogFired => self.on_watchdog(now),
            FeedEvent::RestartDue => {
                self.restart_scheduled = false;
                if self.stop_requested || self.is_running() {
                    return Vec::new();
                }
                self.metrics.record_restart();
                self.start(now)
            }
        }
    }

    /// `{"cmd":"shift"}`; no-op for zero ticks or a stopped backend.
    pub fn shift_window(&self, ticks: i64) -> Option<FeedAction> {
        if ticks == 0 || !self.is_running() {
            return None;
        }
        Some(FeedAction::Send(ControlCommand::Shift { ticks }))
    }

    /// `{"cmd":"center_auto"}`; no-op for a stopped backend.
    pub fn reset_to_automatic_center(&self) -> Option<FeedAction> {
        if !self.is_running() {
            return None;
        }
        Some(FeedAction::Send(ControlCommand::CenterAuto))
    }

    /// Whether a process is (being) started.
    pub fn is_running(&self) -> bool {
        matches!(self.state, FeedState::Starting | FeedState::Running)
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn last_inbound(&self) -> Option<Instant> {
        self.last_inbound
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_deadline
    }

    pub fn restart_in_progress(&self) -> bool {
        self.restart_in_progress
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub fn last_exit(&self) -> Option<(Option<i32>, ExitKind)> {
        self.last_exit
    }

    pub fn stderr_tail(&self) -> &StderrTail {
        &self.stderr
    }

    pub fn log(&self) -> &BackendLog {
        &self.log
    }

    pub fn ingester(&self) -> &Ingester {
        &self.ingester
    }

    /// `[exchange symbol]`, as used on backend-scoped messages.
    pub fn backend_prefix(&self) -> String {
        format!("[{} {}]", self.exchange_label(), self.config.symbol)
    }

    fn exchange_label(&self) -> &str {
        if self.config.exchange.is_empty() {
            "auto"
        } else {
            &self.config.exchange
        }
    }

    fn status(&self, message: String) -> FeedAction {
        FeedAction::Status(decorate_status(&self.config.symbol, &self.config.exchange, &message))
    }

    fn arm_watchdog(&mut self, now: Instant, actions: &mut Vec<FeedAction>) {
        self.last_inbound = Some(now);
        let interval = self.config.watchdog_interval();
        if interval.is_zero() {
            return;
        }
        let deadline = now + interval;
        self.watchdog_deadline = Some(deadline);
        actions.push(FeedAction::ArmWatchdog(deadline));
    }

    fn on_stdout(&mut self, chunk: &[u8], now: Instant) -> Vec<FeedAction> {
        let mut actions = Vec::new();
        let mut parsed_any = false;
        for result in self.ingester.ingest_chunk(chunk) {
            match result {
                Ok(message) => {
                    parsed_any = true;
                    self.metrics.record_message(&message);
                    if !matches!(message, FeedMessage::Unknown) {
                        actions.push(FeedAction::Deliver(message));
                    }
                }
                Err(err) => {
                    self.metrics.record_malformed();
                    let reason = match &err {
                        FeedError::MalformedMessage { reason } => reason.clone(),
                        other => other.to_string(),
                    };
                    actions.push(self.status(format!("Parse error: {}", reason)));
                    actions.push(FeedAction::Failure(err));
                }
            }
        }
        if parsed_any {
            self.arm_watchdog(now, &mut actions);
        }
        actions
    }

    fn on_stderr(&mut self, line: &str) -> Vec<FeedAction> {
        let text = line.trim();
        if text.is_empty() {
            return Vec::new();
        }
        debug!(line = text, "Backend stderr");
        self.stderr.push(text);
        self.log.stderr(text);
        if is_surfaced(text) {
            return vec![self.status(format!("{} {}", self.backend_prefix(), text))];
        }
        Vec::new()
    }

    fn on_error(&mut self, kind: ProcessErrorKind, message: String) -> Vec<FeedAction> {
        warn!(?kind, error = %message, "Feed backend error");
        self.log
            .event(&format!("errorOccurred kind={:?} msg={}", kind, message));
        self.last_error = Some(message.clone());

        match kind {
            ProcessErrorKind::FailedToStart => {
                // No exit follows a failed spawn; the watchdog retries.
                self.restart_in_progress = false;
                self.state = FeedState::Stopped;
                vec![
                    self.status(format!(
                        "{} Backend failed to start: {}. log: {}",
                        self.backend_prefix(),
                        message,
                        self.log.display_path()
                    )),
                    FeedAction::Failure(FeedError::ProcessFailedToStart { reason: message }),
                ]
            }
            ProcessErrorKind::Timedout => vec![
                self.status(format!(
                    "{} Backend timeout: {}. log: {}",
                    self.backend_prefix(),
                    message,
                    self.log.display_path()
                )),
                FeedAction::Failure(FeedError::ProcessTimeout { reason: message }),
            ],
            ProcessErrorKind::WriteError | ProcessErrorKind::ReadError => {
                vec![FeedAction::Failure(FeedError::Io { reason: message })]
            }
        }
    }

    fn on_exit(&mut self, code: Option<i32>, kind: ExitKind) -> Vec<FeedAction> {
        self.last_exit = Some((code, kind));
        self.log.event(&format!(
            "finished exitCode={} exitStatus={}",
            exit_code_text(code),
            kind.label()
        ));

        if self.restart_in_progress {
            // A newer backend is being started; this exit is ours.
            debug!(?code, "Ignoring exit of replaced backend");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if kind == ExitKind::Crash && !self.stop_requested {
            self.state = FeedState::CrashExit;
            self.metrics.record_crash();
            let summary = self.crash_summary(code, kind);
            warn!(summary = %summary, "Feed backend crashed");
            actions.push(self.status(summary));
            actions.push(FeedAction::Failure(FeedError::ProcessCrashed { exit_code: code }));
        } else {
            self.state = FeedState::NormalExit;
            info!(?code, "Feed backend finished");
            actions.push(self.status(format!(
                "{} Backend finished ({}). log: {}",
                self.backend_prefix(),
                exit_code_text(code),
                self.log.display_path()
            )));
        }

        self.watchdog_deadline = None;
        actions.push(FeedAction::DisarmWatchdog);

        if self.stop_requested {
            self.state = FeedState::Stopped;
            return actions;
        }

        let fatal_symbol = code.map_or(false, |c| c != 0)
            && self.stderr.contains_ignore_case(UNRESOLVABLE_SYMBOL_MARKER);
        if fatal_symbol {
            self.state = FeedState::Stopped;
            actions.push(self.status(format!(
                "{} Backend stopped: invalid Lighter symbol (can't resolve market_id).",
                self.backend_prefix()
            )));
            actions.push(FeedAction::Failure(FeedError::UnrecoverableSymbol {
                symbol: self.config.symbol.clone(),
            }));
            return actions;
        }

        if !self.restart_scheduled {
            self.restart_scheduled = true;
            self.state = FeedState::Restarting;
            actions.push(FeedAction::ScheduleRestart(self.config.restart_delay()));
        }
        actions
    }

    fn on_watchdog(&mut self, now: Instant) -> Vec<FeedAction> {
        if self.stop_requested {
            return Vec::new();
        }
        let interval = self.config.watchdog_interval();
        if interval.is_zero() {
            return Vec::new();
        }
        let last = self.last_inbound.unwrap_or(now);
        let threshold = interval.saturating_sub(self.config.watchdog_grace());
        if now.saturating_duration_since(last) < threshold {
            // Data arrived while the timer was firing.
            let deadline = last + interval;
            self.watchdog_deadline = Some(deadline);
            return vec![FeedAction::ArmWatchdog(deadline)];
        }

        self.metrics.record_stall();
        warn!(interval_s = interval.as_secs(), "Feed stalled, restarting backend");
        self.log.event("watchdog stall");
        let mut actions = vec![self.status(format!(
            "No data received for {}s, restarting backend...",
            interval.as_secs()
        ))];
        actions.extend(self.start(now));
        actions
    }

    fn crash_summary(&self, code: Option<i32>, kind: ExitKind) -> String {
        let mut msg = format!(
            "{} Backend crashed (exitCode={}, {})",
            self.backend_prefix(),
            exit_code_text(code),
            kind.label()
        );
        if let Some(err) = self.last_error.as_deref().filter(|e| !e.is_empty()) {
            msg.push_str(&format!(". errorString=\"{}\"", err));
        }
        if !self.stderr.is_empty() {
            msg.push_str(&format!(". stderr: {}", self.stderr.tail(self.config.crash_tail_lines)));
        }
        msg.push_str(&format!(". log: {}", self.log.display_path()));
        msg
    }
}

/// `[SYMBOL@EXCHANGE] message`, with `auto` for an empty exchange.
pub fn decorate_status(symbol: &str, exchange: &str, message: &str) -> String {
    let exchange = if exchange.is_empty() {
        "auto".to_string()
    } else {
        exchange.to_uppercase()
    };
    format!("[{}@{}] {}", symbol.to_uppercase(), exchange, message)
}

fn exit_code_text(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::proxy::NoSystemProxy;

    fn connection() -> FeedConnection {
        let config = FeedConfig {
            symbol: "btcusdt".to_string(),
            exchange: "binance".to_string(),
            ..Default::default()
        };
        FeedConnection::new(config, Box::new(NoSystemProxy), Arc::new(LadderMetrics::new()))
    }

    fn running(now: Instant) -> FeedConnection {
        let mut conn = connection();
        conn.start(now);
        conn.handle(FeedEvent::Started, now);
        conn
    }

    fn statuses(actions: &[FeedAction]) -> Vec<&str> {
        actions
            .iter()
            .filter_map(|a| match a {
                FeedAction::Status(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_emits_launch_and_watchdog() {
        let now = Instant::now();
        let mut conn = connection();
        let actions = conn.start(now);

        assert_eq!(actions[0], FeedAction::Reset);
        assert!(actions.iter().any(|a| matches!(a, FeedAction::Launch(_))));
        assert!(actions.contains(&FeedAction::ArmWatchdog(now + Duration::from_secs(15))));
        assert!(!actions.contains(&FeedAction::Terminate));
        assert_eq!(
            statuses(&actions),
            vec!["[BTCUSDT@BINANCE] Starting backend (btcusdt, 500 levels, binance)..."]
        );
        assert_eq!(conn.state(), FeedState::Starting);
        assert!(conn.restart_in_progress());

        conn.handle(FeedEvent::Started, now);
        assert_eq!(conn.state(), FeedState::Running);
        assert!(!conn.restart_in_progress());
    }

    #[test]
    fn test_restart_terminates_running_backend() {
        let now = Instant::now();
        let mut conn = running(now);
        let actions = conn.start(now);
        assert!(actions.contains(&FeedAction::Terminate));

        // The replaced backend's exit is expected and stays quiet.
        let actions = conn.handle(
            FeedEvent::Exited {
                code: None,
                kind: ExitKind::Crash,
            },
            now,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_crash_schedules_restart() {
        let now = Instant::now();
        let mut conn = running(now);
        conn.handle(FeedEvent::StderrLine("panic: boom".to_string()), now);

        let actions = conn.handle(
            FeedEvent::Exited {
                code: Some(3),
                kind: ExitKind::Crash,
            },
            now,
        );
        let status = statuses(&actions);
        assert_eq!(status.len(), 1);
        assert!(status[0].starts_with("[BTCUSDT@BINANCE] [binance btcusdt] Backend crashed (exitCode=3, CrashExit)"));
        assert!(status[0].contains("stderr: panic: boom"));
        assert!(actions.contains(&FeedAction::Failure(FeedError::ProcessCrashed { exit_code: Some(3) })));
        assert!(actions.contains(&FeedAction::ScheduleRestart(Duration::from_millis(700))));
        assert_eq!(conn.state(), FeedState::Restarting);

        let actions = conn.handle(FeedEvent::RestartDue, now);
        assert!(actions.iter().any(|a| matches!(a, FeedAction::Launch(_))));
    }

    #[test]
    fn test_crash_summary_includes_error_string_and_tail() {
        let now = Instant::now();
        let mut conn = running(now);
        for i in 0..10 {
            conn.handle(FeedEvent::StderrLine(format!("line {}", i)), now);
        }
        conn.handle(
            FeedEvent::Error {
                kind: ProcessErrorKind::ReadError,
                message: "pipe closed".to_string(),
            },
            now,
        );
        let actions = conn.handle(
            FeedEvent::Exited {
                code: Some(1),
                kind: ExitKind::Crash,
            },
            now,
        );
        let status = statuses(&actions)[0];
        assert!(status.contains(". errorString=\"pipe closed\""));
        assert!(status.contains("stderr: line 4 | line 5 | line 6 | line 7 | line 8 | line 9."));
        assert!(status.ends_with(". log: <disabled>"));
    }

    #[test]
    fn test_restarts_do_not_chain() {
        let now = Instant::now();
        let mut conn = running(now);
        let first = conn.handle(
            FeedEvent::Exited {
                code: Some(1),
                kind: ExitKind::Crash,
            },
            now,
        );
        assert!(first.iter().any(|a| matches!(a, FeedAction::ScheduleRestart(_))));

        let second = conn.handle(
            FeedEvent::Exited {
                code: Some(1),
                kind: ExitKind::Crash,
            },
            now,
        );
        assert!(!second.iter().any(|a| matches!(a, FeedAction::ScheduleRestart(_))));
    }

    #[test]
    fn test_normal_exit_is_quiet_and_restarts() {
        let now = Instant::now();
        let mut conn = running(now);
        let actions = conn.handle(
            FeedEvent::Exited {
                code: Some(0),
                kind: ExitKind::Normal,
            },
            now,
        );
        let status = statuses(&actions);
        assert!(status[0].contains("Backend finished (0)"));
        assert!(!actions.iter().any(|a| matches!(a, FeedAction::Failure(_))));
        assert!(actions.iter().any(|a| matches!(a, FeedAction::ScheduleRestart(_))));
    }

    #[test]
    fn test_unresolvable_symbol_halts_restarts() {
        let now = Instant::now();
        let mut conn = running(now);
        conn.handle(
            FeedEvent::StderrLine("lighter: Failed to resolve market_id/tickSize for FOO".to_string()),
            now,
        );
        let actions = conn.handle(
            FeedEvent::Exited {
                code: Some(2),
                kind: ExitKind::Crash,
            },
            now,
        );
        assert!(!actions.iter().any(|a| matches!(a, FeedAction::ScheduleRestart(_))));
        assert!(actions.contains(&FeedAction::Failure(FeedError::UnrecoverableSymbol {
            symbol: "btcusdt".to_string()
        })));
        assert!(statuses(&actions)
            .iter()
            .any(|s| s.contains("invalid Lighter symbol")));
        assert_eq!(conn.state(), FeedState::Stopped);
    }

    #[test]
    fn test_stop_suppresses_crash_and_restart() {
        let now = Instant::now();
        let mut conn = running(now);
        let actions = conn.stop();
        assert!(actions.contains(&FeedAction::Terminate));
        assert!(actions.contains(&FeedAction::DisarmWatchdog));

        let actions = conn.handle(
            FeedEvent::Exited {
                code: None,
                kind: ExitKind::Crash,
            },
            now,
        );
        assert!(statuses(&actions)[0].contains("Backend finished (signal)"));
        assert!(!actions.iter().any(|a| matches!(a, FeedAction::ScheduleRestart(_))));
        assert!(!actions.iter().any(|a| matches!(a, FeedAction::Failure(_))));
        assert!(conn.handle(FeedEvent::RestartDue, now).is_empty());
        assert!(conn.handle(FeedEvent::WatchdogFired, now).is_empty());
    }

    #[test]
    fn test_stdout_delivers_and_rearms_watchdog() {
        let start = Instant::now();
        let mut conn = running(start);
        let later = start + Duration::from_secs(3);
        let actions = conn.handle(
            FeedEvent::Stdout(b"{\"type\":\"ladder\",\"tickSize\":0.5,\"rows\":[]}\n{\"type\":\"hb\"}\n".to_vec()),
            later,
        );
        let delivered = actions
            .iter()
            .filter(|a| matches!(a, FeedAction::Deliver(_)))
            .count();
        assert_eq!(delivered, 1);
        assert!(actions.contains(&FeedAction::ArmWatchdog(later + Duration::from_secs(15))));
        assert_eq!(conn.last_inbound(), Some(later));
    }

    #[test]
    fn test_malformed_line_reports_and_keeps_watchdog() {
        let now = Instant::now();
        let mut conn = running(now);
        let actions = conn.handle(FeedEvent::Stdout(b"{oops\n".to_vec()), now + Duration::from_secs(1));
        assert!(statuses(&actions)[0].contains("Parse error:"));
        assert!(actions
            .iter()
            .any(|a| matches!(a, FeedAction::Failure(FeedError::MalformedMessage { .. }))));
        assert!(!actions.iter().any(|a| matches!(a, FeedAction::ArmWatchdog(_))));
        assert_eq!(conn.state(), FeedState::Running);
    }

    #[test]
    fn test_watchdog_stall_restarts_once() {
        let start = Instant::now();
        let mut conn = running(start);
        let fired = start + Duration::from_secs(15);
        let actions = conn.handle(FeedEvent::WatchdogFired, fired);

        let status = statuses(&actions);
        assert_eq!(
            status[0],
            "[BTCUSDT@BINANCE] No data received for 15s, restarting backend..."
        );
        let launches = actions
            .iter()
            .filter(|a| matches!(a, FeedAction::Launch(_)))
            .count();
        assert_eq!(launches, 1);
        assert!(actions.contains(&FeedAction::Terminate));
    }

    #[test]
    fn test_watchdog_ignores_early_fire() {
        let start = Instant::now();
        let mut conn = running(start);
        conn.handle(
            FeedEvent::Stdout(b"{\"type\":\"trade\",\"price\":1,\"qty\":1}\n".to_vec()),
            start + Duration::from_secs(10),
        );
        let actions = conn.handle(FeedEvent::WatchdogFired, start + Duration::from_secs(15));
        assert_eq!(
            actions,
            vec![FeedAction::ArmWatchdog(start + Duration::from_secs(25))]
        );
    }

    #[test]
    fn test_failed_to_start() {
        let now = Instant::now();
        let mut conn = connection();
        conn.start(now);
        let actions = conn.handle(
            FeedEvent::Error {
                kind: ProcessErrorKind::FailedToStart,
                message: "No such file or directory".to_string(),
            },
            now,
        );
        assert!(statuses(&actions)[0].contains("Backend failed to start: No such file or directory"));
        assert_eq!(conn.state(), FeedState::Stopped);
        assert!(!conn.restart_in_progress());
        // The watchdog stays armed and retries later.
        assert!(conn.watchdog_deadline().is_some());
    }

    #[test]
    fn test_surfaced_stderr_lines() {
        let now = Instant::now();
        let mut conn = running(now);
        let actions = conn.handle(FeedEvent::StderrLine("proxy enabled: socks5".to_string()), now);
        assert_eq!(
            statuses(&actions),
            vec!["[BTCUSDT@BINANCE] [binance btcusdt] proxy enabled: socks5"]
        );
        assert!(conn
            .handle(FeedEvent::StderrLine("depth ok".to_string()), now)
            .is_empty());
        assert_eq!(conn.stderr_tail().len(), 2);
    }

    #[test]
    fn test_commands_only_while_running() {
        let now = Instant::now();
        let mut conn = connection();
        assert!(conn.shift_window(5).is_none());
        assert!(conn.reset_to_automatic_center().is_none());

        conn.start(now);
        assert_eq!(
            conn.shift_window(-1200),
            Some(FeedAction::Send(ControlCommand::Shift { ticks: -1200 }))
        );
        assert!(conn.shift_window(0).is_none());
        assert_eq!(
            conn.reset_to_automatic_center(),
            Some(FeedAction::Send(ControlCommand::CenterAuto))
        );
    }

    #[test]
    fn test_restart_with_keeps_exchange_when_empty() {
        let now = Instant::now();
        let mut conn = running(now);
        conn.restart_with("ETHUSDT", 200, "", now);
        assert_eq!(conn.config().symbol, "ETHUSDT");
        assert_eq!(conn.config().exchange, "binance");
        assert_eq!(conn.config().levels, 200);
        assert_eq!(conn.backend_prefix(), "[binance ETHUSDT]");
    }

    #[test]
    fn test_decorate_status() {
        assert_eq!(decorate_status("btcusdt", "", "hi"), "[BTCUSDT@auto] hi");
        assert_eq!(decorate_status("eth", "lighter", "x"), "[ETH@LIGHTER] x");
    }
}
