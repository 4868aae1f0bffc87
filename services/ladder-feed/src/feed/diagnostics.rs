//! Backend diagnostics: recent stderr and the per-ladder log file

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use tracing::debug;

/// Stderr fragments worth showing to the user as they arrive.
const SURFACED_PATTERNS: [&str; 5] = [
    "proxy enabled:",
    "lighter:",
    "lighter ws",
    "lighter orderbookdetails",
    "httpgetqt failed",
];

const MAX_COMPONENT_CHARS: usize = 80;

/// Whether a stderr line should also go to the status sink.
pub fn is_surfaced(line: &str) -> bool {
    let lower = line.to_lowercase();
    SURFACED_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Restrict a file name component to `[A-Za-z0-9_.-]`.
///
/// Runs of other characters collapse to one `_`; empty input becomes
/// `unknown`; the result is capped at 80 characters.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    if out.is_empty() {
        return "unknown".to_string();
    }
    out.chars().take(MAX_COMPONENT_CHARS).collect()
}

/// `<dir>/backend_<exchange>_<symbol>.log`, with `auto` for no exchange.
pub fn backend_log_path(dir: &Path, exchange: &str, symbol: &str) -> PathBuf {
    let exchange = if exchange.is_empty() { "auto" } else { exchange };
    dir.join(format!(
        "backend_{}_{}.log",
        sanitize_component(exchange),
        sanitize_component(symbol)
    ))
}

/// Replace the value following `--proxy` with `<redacted>`.
pub fn redact_args(args: &[String]) -> Vec<String> {
    let mut out = args.to_vec();
    for i in 0..out.len().saturating_sub(1) {
        if out[i] == "--proxy" {
            out[i + 1] = "<redacted>".to_string();
        }
    }
    out
}

/// Bounded ring of recent non-empty stderr lines.
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if line.is_empty() {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// The newest `n` lines joined with ` | `.
    pub fn tail(&self, n: usize) -> String {
        let skip = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Case-insensitive search across every kept line.
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.lines.iter().any(|l| l.to_lowercase().contains(&needle))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Append-only diagnostics log for one backend.
///
/// Write failures are ignored; the log is best effort.
#[derive(Debug, Clone, Default)]
pub struct BackendLog {
    path: Option<PathBuf>,
}

impl BackendLog {
    /// A log under `dir`, or a disabled log when `dir` is `None`.
    pub fn new(dir: Option<&Path>, exchange: &str, symbol: &str) -> Self {
        let path = dir.map(|dir| {
            if let Err(err) = fs::create_dir_all(dir) {
                debug!(dir = %dir.display(), error = %err, "Cannot create backend log directory");
            }
            backend_log_path(dir, exchange, symbol)
        });
        Self { path }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Path for status messages.
    pub fn display_path(&self) -> String {
        self.path
            .as_ref()
            .map_or_else(|| "<disabled>".to_string(), |p| p.display().to_string())
    }

    pub fn event(&self, line: &str) {
        self.append("event", line);
    }

    pub fn stderr(&self, line: &str) {
        self.append("stderr", line);
    }

    fn append(&self, tag: &str, line: &str) {
        let Some(path) = &self.path else {
            return;
        };
        let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{} [{}] {}", stamp, tag, line));
        if let Err(err) = result {
            debug!(path = %path.display(), error = %err, "Backend log write failed");
        }
    }
}
