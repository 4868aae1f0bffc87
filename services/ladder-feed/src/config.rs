//! Ladder configuration
//!
//! Every field has a default so partial JSON settings deserialize cleanly.
//! Durations are stored as milliseconds and exposed as [`Duration`]s.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Feed backend process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Feed backend executable.
    pub backend_path: PathBuf,
    /// Arguments placed before the generated ones, e.g. for a launcher.
    pub backend_prefix_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Symbol as shown to the user; mapped to the wire format at start.
    pub symbol: String,
    /// Exchange tag; empty means the backend picks.
    pub exchange: String,
    /// Ladder and cache depth requested from the backend.
    pub levels: u32,
    /// `http` or `socks5`.
    pub proxy_type: String,
    /// `host:port[:user:pass]`; empty falls back to the system proxy.
    pub proxy: String,
    pub use_system_proxy: bool,
    /// Directory for backend diagnostics logs. `None` disables them.
    pub log_dir: Option<PathBuf>,
    pub watchdog_interval_ms: u64,
    pub watchdog_grace_ms: u64,
    pub restart_delay_ms: u64,
    pub kill_timeout_ms: u64,
    /// Recent stderr lines kept for crash summaries.
    pub stderr_capacity: usize,
    /// Stderr lines included in a crash summary.
    pub crash_tail_lines: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            backend_path: PathBuf::from("orderbook_backend"),
            backend_prefix_args: Vec::new(),
            working_dir: None,
            symbol: String::new(),
            exchange: String::new(),
            levels: 500,
            proxy_type: String::new(),
            proxy: String::new(),
            use_system_proxy: true,
            log_dir: None,
            watchdog_interval_ms: 15_000,
            watchdog_grace_ms: 50,
            restart_delay_ms: 700,
            kill_timeout_ms: 2_000,
            stderr_capacity: 80,
            crash_tail_lines: 6,
        }
    }
}

impl FeedConfig {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn watchdog_grace(&self) -> Duration {
        Duration::from_millis(self.watchdog_grace_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

/// Viewport and prefetch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    /// Rows the display shows at once.
    pub visible_rows: usize,
    /// Levels per side kept around the display window.
    pub background_levels: u32,
    /// Levels requested per depth shift.
    pub depth_chunk_levels: u32,
    /// Distance-to-edge ratio that triggers a slide or prefetch.
    pub edge_ratio: f64,
    /// Upper bound on the drag urgency multiplier.
    pub max_urgency: u32,
    /// Shift chunks that may queue behind an in-flight request.
    pub max_queued_shift_chunks: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            visible_rows: 40,
            background_levels: 1_000,
            depth_chunk_levels: 1_200,
            edge_ratio: 0.18,
            max_urgency: 4,
            max_queued_shift_chunks: 4,
        }
    }
}

/// Everything one ladder needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderConfig {
    pub feed: FeedConfig,
    pub viewport: ViewportConfig,
    /// Ticks per displayed row.
    pub compression: i64,
    /// Trade prints kept in the rolling buffer.
    pub print_capacity: usize,
}

impl Default for LadderConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            viewport: ViewportConfig::default(),
            compression: 1,
            print_capacity: crate::trades::DEFAULT_PRINT_CAPACITY,
        }
    }
}

impl LadderConfig {
    /// Config for a symbol with defaults everywhere else.
    pub fn for_symbol(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.feed.symbol = symbol.into();
        config.feed.exchange = exchange.into();
        config
    }

    /// Parse persisted JSON settings and validate them.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut config: LadderConfig = serde_json::from_str(raw)?;
        config.compression = config.compression.max(1);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol must not be empty".to_string()));
        }
        if self.feed.levels == 0 {
            return Err(ConfigError::Invalid("levels must be positive".to_string()));
        }
        if !(self.viewport.edge_ratio > 0.0 && self.viewport.edge_ratio < 0.5) {
            return Err(ConfigError::Invalid(format!(
                "edge_ratio {} outside (0, 0.5)",
                self.viewport.edge_ratio
            )));
        }
        if self.viewport.visible_rows == 0 {
            return Err(ConfigError::Invalid("visible_rows must be positive".to_string()));
        }
        Ok(())
    }

    /// Pull persisted values from the settings collaborator.
    pub fn apply_settings(&mut self, settings: &dyn SettingsProvider) {
        self.compression = settings.compression(&self.feed.symbol).max(1);
        self.feed.levels = settings.levels().max(1);
        self.viewport.background_levels = settings.background_levels();
    }
}

/// Persisted per-user settings the ladder reads and writes.
pub trait SettingsProvider {
    /// Tick compression last chosen for `symbol`.
    fn compression(&self, symbol: &str) -> i64;
    fn set_compression(&mut self, symbol: &str, compression: i64);
    /// Depth requested from the backend.
    fn levels(&self) -> u32;
    /// Levels per side kept around the display window.
    fn background_levels(&self) -> u32;
}

/// Settings held in memory, for tests and the CLI.
#[derive(Debug, Clone)]
pub struct InMemorySettings {
    default_compression: i64,
    compression: HashMap<String, i64>,
    levels: u32,
    background_levels: u32,
}

impl Default for InMemorySettings {
    fn default() -> Self {
        let viewport = ViewportConfig::default();
        Self {
            default_compression: 1,
            compression: HashMap::new(),
            levels: FeedConfig::default().levels,
            background_levels: viewport.background_levels,
        }
    }
}

impl InMemorySettings {
    pub fn new(levels: u32, background_levels: u32) -> Self {
        Self {
            levels,
            background_levels,
            ..Default::default()
        }
    }
}

impl SettingsProvider for InMemorySettings {
    fn compression(&self, symbol: &str) -> i64 {
        self.compression
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(self.default_compression)
    }

    fn set_compression(&mut self, symbol: &str, compression: i64) {
        self.compression.insert(symbol.to_uppercase(), compression.max(1));
    }

    fn levels(&self) -> u32 {
        self.levels
    }

    fn background_levels(&self) -> u32 {
        self.background_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LadderConfig::default();
        assert_eq!(config.feed.watchdog_interval(), Duration::from_secs(15));
        assert_eq!(config.feed.restart_delay(), Duration::from_millis(700));
        assert_eq!(config.feed.kill_timeout(), Duration::from_secs(2));
        assert_eq!(config.feed.stderr_capacity, 80);
        assert_eq!(config.feed.crash_tail_lines, 6);
        assert_eq!(config.viewport.depth_chunk_levels, 1_200);
        assert_eq!(config.viewport.edge_ratio, 0.18);
        assert_eq!(config.compression, 1);
    }

    #[test]
    fn test_partial_json() {
        let config = LadderConfig::from_json_str(
            r#"{"feed":{"symbol":"BTCUSDT","exchange":"binance","levels":200},"compression":0}"#,
        )
        .unwrap();
        assert_eq!(config.feed.symbol, "BTCUSDT");
        assert_eq!(config.feed.levels, 200);
        assert_eq!(config.feed.watchdog_interval_ms, 15_000);
        assert_eq!(config.compression, 1);
        assert_eq!(config.viewport.visible_rows, 40);
    }

    #[test]
    fn test_invalid_json() {
        let err = LadderConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation() {
        assert!(LadderConfig::default().validate().is_err());

        let mut config = LadderConfig::for_symbol("ETHUSDT", "");
        assert!(config.validate().is_ok());

        config.viewport.edge_ratio = 0.7;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_apply_settings() {
        let mut settings = InMemorySettings::new(300, 800);
        settings.set_compression("btcusdt", 5);

        let mut config = LadderConfig::for_symbol("BTCUSDT", "binance");
        config.apply_settings(&settings);
        assert_eq!(config.compression, 5);
        assert_eq!(config.feed.levels, 300);
        assert_eq!(config.viewport.background_levels, 800);

        let mut other = LadderConfig::for_symbol("ETHUSDT", "binance");
        other.apply_settings(&settings);
        assert_eq!(other.compression, 1);
    }
}
