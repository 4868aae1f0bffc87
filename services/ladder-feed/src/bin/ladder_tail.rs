//! Ladder Tail
//!
//! Runs one ladder against a real feed backend and logs snapshot summaries,
//! status lines and trade prints. Useful for checking a backend build or a
//! proxy setup without a GUI.
//!
//! Usage:
//!   ladder_tail --backend ./orderbook_backend --symbol BTCUSDT --exchange binance
//!
//! Environment:
//!   LADDER_BACKEND - Backend executable
//!   LADDER_LOG_DIR - Directory for backend diagnostics logs
//!   RUST_LOG - Log filter (default: info)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ladder_feed::config::{InMemorySettings, LadderConfig};
use ladder_feed::feed::EnvProxyResolver;
use ladder_feed::runtime::{run_ladder, LadderCommand, LadderHooks, RenderTarget, StatusSink};
use ladder_feed::session::LadderSession;
use ladder_feed::snapshot::DomSnapshot;
use ladder_feed::trades::TradePrint;
use tokio::sync::mpsc;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ladder_tail")]
#[command(about = "Tail a price ladder from a feed backend")]
struct Args {
    /// Feed backend executable
    #[arg(long, env = "LADDER_BACKEND", default_value = "orderbook_backend")]
    backend: PathBuf,

    /// Argument placed before the generated ones (repeatable)
    #[arg(long = "prefix-arg")]
    prefix_args: Vec<String>,

    /// Symbol as shown to the user
    #[arg(long, default_value = "BTCUSDT")]
    symbol: String,

    /// Exchange tag; empty lets the backend pick
    #[arg(long, default_value = "")]
    exchange: String,

    /// Depth requested from the backend
    #[arg(long, default_value = "500")]
    levels: u32,

    /// Ticks per row
    #[arg(long, default_value = "1")]
    compression: i64,

    /// Visible rows
    #[arg(long, default_value = "40")]
    rows: usize,

    /// JSON settings file; command line values override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Proxy type (http or socks5)
    #[arg(long, default_value = "")]
    proxy_type: String,

    /// Proxy as host:port[:user:pass]
    #[arg(long, default_value = "")]
    proxy: String,

    /// Ignore HTTPS_PROXY and friends
    #[arg(long)]
    no_system_proxy: bool,

    /// Directory for backend diagnostics logs
    #[arg(long, env = "LADDER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Snapshot interval in milliseconds
    #[arg(long, default_value = "1000")]
    render_ms: u64,

    /// Exit after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

struct LogRender;

impl RenderTarget for LogRender {
    fn render(&mut self, snapshot: &DomSnapshot) {
        let (bids, asks) = snapshot.totals();
        info!(
            levels = snapshot.levels.len(),
            min_tick = snapshot.min_tick,
            max_tick = snapshot.max_tick,
            best_bid = snapshot.best_bid,
            best_ask = snapshot.best_ask,
            bid_total = bids,
            ask_total = asks,
            "Snapshot"
        );
    }

    fn print(&mut self, print: &TradePrint) {
        debug!(
            seq = print.seq,
            side = ?print.side,
            tick = ?print.tick,
            price = print.price,
            quote = print.quote_qty,
            "Print"
        );
    }
}

struct LogStatus;

impl StatusSink for LogStatus {
    fn status(&mut self, message: &str) {
        info!("{}", message);
    }
}

fn load_config(args: &Args) -> Result<LadderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            LadderConfig::from_json_str(&raw)?
        }
        None => LadderConfig::default(),
    };

    config.feed.backend_path = args.backend.clone();
    if !args.prefix_args.is_empty() {
        config.feed.backend_prefix_args = args.prefix_args.clone();
    }
    config.feed.symbol = args.symbol.clone();
    config.feed.exchange = args.exchange.clone();
    config.feed.levels = args.levels;
    config.feed.proxy_type = args.proxy_type.clone();
    config.feed.proxy = args.proxy.clone();
    config.feed.use_system_proxy = !args.no_system_proxy;
    if args.log_dir.is_some() {
        config.feed.log_dir = args.log_dir.clone();
    }
    config.compression = args.compression.max(1);
    config.viewport.visible_rows = args.rows;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!("Starting ladder tail");
    info!("  Backend: {}", config.feed.backend_path.display());
    info!("  Symbol: {} @ {}", config.feed.symbol, config.feed.exchange);
    info!("  Levels: {}", config.feed.levels);

    let settings = InMemorySettings::new(config.feed.levels, config.viewport.background_levels);
    let session = LadderSession::new(config, Box::new(EnvProxyResolver::from_process_env()));

    let (tx, rx) = mpsc::channel(64);
    let hooks = LadderHooks {
        render: LogRender,
        status: LogStatus,
        settings: Some(Box::new(settings)),
    };
    let runner = tokio::spawn(run_ladder(session, rx, hooks));

    let mut ticker = tokio::time::interval(Duration::from_millis(args.render_ms.max(50)));
    let deadline = args.duration_secs.map(Duration::from_secs);
    let started = tokio::time::Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if deadline.map_or(false, |d| started.elapsed() >= d) {
                    break;
                }
                if tx.send(LadderCommand::RequestRender).await.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // The runner may already be gone if the channel closed.
    let _ = tx.send(LadderCommand::Shutdown).await;
    let (session, _) = runner.await.context("ladder runtime panicked")?;
    for (name, value) in session.metrics().export() {
        info!("{} = {}", name, value);
    }
    Ok(())
}
