//! Backend process arguments

use std::path::PathBuf;

use crate::config::FeedConfig;
use crate::feed::diagnostics::redact_args;
use crate::feed::proxy::{resolve_proxy, ResolvedProxy, SystemProxyResolver};
use crate::feed::symbol::wire_symbol;

/// Everything needed to spawn one backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    /// Launcher prefix followed by the backend arguments.
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub wire_symbol: String,
    pub proxy: Option<ResolvedProxy>,
    prefix_len: usize,
}

impl LaunchSpec {
    /// Build the launch for the configured symbol, levels, exchange and proxy.
    ///
    /// `--symbol <wire> --ladder-levels <N> --cache-levels <N>
    /// [--exchange <name>] [--proxy-type <t>] [--proxy <addr>]`
    pub fn build(config: &FeedConfig, resolver: &dyn SystemProxyResolver) -> Self {
        let wire_symbol = wire_symbol(&config.symbol, &config.exchange);
        let levels = config.levels.to_string();

        let mut args = config.backend_prefix_args.clone();
        let prefix_len = args.len();
        args.extend([
            "--symbol".to_string(),
            wire_symbol.clone(),
            "--ladder-levels".to_string(),
            levels.clone(),
            "--cache-levels".to_string(),
            levels,
        ]);
        if !config.exchange.is_empty() {
            args.push("--exchange".to_string());
            args.push(config.exchange.clone());
        }

        let proxy = resolve_proxy(
            &config.proxy_type,
            &config.proxy,
            &config.exchange,
            config.use_system_proxy,
            resolver,
        );
        if let Some(proxy) = &proxy {
            if let Some(kind) = &proxy.kind {
                args.push("--proxy-type".to_string());
                args.push(kind.clone());
            }
            args.push("--proxy".to_string());
            args.push(proxy.address.clone());
        }

        Self {
            program: config.backend_path.clone(),
            args,
            working_dir: config.working_dir.clone(),
            wire_symbol,
            proxy,
            prefix_len,
        }
    }

    /// Arguments after the launcher prefix.
    pub fn backend_args(&self) -> &[String] {
        &self.args[self.prefix_len..]
    }

    /// Backend arguments with the proxy address redacted.
    pub fn redacted_args(&self) -> Vec<String> {
        redact_args(self.backend_args())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::proxy::{NoSystemProxy, ProxyKind, ProxySource};

    struct FixedProxy;

    impl SystemProxyResolver for FixedProxy {
        fn resolve(&self, _url: &str) -> Option<(ProxyKind, String)> {
            Some((ProxyKind::Socks5, "10.0.0.1:1080".to_string()))
        }
    }

    fn config(symbol: &str, exchange: &str) -> FeedConfig {
        FeedConfig {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            levels: 300,
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_args() {
        let spec = LaunchSpec::build(&config("BTC_USDT", "binance"), &NoSystemProxy);
        assert_eq!(
            spec.args,
            vec![
                "--symbol",
                "BTCUSDT",
                "--ladder-levels",
                "300",
                "--cache-levels",
                "300",
                "--exchange",
                "binance"
            ]
        );
        assert_eq!(spec.wire_symbol, "BTCUSDT");
        assert!(spec.proxy.is_none());
    }

    #[test]
    fn test_no_exchange_omits_flag() {
        let spec = LaunchSpec::build(&config("BTCUSDT", ""), &NoSystemProxy);
        assert!(!spec.args.iter().any(|a| a == "--exchange"));
    }

    #[test]
    fn test_explicit_proxy_args() {
        let mut cfg = config("BTCUSDT", "binance");
        cfg.proxy_type = "http".to_string();
        cfg.proxy = "h:1:u:p".to_string();
        let spec = LaunchSpec::build(&cfg, &FixedProxy);
        let tail: Vec<&str> = spec.args.iter().rev().take(4).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["--proxy-type", "http", "--proxy", "h:1:u:p"]);
        assert_eq!(spec.proxy.unwrap().source, ProxySource::Explicit);
    }

    #[test]
    fn test_system_proxy_args_and_redaction() {
        let spec = LaunchSpec::build(&config("BTCUSDT", "lighter"), &FixedProxy);
        assert!(spec.args.windows(2).any(|w| w[0] == "--proxy-type" && w[1] == "socks5"));
        let redacted = spec.redacted_args();
        assert_eq!(redacted.last().map(String::as_str), Some("<redacted>"));
    }

    #[test]
    fn test_prefix_args() {
        let mut cfg = config("BTCUSDT", "");
        cfg.backend_path = PathBuf::from("python3");
        cfg.backend_prefix_args = vec!["backend.py".to_string()];
        let spec = LaunchSpec::build(&cfg, &NoSystemProxy);
        assert_eq!(spec.args[0], "backend.py");
        assert_eq!(spec.backend_args()[0], "--symbol");
    }
}
