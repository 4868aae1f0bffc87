//! Proxy resolution for the feed backend
//!
//! An explicitly configured proxy always wins. Otherwise the operating
//! system's proxy for a probe URL is translated into the backend's
//! `--proxy-type` / `--proxy` form. On unix the system configuration is the
//! conventional `*_PROXY` environment.

use std::fmt;

/// Probe URL for exchanges routed through Lighter.
pub const LIGHTER_PROBE_URL: &str = "https://mainnet.zklighter.elliot.ai/";
/// Probe URL for everything else.
pub const DEFAULT_PROBE_URL: &str = "https://www.google.com/generate_204";

/// Proxy protocol understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    Http,
    Socks5,
}

impl ProxyKind {
    /// Anything other than `socks5` is HTTP.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("socks5") {
            ProxyKind::Socks5
        } else {
            ProxyKind::Http
        }
    }

    pub fn as_arg(&self) -> &'static str {
        match self {
            ProxyKind::Http => "http",
            ProxyKind::Socks5 => "socks5",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProxyKind::Http => "HTTP",
            ProxyKind::Socks5 => "SOCKS5",
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Where a resolved proxy came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySource {
    Explicit,
    System,
}

/// Proxy handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProxy {
    /// `--proxy-type` value; omitted when an explicit proxy has no type.
    pub kind: Option<String>,
    /// `--proxy` value.
    pub address: String,
    pub source: ProxySource,
}

impl ResolvedProxy {
    /// Label for the `Backend proxy:` status line.
    pub fn label(&self) -> String {
        match self.source {
            ProxySource::System => "system".to_string(),
            ProxySource::Explicit => summarize(self.kind.as_deref().unwrap_or(""), &self.address),
        }
    }
}

/// Source of operating-system proxy settings.
pub trait SystemProxyResolver {
    /// Proxy to use for `url`, as `(kind, host:port | user:pass@host:port)`.
    fn resolve(&self, url: &str) -> Option<(ProxyKind, String)>;
}

/// Never finds a proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSystemProxy;

impl SystemProxyResolver for NoSystemProxy {
    fn resolve(&self, _url: &str) -> Option<(ProxyKind, String)> {
        None
    }
}

/// Reads `HTTPS_PROXY`, `HTTP_PROXY`, `ALL_PROXY` and `NO_PROXY`, upper or
/// lower case.
pub struct EnvProxyResolver<F = fn(&str) -> Option<String>> {
    lookup: F,
}

impl EnvProxyResolver {
    pub fn from_process_env() -> Self {
        Self {
            lookup: |key: &str| std::env::var(key).ok(),
        }
    }
}

impl<F> EnvProxyResolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Resolver over an arbitrary variable lookup.
    pub fn with_lookup(lookup: F) -> Self {
        Self { lookup }
    }

    fn var(&self, name: &str) -> Option<String> {
        [name.to_string(), name.to_ascii_lowercase()]
            .iter()
            .filter_map(|key| (self.lookup)(key.as_str()))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

impl<F> SystemProxyResolver for EnvProxyResolver<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve(&self, url: &str) -> Option<(ProxyKind, String)> {
        let host = url_host(url)?;
        if let Some(no_proxy) = self.var("NO_PROXY") {
            if host_excluded(&host, &no_proxy) {
                return None;
            }
        }

        let https = url.trim().to_ascii_lowercase().starts_with("https://");
        let candidates: &[&str] = if https {
            &["HTTPS_PROXY", "HTTP_PROXY", "ALL_PROXY"]
        } else {
            &["HTTP_PROXY", "ALL_PROXY"]
        };
        candidates
            .iter()
            .filter_map(|name| self.var(name))
            .find_map(|value| parse_proxy_url(&value))
    }
}

/// Probe URL used to query the system proxy for an exchange.
pub fn probe_url(exchange: &str) -> &'static str {
    if exchange.trim().to_ascii_lowercase().contains("lighter") {
        LIGHTER_PROBE_URL
    } else {
        DEFAULT_PROBE_URL
    }
}

/// Choose the proxy for a backend launch.
pub fn resolve_proxy(
    proxy_type: &str,
    proxy: &str,
    exchange: &str,
    use_system_proxy: bool,
    resolver: &dyn SystemProxyResolver,
) -> Option<ResolvedProxy> {
    let address = proxy.trim();
    if !address.is_empty() {
        let kind = proxy_type.trim().to_ascii_lowercase();
        return Some(ResolvedProxy {
            kind: (!kind.is_empty()).then_some(kind),
            address: address.to_string(),
            source: ProxySource::Explicit,
        });
    }
    if !use_system_proxy {
        return None;
    }
    resolver
        .resolve(probe_url(exchange))
        .map(|(kind, address)| ResolvedProxy {
            kind: Some(kind.as_arg().to_string()),
            address,
            source: ProxySource::System,
        })
}

/// Human summary `PROTO host:port[ auth]` of a proxy setting.
///
/// Accepts `host:port`, `user:pass@host:port`, `host:port:user:pass` and
/// `host:user:pass:port`.
pub fn summarize(proxy_type: &str, raw: &str) -> String {
    let proto = ProxyKind::parse(proxy_type).label();
    let trimmed = raw.trim();

    let mut host = "";
    let mut port = "";
    let mut auth = false;

    let at_split: Vec<&str> = trimmed.split('@').collect();
    if at_split.len() == 2 {
        let credentials: Vec<&str> = at_split[0].split(':').collect();
        let endpoint: Vec<&str> = at_split[1].split(':').collect();
        if credentials.len() == 2 && endpoint.len() == 2 {
            auth = true;
            host = endpoint[0];
            port = endpoint[1];
        }
    } else {
        let parts: Vec<&str> = trimmed.split(':').collect();
        if parts.len() == 2 {
            host = parts[0];
            port = parts[1];
        } else if parts.len() == 4 {
            host = parts[0];
            auth = true;
            port = parts[1];
            if !port.parse::<i64>().map_or(false, |p| p > 0) {
                port = parts[3];
            }
        }
    }

    if host.is_empty() || port.is_empty() {
        return format!("{} <unparsed>", proto);
    }
    format!("{} {}:{}{}", proto, host, port, if auth { " auth" } else { "" })
}

/// Parse `[scheme://][user:pass@]host[:port][/...]` into the backend form.
fn parse_proxy_url(value: &str) -> Option<(ProxyKind, String)> {
    let (scheme, rest) = match value.split_once("://") {
        Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
        None => ("http".to_string(), value),
    };
    let kind = match scheme.as_str() {
        "http" | "https" => ProxyKind::Http,
        "socks5" | "socks5h" => ProxyKind::Socks5,
        _ => return None,
    };

    let authority = rest.split('/').next().unwrap_or("");
    let (credentials, endpoint) = match authority.rsplit_once('@') {
        Some((c, e)) => (Some(c), e),
        None => (None, authority),
    };
    let (host, port) = match endpoint.rsplit_once(':') {
        Some((h, p)) => (h, p.parse::<u16>().ok()?),
        None => (
            endpoint,
            match kind {
                ProxyKind::Http => 80,
                ProxyKind::Socks5 => 1080,
            },
        ),
    };
    if host.trim().is_empty() || port == 0 {
        return None;
    }

    let address = match credentials {
        Some(c) if !c.is_empty() => format!("{}@{}:{}", c, host, port),
        _ => format!("{}:{}", host, port),
    };
    Some((kind, address))
}

fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let authority = rest.split('/').next()?;
    let endpoint = authority.rsplit_once('@').map_or(authority, |(_, e)| e);
    let host = endpoint.split(':').next()?;
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

fn host_excluded(host: &str, no_proxy: &str) -> bool {
    no_proxy
        .split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let entry = entry.split(':').next().unwrap_or("");
            let domain = entry.trim_start_matches('.');
            host == domain || host.ends_with(&format!(".{}", domain))
        })
}
