//! Venue-specific wire symbols

/// Quote assets recognised when splitting `uzxspot` symbols.
const UZX_SPOT_QUOTES: [&str; 8] = ["USDT", "USDC", "USDR", "USDQ", "EURQ", "EURR", "BTC", "ETH"];

/// Map a UI symbol to the format the backend expects for `exchange`.
///
/// - `uzxspot`: `BTCUSDT` → `BTC-USDT` unless a `-` is already present
/// - `uzxswap`: dashes removed
/// - `binance`, `binance_futures`: underscores and dashes removed
/// - anything else passes through unchanged
pub fn wire_symbol(symbol: &str, exchange: &str) -> String {
    match exchange {
        "uzxspot" => uzx_spot_symbol(symbol),
        "uzxswap" => symbol.replace('-', ""),
        "binance" | "binance_futures" => symbol.replace(['_', '-'], ""),
        _ => symbol.to_string(),
    }
}

fn uzx_spot_symbol(symbol: &str) -> String {
    if symbol.contains('-') {
        return symbol.to_string();
    }
    let upper = symbol.to_ascii_uppercase();
    for quote in UZX_SPOT_QUOTES {
        if upper.ends_with(quote) {
            let split = symbol.len() - quote.len();
            if split == 0 || !symbol.is_char_boundary(split) {
                break;
            }
            return format!("{}-{}", &symbol[..split], &symbol[split..]);
        }
    }
    symbol.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uzx_spot_inserts_separator() {
        assert_eq!(wire_symbol("BTCUSDT", "uzxspot"), "BTC-USDT");
        assert_eq!(wire_symbol("ethbtc", "uzxspot"), "eth-btc");
        assert_eq!(wire_symbol("SOLEURR", "uzxspot"), "SOL-EURR");
    }

    #[test]
    fn test_uzx_spot_leaves_existing_or_unknown() {
        assert_eq!(wire_symbol("BTC-USDT", "uzxspot"), "BTC-USDT");
        assert_eq!(wire_symbol("USDT", "uzxspot"), "USDT");
        assert_eq!(wire_symbol("BTCXYZ", "uzxspot"), "BTCXYZ");
    }

    #[test]
    fn test_uzx_swap_strips_dashes() {
        assert_eq!(wire_symbol("BTC-USDT", "uzxswap"), "BTCUSDT");
    }

    #[test]
    fn test_binance_strips_separators() {
        assert_eq!(wire_symbol("BTC_USDT", "binance"), "BTCUSDT");
        assert_eq!(wire_symbol("ETH-USDT", "binance_futures"), "ETHUSDT");
    }

    #[test]
    fn test_other_exchanges_pass_through() {
        assert_eq!(wire_symbol("BTC-USDT", "lighter"), "BTC-USDT");
        assert_eq!(wire_symbol("BTC_USDT", ""), "BTC_USDT");
    }
}
