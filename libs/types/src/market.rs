//! Market vocabulary shared by feed messages and ladder views

use serde::{Deserialize, Serialize};

/// Aggressor side of a trade print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buyer-initiated print
    Buy,
    /// Seller-initiated print
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Parse the feed's side string. Anything other than `"sell"` is a buy,
    /// which is how the feed backend reports its default.
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("sell") {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl Default for Side {
    fn default() -> Self {
        Side::Buy
    }
}

/// Row ordering of a rendered ladder relative to its anchor row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LadderDirection {
    /// Highest price in the first row
    Descending,
    /// Lowest price in the first row
    Ascending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_side_from_wire() {
        assert_eq!(Side::from_wire("sell"), Side::Sell);
        assert_eq!(Side::from_wire("SELL"), Side::Sell);
        assert_eq!(Side::from_wire("buy"), Side::Buy);
        assert_eq!(Side::from_wire(""), Side::Buy);
    }

    #[test]
    fn test_side_serialization() {
        let json = serde_json::to_string(&Side::Sell).unwrap();
        assert_eq!(json, "\"sell\"");
        let side: Side = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(side, Side::Buy);
    }
}
