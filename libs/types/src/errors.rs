//! Error types for the ladder core
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Top-level ladder error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LadderError {
    #[error("Tick error: {0}")]
    Tick(#[from] TickError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Unknown ladder: {id}")]
    UnknownLadder { id: String },
}

/// Decimal tick codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickError {
    /// Tick size is non-positive, non-finite or has more than 12 decimals.
    #[error("Invalid tick size: {0}")]
    InvalidTickSize(f64),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Tick arithmetic overflow for price {0}")]
    Overflow(String),
}

/// Feed connection and message errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedError {
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Backend failed to start: {reason}")]
    ProcessFailedToStart { reason: String },

    #[error("Backend timeout: {reason}")]
    ProcessTimeout { reason: String },

    #[error("Backend crashed (exit code {exit_code:?})")]
    ProcessCrashed { exit_code: Option<i32> },

    #[error("Backend cannot resolve symbol {symbol}")]
    UnrecoverableSymbol { symbol: String },

    #[error("Backend I/O error: {reason}")]
    Io { reason: String },
}

impl FeedError {
    /// Whether the feed may be restarted automatically after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FeedError::UnrecoverableSymbol { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_error_display() {
        let err = TickError::InvalidTickSize(-1.0);
        assert_eq!(err.to_string(), "Invalid tick size: -1");
    }

    #[test]
    fn test_feed_error_display() {
        let err = FeedError::MalformedMessage {
            reason: "expected value at line 1 column 1".to_string(),
        };
        assert!(err.to_string().starts_with("Malformed message"));

        let err = FeedError::ProcessCrashed { exit_code: Some(3) };
        assert!(err.to_string().contains("Some(3)"));
    }

    #[test]
    fn test_unrecoverable_symbol_is_not_recoverable() {
        let err = FeedError::UnrecoverableSymbol {
            symbol: "FOOUSDT".to_string(),
        };
        assert!(!err.is_recoverable());
        assert!(FeedError::ProcessCrashed { exit_code: None }.is_recoverable());
    }

    #[test]
    fn test_ladder_error_from_tick_error() {
        let tick_err = TickError::InvalidPrice("abc".to_string());
        let ladder_err: LadderError = tick_err.into();
        assert!(matches!(ladder_err, LadderError::Tick(_)));
    }
}
