//! Types library for the price ladder core
//!
//! Shared vocabulary used by every ladder component: integer tick indices,
//! the decimal tick codec, sides and the error taxonomy. Prices never become
//! map keys; ticks do.
//!
//! # Modules
//! - `ticks`: Tick type, decimal⇄tick codec, bucket helpers, price formatting
//! - `market`: Trade side and ladder direction
//! - `errors`: Error taxonomy

// Public modules
pub mod errors;
pub mod market;
pub mod ticks;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::market::*;
    pub use crate::ticks::*;
}
