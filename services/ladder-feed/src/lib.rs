//! Ladder Feed Service
//!
//! Consumes the line-delimited JSON feed of an external order book backend
//! and produces:
//! - A sparse tick-keyed mirror of the order book window
//! - Compression-bucketed depth snapshots for any tick range
//! - Rolling trade prints
//! - A virtual-scrolling viewport that prefetches depth from the backend
//!
//! Each ladder column is an independent [`session::LadderSession`] with its
//! own backend process, mirror and viewport. Nothing is shared between
//! ladders.
//!
//! # Architecture
//!
//! ```text
//!   Backend process (stdout / stderr)
//!        │
//!    ┌───▼────┐
//!    │ Feed   │  ← framing, parsing, watchdog, crash restart
//!    └───┬────┘
//!        │
//!   ┌────┴─────┐
//!   │          │
//! ┌─▼──┐  ┌───▼───┐
//! │Book│  │Prints │
//! └─┬──┘  └───────┘
//!   │ buffer bounds
//! ┌─▼────────┐   shift / center_auto
//! │Viewport  │ ─────────────────────► Backend stdin
//! └─┬────────┘
//!   │ coalesced pulls
//! ┌─▼────────┐
//! │Snapshot  │ → DomSnapshot → renderer
//! └──────────┘
//! ```

pub mod config;
pub mod events;
pub mod feed;
pub mod ingestion;
pub mod metrics;
pub mod order_book;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod snapshot;
pub mod trades;
pub mod viewport;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
