//! Feed Connection Manager
//!
//! Runs the external feed backend for one ladder: builds its arguments,
//! supervises its lifecycle (watchdog, crash restart, fatal symbol
//! detection), frames its output into [`FeedMessage`](crate::events::FeedMessage)s
//! and writes control commands back.
//!
//! [`connection`] is the synchronous state machine; [`driver`] executes its
//! actions against a real child process on tokio.

pub mod connection;
pub mod diagnostics;
pub mod driver;
pub mod launch;
pub mod proxy;
pub mod symbol;

pub use connection::{
    decorate_status, ExitKind, FeedAction, FeedConnection, FeedEvent, FeedState, ProcessErrorKind,
};
pub use driver::FeedDriver;
pub use launch::LaunchSpec;
pub use proxy::{EnvProxyResolver, NoSystemProxy, SystemProxyResolver};
