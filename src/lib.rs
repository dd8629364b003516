//! Filtering, caching forward proxy.
//!
//! One listening socket serves both kinds of proxy traffic:
//!
//! 1. **CONNECT tunnels** - the target host is checked against the
//!    blocklist, then bytes are relayed opaquely. TLS is never terminated.
//!
//! 2. **Plaintext HTTP** - the request target is checked against the
//!    blocklist, then served from the response cache or fetched upstream
//!    and cached. Websocket/upgrade requests are piped instead.
//!
//! The blocklist, cache and counters are constructed once and shared by
//! every connection task through [`handler::ProxyServices`]. Operators
//! drive them through [`control::ProxyControl`].

pub mod blocklist;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod console;
pub mod control;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod stats;
pub mod tunnel;


pub use config::ProxyConfig;
pub use control::ProxyControl;
pub use error::{ProxyError, Result};
pub use handler::{handle_connection, ProxyHandle, ProxyServer, ProxyServices, Served};
