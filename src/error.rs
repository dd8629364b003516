//! Error types for the proxy.
//!
//! Every variant except `Bind` and `Config` is scoped to the single
//! connection that produced it. The accept loop logs it and moves on.

use thiserror::Error;

/// Errors that can occur while serving proxy traffic.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Malformed request: {0}")]
    Parse(String),

    #[error("Blocked by policy: {target}")]
    Blocked { target: String },

    #[error("Upstream connection failed to {host}:{port}: {reason}")]
    UpstreamConnect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Upstream fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Policy and client-input outcomes, as opposed to faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, ProxyError::Parse(_) | ProxyError::Blocked { .. })
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
