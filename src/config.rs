use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProxyError, Result};

pub const DEFAULT_BANNER: &str = "http proxy server";

/// Top-level proxy configuration.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes. Command-line flags are applied on top by the binary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub bind_address: IpAddr,
    pub bind_port: u16,
    /// File with one blocklist pattern per line, loaded at startup.
    pub blocklist_file: Option<PathBuf>,
    /// Patterns blocked at startup in addition to `blocklist_file`.
    pub blocked: Vec<String>,
    /// Reset the lifetime savings counters whenever the cache is cleared.
    pub reset_stats_on_clear: bool,
    /// Largest first chunk read for classification.
    pub first_chunk_limit: usize,
    /// Upstream TCP connect timeout for tunnels and upgrade pipes (0 = none).
    pub connect_timeout_secs: u64,
    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,
    pub banner: String,
    /// Read operator commands from stdin.
    pub console: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            bind_port: 8080,
            blocklist_file: None,
            blocked: Vec::new(),
            reset_stats_on_clear: false,
            first_chunk_limit: 64 * 1024,
            connect_timeout_secs: 30,
            max_connections: 0,
            banner: DEFAULT_BANNER.to_string(),
            console: true,
        }
    }
}

impl ProxyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ProxyConfig =
            toml::from_str(text).map_err(|e| ProxyError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.first_chunk_limit == 0 {
            return Err(ProxyError::Config(
                "first_chunk_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
