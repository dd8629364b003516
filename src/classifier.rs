//! First-chunk request classification.
//!
//! Only the bytes of the first read on a connection are ever looked at.
//! The tokenizer here understands just enough of the HTTP/1.x request
//! line and header grammar to route the connection:
//!
//! - `CONNECT host:port HTTP/1.1` -> [`RequestKind::Tunnel`]
//! - anything else -> [`RequestKind::Plain`], target from the request line,
//!   host from the `Host: ` header

use crate::error::{ProxyError, Result};

const CONNECT_METHOD: &str = "CONNECT";
const HOST_HEADER: &str = "Host: ";
const CRLF: &str = "\r\n";
const PLAIN_PORT: u16 = 80;
const UPGRADE_MARKERS: [&str; 2] = ["websocket", "upgrade"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Tunnel,
    Plain,
}

/// Routing facts extracted from the first data chunk of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub kind: RequestKind,
    pub host: String,
    pub port: u16,
    pub url: String,
    pub is_upgrade: bool,
}

impl RequestDescriptor {
    /// `/` and `/favicon.ico` are answered by the proxy itself.
    pub fn is_root_path(&self) -> bool {
        self.kind == RequestKind::Plain && (self.url == "/" || self.url == "/favicon.ico")
    }

    /// Target to hand to the upstream fetcher.
    ///
    /// Proxy clients send an absolute target. An origin-form target
    /// (`/path`) is resolved against the `Host` header.
    pub fn fetch_target(&self) -> String {
        if self.url.starts_with('/') {
            format!("http://{}{}", self.host, self.url)
        } else {
            self.url.clone()
        }
    }
}

/// Classify the first chunk read from a client.
pub fn classify(raw: &[u8]) -> Result<RequestDescriptor> {
    let text = String::from_utf8_lossy(raw);
    let request_line = first_line(&text)?;

    let is_upgrade = UPGRADE_MARKERS.iter().any(|marker| text.contains(marker));

    if request_line.starts_with(CONNECT_METHOD) {
        let (host, port) = parse_connect_target(request_line)?;
        return Ok(RequestDescriptor {
            kind: RequestKind::Tunnel,
            url: host.clone(),
            host,
            port,
            is_upgrade,
        });
    }

    let url = request_target(request_line)?;
    let host = host_header(&text)?;

    Ok(RequestDescriptor {
        kind: RequestKind::Plain,
        host,
        port: PLAIN_PORT,
        url,
        is_upgrade,
    })
}

fn first_line(text: &str) -> Result<&str> {
    if text.is_empty() {
        return Err(ProxyError::Parse("empty request".to_string()));
    }
    match text.split_once(CRLF) {
        Some((line, _)) if !line.trim().is_empty() => Ok(line),
        Some(_) => Err(ProxyError::Parse("empty request line".to_string())),
        None => Err(ProxyError::Parse(
            "request line is not CRLF terminated".to_string(),
        )),
    }
}

/// Parse `CONNECT <host>:<port> ...`.
fn parse_connect_target(line: &str) -> Result<(String, u16)> {
    let mut tokens = line.split(' ').filter(|t| !t.is_empty());
    let _method = tokens.next();
    let authority = tokens
        .next()
        .ok_or_else(|| ProxyError::Parse(format!("CONNECT line has no target: {}", line)))?;

    let (host, port_str) = authority.rsplit_once(':').ok_or_else(|| {
        ProxyError::Parse(format!("CONNECT target has no port: {}", authority))
    })?;
    if host.is_empty() {
        return Err(ProxyError::Parse(format!(
            "CONNECT target has no host: {}",
            authority
        )));
    }
    let port = match port_str.parse::<u16>() {
        Ok(0) | Err(_) => {
            return Err(ProxyError::Parse(format!(
                "invalid port in CONNECT: {}",
                authority
            )))
        }
        Ok(port) => port,
    };

    Ok((host.to_string(), port))
}

/// Second whitespace-delimited token of the request line.
fn request_target(line: &str) -> Result<String> {
    line.split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| ProxyError::Parse(format!("request line has no target: {}", line)))
}

fn host_header(text: &str) -> Result<String> {
    let (_, rest) = text
        .split_once(HOST_HEADER)
        .ok_or_else(|| ProxyError::Parse("missing Host header".to_string()))?;
    let (value, _) = rest
        .split_once(CRLF)
        .ok_or_else(|| ProxyError::Parse("Host header is not CRLF terminated".to_string()))?;
    let value = value.trim();
    if value.is_empty() {
        return Err(ProxyError::Parse("empty Host header".to_string()));
    }
    Ok(value.to_string())
}
