//! Listener, accept loop, and per-connection dispatch.
//!
//! Each accepted socket gets its own task. The task reads one chunk,
//! classifies it, and takes exactly one of these routes before closing:
//!
//! - malformed -> close, nothing contacted
//! - `/` or `/favicon.ico` -> banner
//! - blocked -> rejection payload
//! - CONNECT -> tunnel relay
//! - plaintext upgrade -> opaque pipe
//! - plaintext -> cache hit, or fetch + cache + respond

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blocklist::Blocklist;
use crate::cache::CacheStore;
use crate::classifier::{self, RequestDescriptor, RequestKind};
use crate::config::ProxyConfig;
use crate::control::ProxyControl;
use crate::error::{ProxyError, Result};
use crate::fetcher::{HttpFetcher, UpstreamFetcher};
use crate::stats::ProxyStats;
use crate::tunnel::{self, RelayTally};

pub const BLOCKED_TUNNEL_RESPONSE: &[u8] = b"HTTP/1.1 403 FORBIDDEN\r\n\r\n";
pub const BLOCKED_PLAIN_RESPONSE: &[u8] = b"Requested Site is Blocked";

const LISTEN_BACKLOG: i32 = 1024;

/// Per-connection knobs taken from [`ProxyConfig`].
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub first_chunk_limit: usize,
    pub connect_timeout: Option<Duration>,
    pub banner: String,
}

impl HandlerSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            first_chunk_limit: config.first_chunk_limit,
            connect_timeout: config.connect_timeout(),
            banner: config.banner.clone(),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Shared services handed to every connection.
#[derive(Clone)]
pub struct ProxyServices {
    pub blocklist: Arc<Blocklist>,
    pub cache: Arc<CacheStore>,
    pub stats: Arc<ProxyStats>,
    pub fetcher: Arc<dyn UpstreamFetcher>,
    pub settings: HandlerSettings,
}

impl ProxyServices {
    /// Empty blocklist and cache around the given fetcher.
    pub fn new(config: &ProxyConfig, fetcher: Arc<dyn UpstreamFetcher>) -> Self {
        let stats = Arc::new(ProxyStats::new());
        let cache = Arc::new(CacheStore::new(
            Arc::clone(&stats),
            config.reset_stats_on_clear,
        ));
        Self {
            blocklist: Arc::new(Blocklist::new()),
            cache,
            stats,
            fetcher,
            settings: HandlerSettings::from_config(config),
        }
    }

    /// Production wiring: reqwest fetcher, blocklist seeded from config.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let services = Self::new(config, Arc::new(HttpFetcher::new()?));
        if let Some(ref path) = config.blocklist_file {
            services.blocklist.load_file(path)?;
        }
        for pattern in &config.blocked {
            services.blocklist.block(pattern);
        }
        Ok(services)
    }

    pub fn control(&self) -> ProxyControl {
        ProxyControl::new(
            Arc::clone(&self.blocklist),
            Arc::clone(&self.cache),
            Arc::clone(&self.stats),
        )
    }

    fn is_blocked(&self, request: &RequestDescriptor) -> bool {
        self.blocklist.is_blocked(&request.url) || self.blocklist.is_blocked(&request.host)
    }
}

/// How a connection was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// Client closed before sending anything.
    Idle,
    Banner,
    Tunneled(RelayTally),
    Piped(RelayTally),
    CacheHit { bytes: usize },
    Fetched { bytes: usize, duration_ms: u64 },
    /// Client went away while the upstream fetch was in flight.
    Abandoned,
}

/// Drive one client connection to completion.
///
/// Errors are confined to this connection. The stream is dropped (and
/// therefore closed) when this returns.
pub async fn handle_connection<S>(mut stream: S, services: &ProxyServices) -> Result<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut buf = vec![0u8; services.settings.first_chunk_limit];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(Served::Idle);
    }
    let initial = &buf[..n];

    let request = classifier::classify(initial)?;
    debug!(
        "{:?} request url={} host={}:{} upgrade={}",
        request.kind, request.url, request.host, request.port, request.is_upgrade
    );

    if request.is_root_path() && !request.is_upgrade {
        respond(&mut stream, services.settings.banner.as_bytes()).await?;
        return Ok(Served::Banner);
    }

    if services.is_blocked(&request) {
        services.stats.request_blocked();
        info!("Blocked request for {}", request.url);
        let payload = match request.kind {
            RequestKind::Tunnel => BLOCKED_TUNNEL_RESPONSE,
            RequestKind::Plain => BLOCKED_PLAIN_RESPONSE,
        };
        respond(&mut stream, payload).await?;
        return Err(ProxyError::Blocked {
            target: request.url,
        });
    }

    match request.kind {
        RequestKind::Tunnel => {
            let mut upstream = dial(services, &request).await?;
            services.stats.tunnel_opened();
            let tally = tunnel::establish(&mut stream, &mut upstream).await?;
            debug!(
                "Tunnel to {}:{} closed: {} bytes up, {} bytes down",
                request.host, request.port, tally.client_to_upstream, tally.upstream_to_client
            );
            Ok(Served::Tunneled(tally))
        }
        RequestKind::Plain if request.is_upgrade => {
            let mut upstream = dial(services, &request).await?;
            let tally = tunnel::open_pipe(&mut stream, &mut upstream, initial).await?;
            debug!("Upgrade pipe to {} closed", request.host);
            Ok(Served::Piped(tally))
        }
        RequestKind::Plain => serve_plain(&mut stream, &request, services).await,
    }
}

async fn dial(services: &ProxyServices, request: &RequestDescriptor) -> Result<TcpStream> {
    tunnel::connect_upstream(
        &request.host,
        request.port,
        services.settings.connect_timeout,
    )
    .await
    .map_err(|e| {
        services.stats.upstream_failed();
        e
    })
}

async fn serve_plain<S>(
    stream: &mut S,
    request: &RequestDescriptor,
    services: &ProxyServices,
) -> Result<Served>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if services.cache.has(&request.url) {
        // A clear between `has` and `get` falls through to a fetch.
        if let Some(body) = services.cache.get(&request.url) {
            info!("Serving cached {} ({} bytes)", request.url, body.len());
            respond(stream, &body).await?;
            return Ok(Served::CacheHit { bytes: body.len() });
        }
    }
    services.stats.record_miss();

    let target = request.fetch_target();
    let fetched = tokio::select! {
        result = services.fetcher.fetch(&target) => result,
        _ = client_closed(stream) => {
            debug!("Client left while fetching {}", target);
            return Ok(Served::Abandoned);
        }
    };
    let fetched = fetched.map_err(|e| {
        services.stats.upstream_failed();
        e
    })?;

    services
        .cache
        .put(&request.url, fetched.body.clone(), fetched.duration_ms);
    info!(
        "Fetched {} ({} bytes, {} ms)",
        request.url,
        fetched.body.len(),
        fetched.duration_ms
    );

    respond(stream, &fetched.body).await?;
    Ok(Served::Fetched {
        bytes: fetched.body.len(),
        duration_ms: fetched.duration_ms,
    })
}

/// Write `payload` and end the client's read side.
async fn respond<S>(stream: &mut S, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(payload).await?;
    stream.flush().await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Resolves once the client hangs up. Anything it sends meanwhile is
/// discarded; only the first chunk is ever parsed.
async fn client_closed<S>(stream: &mut S)
where
    S: AsyncRead + Unpin,
{
    let mut scratch = [0u8; 1024];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

/// Bound proxy listener, ready to serve.
pub struct ProxyServer {
    listener: TcpListener,
    services: ProxyServices,
    max_connections: usize,
}

/// Handle to a running accept loop.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    /// Stop accepting. Connections already being served run to completion.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

impl ProxyServer {
    /// Bind the configured address. Must be called inside a tokio runtime.
    pub fn bind(config: &ProxyConfig, services: ProxyServices) -> Result<Self> {
        use socket2::{Domain, Protocol, Socket, Type};

        let addr = SocketAddr::new(config.bind_address, config.bind_port);
        let bind_err = |source| ProxyError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

        let listener = TcpListener::from_std(socket.into()).map_err(bind_err)?;
        info!("Proxy listening on {}", listener.local_addr().map_err(bind_err)?);

        Ok(Self {
            listener,
            services,
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn control(&self) -> ProxyControl {
        self.services.control()
    }

    /// Run the accept loop on a background task.
    pub fn spawn(self) -> Result<ProxyHandle> {
        let addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(ProxyHandle {
            addr,
            shutdown_tx,
            task,
        })
    }

    /// Accept until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.dispatch(stream, peer),
                    Err(e) => warn!("Accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Proxy listener shutting down");
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let stats = &self.services.stats;
        if self.max_connections > 0 && stats.active_connections() >= self.max_connections as u64 {
            warn!(
                "Connection limit reached ({}), rejecting {}",
                self.max_connections, peer
            );
            return;
        }

        let _ = stream.set_nodelay(true);
        stats.connection_opened();
        debug!("Accepted connection from {}", peer);

        let services = self.services.clone();
        tokio::spawn(async move {
            let _active = scopeguard::guard(Arc::clone(&services.stats), |stats| {
                stats.connection_closed()
            });
            match handle_connection(stream, &services).await {
                Ok(served) => debug!("Connection from {} done: {:?}", peer, served),
                Err(e) if e.is_expected() => debug!("Connection from {} closed: {}", peer, e),
                Err(e) => warn!("Connection from {} failed: {}", peer, e),
            }
        });
    }
}
