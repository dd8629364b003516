//! Opaque byte relay for CONNECT tunnels and upgraded plaintext
//! connections.
//!
//! The proxy never looks inside a relayed stream. When either direction
//! hits EOF or an error the relay returns and both sockets are dropped.
//! A failed dial writes nothing to the client; the missing 200 line is
//! the failure signal.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ProxyError, Result};

/// Sent once the upstream TCP handshake completes.
pub const TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

const BUFFER_SIZE: usize = 65536; // 64KB

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTally {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Open a TCP connection to `host:port`. `None` means no timeout.
pub async fn connect_upstream(
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream> {
    let connect = TcpStream::connect((host, port));
    let attempt = match connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, connect).await {
            Ok(result) => result,
            Err(_) => {
                return Err(ProxyError::UpstreamConnect {
                    host: host.to_string(),
                    port,
                    reason: "connection timed out".to_string(),
                })
            }
        },
        None => connect.await,
    };

    attempt.map_err(|e| ProxyError::UpstreamConnect {
        host: host.to_string(),
        port,
        reason: e.to_string(),
    })
}

/// Acknowledge a CONNECT request on an already dialled upstream, then
/// splice.
pub async fn establish<C>(client: &mut C, upstream: &mut TcpStream) -> Result<RelayTally>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    client.write_all(TUNNEL_ESTABLISHED).await?;
    client.flush().await?;
    Ok(splice(client, upstream).await)
}

/// Pipe an upgrade request straight through.
///
/// `initial` is the chunk already consumed for classification; it is
/// replayed to the upstream before splicing. No 200 line is sent, the
/// upstream's own response reaches the client.
pub async fn open_pipe<C>(
    client: &mut C,
    upstream: &mut TcpStream,
    initial: &[u8],
) -> Result<RelayTally>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    upstream.write_all(initial).await?;
    let mut tally = splice(client, upstream).await;
    tally.client_to_upstream += initial.len() as u64;
    Ok(tally)
}

/// Copy bytes both ways until either side closes or fails.
pub async fn splice<A, B>(client: &mut A, upstream: &mut B) -> RelayTally
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut tally = RelayTally::default();
    {
        let client_to_upstream = pump(
            &mut client_read,
            &mut upstream_write,
            &mut tally.client_to_upstream,
        );
        let upstream_to_client = pump(
            &mut upstream_read,
            &mut client_write,
            &mut tally.upstream_to_client,
        );

        tokio::select! {
            _ = client_to_upstream => {},
            _ = upstream_to_client => {},
        }
    }
    tally
}

async fn pump<R, W>(source: &mut R, dest: &mut W, counter: &mut u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => {
                let _ = dest.shutdown().await;
                break;
            }
            Ok(n) => {
                if dest.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                *counter += n as u64;
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Upstream that echoes everything it receives.
    async fn echo_upstream() -> (String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (mut r, mut w) = socket.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });
        (addr.ip().to_string(), addr.port())
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_establish_acknowledges_then_splices() {
        let (host, port) = echo_upstream().await;
        let (mut client, mut proxy_side) = tokio::io::duplex(1024);

        let relay_task = tokio::spawn(async move {
            let mut upstream = connect_upstream(&host, port, None).await?;
            establish(&mut proxy_side, &mut upstream).await
        });

        let mut ack = vec![0u8; TUNNEL_ESTABLISHED.len()];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(ack, TUNNEL_ESTABLISHED);

        client.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");

        drop(client);
        let tally = relay_task.await.unwrap().unwrap();
        assert_eq!(tally.client_to_upstream, 4);
    }

    #[tokio::test]
    async fn test_connect_refused_is_upstream_error() {
        let port = closed_port().await;
        let err = connect_upstream("127.0.0.1", port, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnect { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_open_pipe_replays_initial_chunk() {
        let (host, port) = echo_upstream().await;
        let (mut client, mut proxy_side) = tokio::io::duplex(1024);

        let pipe_task = tokio::spawn(async move {
            let mut upstream = connect_upstream(&host, port, None).await?;
            open_pipe(&mut proxy_side, &mut upstream, b"GET /ws HTTP/1.1\r\n\r\n").await
        });

        let mut replay = vec![0u8; 20];
        client.read_exact(&mut replay).await.unwrap();
        assert_eq!(replay, b"GET /ws HTTP/1.1\r\n\r\n");

        drop(client);
        let tally = pipe_task.await.unwrap().unwrap();
        assert_eq!(tally.client_to_upstream, 20);
    }

    #[tokio::test]
    async fn test_splice_ends_when_upstream_closes() {
        let (mut client, mut proxy_side) = tokio::io::duplex(1024);
        let (mut upstream_peer, mut upstream) = tokio::io::duplex(1024);

        let splice_task =
            tokio::spawn(async move { splice(&mut proxy_side, &mut upstream).await });

        upstream_peer.write_all(b"bye").await.unwrap();
        drop(upstream_peer);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
        let tally = splice_task.await.unwrap();
        assert_eq!(tally.upstream_to_client, 3);
    }
}
