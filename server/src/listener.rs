//! Listener address specifiers and multi-listener serving.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use axum::Router;
use hyper::server::accept::Accept;
use serde::{de, Deserialize};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

/// Where the gateway should accept connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// `tcp://host:port` (or a bare `host:port`).
    Tcp(SocketAddr),
    /// `unix:///path/to.sock`
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(anyhow!("unix listener needs a socket path: {s}"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        Ok(Self::Tcp(addr.parse().map_err(|e| {
            anyhow!("invalid listen address {s}: {e}")
        })?))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl<'de> Deserialize<'de> for ListenAddr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        use de::Error;
        String::deserialize(deserializer)
            .and_then(|s| s.parse().map_err(|e: anyhow::Error| Error::custom(e.to_string())))
    }
}

/// Serves the router on every listener until the token is cancelled, then
/// drains in-flight connections.
pub async fn serve_all(
    addrs: &[ListenAddr],
    app: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut servers = Vec::new();

    for addr in addrs {
        tracing::info!("Listening on {addr}...");
        let app = app.clone();
        let token = shutdown.clone();

        match addr {
            ListenAddr::Tcp(addr) => {
                let server = axum::Server::try_bind(addr)?
                    .serve(app.into_make_service())
                    .with_graceful_shutdown(async move { token.cancelled().await });
                servers.push(tokio::spawn(server));
            }
            ListenAddr::Unix(path) => {
                // a stale socket from a previous run refuses the bind
                let _ = std::fs::remove_file(path);
                let uds = UnixListener::bind(path)?;
                let server = axum::Server::builder(ServerAccept { uds })
                    .serve(app.into_make_service())
                    .with_graceful_shutdown(async move { token.cancelled().await });
                servers.push(tokio::spawn(server));
            }
        }
    }

    for handle in servers {
        handle.await??;
    }
    Ok(())
}

struct ServerAccept {
    uds: UnixListener,
}

impl Accept for ServerAccept {
    type Conn = UnixStream;
    type Error = std::io::Error;

    fn poll_accept(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Conn, Self::Error>>> {
        let (stream, _addr) = std::task::ready!(self.uds.poll_accept(cx))?;
        Poll::Ready(Some(Ok(stream)))
    }
}
