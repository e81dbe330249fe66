//! WebSocket transport for the score channel.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "https://spikestream.tooolky.com";
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECTION_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(20_000);

pub type SocketStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection options. WebSocket transport only, no long-polling fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub server_url: Url,
    pub reconnection: bool,
    /// Consecutive failed attempts before giving up.
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    /// Bound on connect plus Socket.IO handshake.
    pub connect_timeout: Duration,
}

impl ChannelOptions {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            reconnection: true,
            reconnection_attempts: DEFAULT_RECONNECTION_ATTEMPTS,
            reconnection_delay: DEFAULT_RECONNECTION_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// WebSocket endpoint for the Engine.IO v4 transport.
    pub fn endpoint(&self) -> Result<Url> {
        socket_io_endpoint(&self.server_url)
    }
}

/// Maps `https://host` to `wss://host/socket.io/?EIO=4&transport=websocket`.
pub fn socket_io_endpoint(server: &Url) -> Result<Url> {
    let scheme = match server.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => bail!("Unsupported score server scheme: {}", other),
    };
    if server.host_str().is_none() {
        bail!("Score server URL has no host: {}", server);
    }

    let mut endpoint = server.clone();
    endpoint
        .set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot use scheme {} for {}", scheme, server))?;

    let base = server.path().trim_end_matches('/');
    endpoint.set_path(&format!("{}/socket.io/", base));
    endpoint.set_query(Some("EIO=4&transport=websocket"));
    endpoint.set_fragment(None);
    Ok(endpoint)
}

pub async fn open_socket(endpoint: &Url) -> Result<SocketStream> {
    debug!("[ScoreChannel] Opening {}", endpoint);
    let (stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
        .await
        .context("WebSocket connection failed")?;
    Ok(stream)
}
