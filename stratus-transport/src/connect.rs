//! Transport abstraction and TCP implementation.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Default memcache port.
pub const DEFAULT_PORT: u16 = 11211;

/// Capability for establishing byte-duplex streams.
///
/// The pool calls `connect` whenever it grows; everything above it only
/// sees the resulting stream. TLS wrapping is the consumer's concern: a
/// custom `Connector` can hand back any stream type that satisfies the
/// bounds.
pub trait Connect: Send + Sync + 'static {
    /// The byte-duplex stream produced by this connector.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Establish a new stream to the server.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// TCP connector with nodelay and a connect timeout.
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use stratus_transport::TcpConnector;
///
/// let connector = TcpConnector::new("cache.internal:11211")
///     .connect_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
    nodelay: bool,
}

impl TcpConnector {
    /// Create a connector for `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            nodelay: true,
        }
    }

    /// Create a connector for `host` on the default memcache port.
    #[must_use]
    pub fn host(host: &str) -> Self {
        Self::new(format!("{host}:{DEFAULT_PORT}"))
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable TCP nodelay.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// The configured server address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connect for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
            })??;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}
