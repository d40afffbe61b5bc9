//! # Stratus
//!
//! Asynchronous memcache client speaking the *meta* text protocol.
//!
//! Stratus provides:
//! - **Typed operations** - get, set, delete, add, replace, append,
//!   prepend, increment, decrement, touch, no-op
//! - **Pipelining** - many in-flight requests per connection, matched to
//!   responses strictly in submission order
//! - **Connection pooling** - lease/release with min/soft/hard limits,
//!   idle retirement, and keep-alive probing
//! - **Pluggable transport** - any `AsyncRead + AsyncWrite` stream via
//!   the `Connect` capability; TCP out of the box
//! - **Observability** - a `Monitor` sink receiving every lifecycle event
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stratus::{Client, PoolConfig, TcpConnector};
//!
//! # async fn example() -> Result<(), stratus::ClientError> {
//! let client = Arc::new(Client::new(
//!     TcpConnector::host("127.0.0.1"),
//!     PoolConfig::default(),
//! ));
//!
//! // The pool runs from its own task; cancel it to shut down abruptly,
//! // or call `client.shutdown()` for a graceful drain.
//! let runner = Arc::clone(&client);
//! tokio::spawn(async move { runner.run().await });
//!
//! client.set("greeting", &String::from("hello")).await?;
//! let value: Option<String> = client.get("greeting").await?;
//! assert_eq!(value.as_deref(), Some("hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Stratus is composed of several crates:
//!
//! - [`stratus-core`](stratus_core) - request/response model, errors,
//!   `Value` conversion, observability sink
//! - [`stratus-codec`](stratus_codec) - meta-protocol encoder and
//!   streaming decoder
//! - [`stratus-transport`](stratus_transport) - connection multiplexer,
//!   pool, keep-alive, client facade

// Re-export core types
pub use stratus_core::{
    validate_key, ArithmeticMode, BufferPool, ClientError, ConnectionId, DecodeError, Flags,
    Monitor, NullMonitor, PooledBuffer, Request, Response, ResponseFlags, ReturnCode,
    ShutdownCause, StorageMode, TimeToLive, TracingMonitor, Value, MAX_KEY_LENGTH,
};

// Re-export codec
pub use stratus_codec::{RequestEncoder, ResponseDecoder, MAX_HEADER_LINE};

// Re-export transport
pub use stratus_transport::{
    Client, Connect, Connection, ConnectionConfig, ConnectionState, KeepAlive, Lease, Pool,
    PoolConfig, TcpClient, TcpConnector, DEFAULT_PORT,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use stratus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Client, ClientError, Connect, Flags, PoolConfig, TcpClient, TcpConnector, TimeToLive,
        Value,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
