//! Client facade over the pool.

use std::future::Future;
use std::sync::Arc;

use stratus_core::{ClientError, Monitor, TimeToLive, Value};

use crate::connect::{Connect, TcpConnector};
use crate::pool::{Lease, Pool, PoolConfig};

/// High-level client: a stateless holder of a [`Pool`] plus typed
/// single-shot helpers.
///
/// Each helper leases a connection, executes one command, and returns the
/// connection to the pool; [`Client::with_connection`] keeps a lease
/// across multiple dependent commands, which is also the only way to get
/// ordering guarantees between them.
///
/// ## Example
///
/// ```rust,no_run
/// use stratus_transport::{Client, TcpConnector, PoolConfig};
///
/// # async fn example() -> Result<(), stratus_core::ClientError> {
/// let client = Client::new(TcpConnector::host("127.0.0.1"), PoolConfig::default());
///
/// // Drive the pool from its own task.
/// # let client = std::sync::Arc::new(client);
/// # let runner = std::sync::Arc::clone(&client);
/// tokio::spawn(async move { runner.run().await });
///
/// client.set("greeting", &String::from("hello")).await?;
/// let value: Option<String> = client.get("greeting").await?;
/// assert_eq!(value.as_deref(), Some("hello"));
/// # Ok(())
/// # }
/// ```
pub struct Client<C: Connect> {
    pool: Pool<C>,
}

/// Client over plain TCP.
pub type TcpClient = Client<TcpConnector>;

impl Client<TcpConnector> {
    /// Create a TCP client for `addr` (`host:port`) with default pool
    /// settings.
    #[must_use]
    pub fn tcp(addr: impl Into<String>) -> Self {
        Self::new(TcpConnector::new(addr), PoolConfig::default())
    }
}

impl<C: Connect> Client<C> {
    /// Create a client over `connector` with no observability sink.
    #[must_use]
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            pool: Pool::new(connector, config),
        }
    }

    /// Create a client emitting lifecycle events to `monitor`.
    #[must_use]
    pub fn with_monitor(connector: C, config: PoolConfig, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            pool: Pool::with_monitor(connector, config, monitor),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    /// Drive the pool until shutdown. Must be awaited exactly once, from
    /// its own task; leases requested before it starts wait (and warn).
    pub async fn run(&self) {
        self.pool.run().await;
    }

    /// Gracefully shut the client down.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Lease a connection, hand it to `op`, and release it on every exit
    /// path — normal return, error, or cancellation of the closure's
    /// future.
    pub async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: FnOnce(Lease<C::Stream>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let lease = self.pool.lease().await?;
        op(lease).await
    }

    /// Fetch the value stored under `key`. Returns `None` on a miss.
    pub async fn get<V: Value>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>, ClientError> {
        let lease = self.pool.lease().await?;
        lease.get(key).await
    }

    /// Store `value` under `key` without expiration.
    pub async fn set<V: Value>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.set(key, value).await
    }

    /// Store `value` under `key` with a time-to-live.
    pub async fn set_with_ttl<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
        ttl: TimeToLive,
    ) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.set_with_ttl(key, value, ttl).await
    }

    /// Store `value` only if `key` does not exist.
    pub async fn add<V: Value>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.add(key, value).await
    }

    /// Store `value` only if `key` already exists.
    pub async fn replace<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.replace(key, value).await
    }

    /// Append `value` to the existing value under `key`.
    pub async fn append<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.append(key, value).await
    }

    /// Prepend `value` to the existing value under `key`.
    pub async fn prepend<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.prepend(key, value).await
    }

    /// Delete `key`.
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.delete(key).await
    }

    /// Add `delta` to the counter under `key`.
    pub async fn increment(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.increment(key, delta).await
    }

    /// Add `delta` to the counter under `key`, returning the new value.
    pub async fn increment_fetch(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<u64, ClientError> {
        let lease = self.pool.lease().await?;
        lease.increment_fetch(key, delta).await
    }

    /// Subtract `delta` from the counter under `key`.
    pub async fn decrement(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.decrement(key, delta).await
    }

    /// Subtract `delta` from the counter under `key`, returning the new
    /// value.
    pub async fn decrement_fetch(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<u64, ClientError> {
        let lease = self.pool.lease().await?;
        lease.decrement_fetch(key, delta).await
    }

    /// Update the time-to-live of `key` without fetching its value.
    pub async fn touch(&self, key: impl AsRef<[u8]>, ttl: TimeToLive) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.touch(key, ttl).await
    }

    /// Issue a no-op round trip.
    pub async fn noop(&self) -> Result<(), ClientError> {
        let lease = self.pool.lease().await?;
        lease.noop().await
    }
}
