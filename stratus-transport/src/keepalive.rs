//! Idle-connection keep-alive probing.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use stratus_core::ClientError;

use crate::connection::Connection;

/// Periodic no-op strategy for idle connections.
///
/// While a connection sits idle in the pool beyond `frequency`, the pool
/// probes it with a no-op and expects the `MN` sentinel within the same
/// bound. A probe that fails or times out marks the connection for
/// closing; probes never preempt a lease in progress.
#[derive(Debug, Clone, Copy)]
pub struct KeepAlive {
    frequency: Duration,
}

impl KeepAlive {
    /// Create a keep-alive strategy probing every `frequency`.
    #[must_use]
    pub const fn new(frequency: Duration) -> Self {
        Self { frequency }
    }

    /// The probe cadence, which is also the answer deadline.
    #[must_use]
    pub const fn frequency(&self) -> Duration {
        self.frequency
    }

    /// Probe `connection` with a no-op, bounded by the frequency.
    pub async fn probe<S>(&self, connection: &Connection<S>) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match tokio::time::timeout(self.frequency, connection.noop()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::timeout(self.frequency)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;

    use stratus_core::{BufferPool, ConnectionId, NullMonitor};

    use crate::connection::ConnectionConfig;

    #[tokio::test]
    async fn test_probe_succeeds_on_mn() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let connection = Arc::new(Connection::new(
            ConnectionId::new(0),
            local,
            ConnectionConfig::default(),
            BufferPool::new(),
            Arc::new(NullMonitor),
        ));

        let runner = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run().await })
        };
        let responder = tokio::spawn(async move {
            let mut request = [0u8; 4];
            tokio::io::AsyncReadExt::read_exact(&mut remote, &mut request)
                .await
                .unwrap();
            assert_eq!(&request, b"mn\r\n");
            remote.write_all(b"MN\r\n").await.unwrap();
            remote
        });

        let keep_alive = KeepAlive::new(Duration::from_secs(1));
        keep_alive.probe(&connection).await.unwrap();

        runner.abort();
        let _ = responder.await;
    }

    #[tokio::test]
    async fn test_probe_times_out_without_answer() {
        let (local, _remote) = tokio::io::duplex(1024);
        let connection = Arc::new(Connection::new(
            ConnectionId::new(0),
            local,
            ConnectionConfig::default(),
            BufferPool::new(),
            Arc::new(NullMonitor),
        ));

        let runner = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run().await })
        };

        let keep_alive = KeepAlive::new(Duration::from_millis(50));
        let err = keep_alive.probe(&connection).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));

        runner.abort();
    }
}
