//! Observability sink for pool and connection lifecycle events.

use crate::error::{ClientError, ShutdownCause};

/// Identifier for a pooled connection.
///
/// Assigned monotonically by a pool-scoped generator; opaque but stable
/// for the connection's lifetime, and carried by every observability
/// event that concerns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id. Ids are assigned by the pool.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Capability invoked by the core with lifecycle events.
///
/// Every method has a no-op default, so implementations pick the subset
/// they care about.
///
/// ## Example
///
/// ```rust
/// use stratus_core::{ConnectionId, Monitor};
///
/// struct LeaseCounter(std::sync::atomic::AtomicU64);
///
/// impl Monitor for LeaseCounter {
///     fn connection_leased(&self, _id: ConnectionId) {
///         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
///     }
/// }
/// ```
pub trait Monitor: Send + Sync + 'static {
    /// A connection attempt was started.
    fn started_connecting(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A connection attempt succeeded.
    fn connect_succeeded(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A connection attempt failed.
    fn connect_failed(&self, id: ConnectionId, cause: &ClientError) {
        let _ = (id, cause);
    }

    /// A connection was handed to a caller.
    fn connection_leased(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A lease was returned to the pool.
    fn connection_released(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A connection began closing.
    fn connection_closing(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A connection finished closing.
    fn connection_closed(&self, id: ConnectionId, cause: Option<&ShutdownCause>) {
        let _ = (id, cause);
    }

    /// An idle connection was probed with a no-op.
    fn keep_alive_triggered(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A keep-alive probe was answered in time.
    fn keep_alive_succeeded(&self, id: ConnectionId) {
        let _ = id;
    }

    /// A keep-alive probe failed or timed out.
    fn keep_alive_failed(&self, id: ConnectionId, cause: &ClientError) {
        let _ = (id, cause);
    }

    /// The pool's lease waiter queue changed depth.
    fn request_queue_depth_changed(&self, depth: usize) {
        let _ = depth;
    }

    /// A connection's in-flight request count changed.
    fn connection_utilization_changed(&self, id: ConnectionId, in_flight: usize, capacity: usize) {
        let _ = (id, in_flight, capacity);
    }
}

/// Monitor that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl Monitor for NullMonitor {}

/// Monitor that forwards every event to [`tracing`] with structured
/// fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl Monitor for TracingMonitor {
    fn started_connecting(&self, id: ConnectionId) {
        tracing::debug!(id = %id, "connecting");
    }

    fn connect_succeeded(&self, id: ConnectionId) {
        tracing::debug!(id = %id, "connection established");
    }

    fn connect_failed(&self, id: ConnectionId, cause: &ClientError) {
        tracing::warn!(id = %id, error = %cause, "connection attempt failed");
    }

    fn connection_leased(&self, id: ConnectionId) {
        tracing::trace!(id = %id, "connection leased");
    }

    fn connection_released(&self, id: ConnectionId) {
        tracing::trace!(id = %id, "connection released");
    }

    fn connection_closing(&self, id: ConnectionId) {
        tracing::debug!(id = %id, "connection closing");
    }

    fn connection_closed(&self, id: ConnectionId, cause: Option<&ShutdownCause>) {
        match cause {
            Some(cause) => tracing::debug!(id = %id, cause = %cause, "connection closed"),
            None => tracing::debug!(id = %id, "connection closed"),
        }
    }

    fn keep_alive_triggered(&self, id: ConnectionId) {
        tracing::trace!(id = %id, "keep-alive probe sent");
    }

    fn keep_alive_succeeded(&self, id: ConnectionId) {
        tracing::trace!(id = %id, "keep-alive probe answered");
    }

    fn keep_alive_failed(&self, id: ConnectionId, cause: &ClientError) {
        tracing::warn!(id = %id, error = %cause, "keep-alive probe failed");
    }

    fn request_queue_depth_changed(&self, depth: usize) {
        tracing::trace!(depth, "lease queue depth changed");
    }

    fn connection_utilization_changed(&self, id: ConnectionId, in_flight: usize, capacity: usize) {
        tracing::trace!(id = %id, in_flight, capacity, "connection utilization changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId::new(3).to_string(), "conn-3");
        assert_eq!(ConnectionId::new(3).as_u64(), 3);
    }

    #[test]
    fn test_default_methods_are_noops() {
        // A monitor implementing nothing still accepts every event.
        struct Quiet;
        impl Monitor for Quiet {}

        let monitor = Quiet;
        monitor.started_connecting(ConnectionId::new(1));
        monitor.connection_closed(ConnectionId::new(1), None);
        monitor.request_queue_depth_changed(7);
    }
}
