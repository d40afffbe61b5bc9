//! Async connection pool.
//!
//! A single `Pool::run` task owns every entry; handles and leases mutate
//! pool state only by enqueueing events, so there are no back-pointers
//! between connections and the pool. Connections are identified by a
//! pool-scoped monotone [`ConnectionId`] carried in observability events.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use stratus_core::{BufferPool, ClientError, ConnectionId, Monitor, NullMonitor};

use crate::connect::Connect;
use crate::connection::{Connection, ConnectionConfig};
use crate::keepalive::KeepAlive;

/// Queue depth past which the pool grows beyond `soft_limit` (never past
/// `hard_limit`).
const BURST_QUEUE_THRESHOLD: usize = 2;

/// Floor for the maintenance tick cadence.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Floor on live connections.
    pub min_connections: usize,

    /// Preferred ceiling; exceeded only under lease pressure.
    pub soft_limit: usize,

    /// Absolute ceiling; blocks further connection starts.
    pub hard_limit: usize,

    /// Retirement threshold for idle connections.
    pub idle_timeout: Duration,

    /// Cadence (and answer deadline) of keep-alive probes.
    pub keep_alive_frequency: Duration,

    /// How long a graceful shutdown waits for outstanding leases.
    /// `None` waits indefinitely.
    pub shutdown_grace: Option<Duration>,

    /// Per-connection settings.
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            soft_limit: 16,
            hard_limit: 16,
            idle_timeout: Duration::from_secs(60),
            keep_alive_frequency: Duration::from_secs(30),
            shutdown_grace: None,
            connection: ConnectionConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the floor on live connections.
    #[must_use]
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the preferred connection ceiling.
    #[must_use]
    pub fn soft_limit(mut self, limit: usize) -> Self {
        self.soft_limit = limit;
        self
    }

    /// Set the absolute connection ceiling.
    #[must_use]
    pub fn hard_limit(mut self, limit: usize) -> Self {
        self.hard_limit = limit;
        self
    }

    /// Set the idle retirement threshold.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the keep-alive cadence.
    #[must_use]
    pub fn keep_alive_frequency(mut self, frequency: Duration) -> Self {
        self.keep_alive_frequency = frequency;
        self
    }

    /// Set the graceful-shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Set per-connection settings.
    #[must_use]
    pub fn connection_config(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    fn normalized(mut self) -> Self {
        if self.hard_limit < self.soft_limit {
            tracing::warn!(
                soft = self.soft_limit,
                hard = self.hard_limit,
                "hard_limit below soft_limit; raising hard_limit"
            );
            self.hard_limit = self.soft_limit;
        }
        if self.min_connections > self.hard_limit {
            tracing::warn!(
                min = self.min_connections,
                hard = self.hard_limit,
                "min_connections above hard_limit; clamping"
            );
            self.min_connections = self.hard_limit;
        }
        self
    }
}

type LeaseReply<S> = oneshot::Sender<Result<Lease<S>, ClientError>>;

enum PoolEvent<S> {
    LeaseRequested { reply: LeaseReply<S> },
    LeaseReturned { id: ConnectionId },
    ConnectionEstablished { id: ConnectionId, stream: S },
    ConnectionFailed { id: ConnectionId, error: Arc<io::Error> },
    KeepAliveDue { id: ConnectionId },
    KeepAliveCompleted { id: ConnectionId, result: Result<(), ClientError> },
    IdleTick,
    Shutdown { done: oneshot::Sender<()> },
}

/// A scoped exclusive hold on a pooled connection.
///
/// Dereferences to [`Connection`]; the connection is returned to the pool
/// when the lease drops, on every exit path including cancellation.
pub struct Lease<S> {
    connection: Arc<Connection<S>>,
    events: mpsc::UnboundedSender<PoolEvent<S>>,
}

impl<S> Lease<S> {
    /// The leased connection.
    #[must_use]
    pub fn connection(&self) -> &Connection<S> {
        &self.connection
    }

    /// Id of the leased connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }
}

impl<S> fmt::Debug for Lease<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.connection.id())
            .finish()
    }
}

impl<S> std::ops::Deref for Lease<S> {
    type Target = Connection<S>;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<S> Drop for Lease<S> {
    fn drop(&mut self) {
        let _ = self.events.send(PoolEvent::LeaseReturned {
            id: self.connection.id(),
        });
    }
}

#[derive(Debug, Clone, Copy)]
enum EntryState {
    Starting,
    Idle { since: Instant },
    Leased,
    KeepAliveInFlight,
    Closing,
}

/// Why a connection spawn was initiated. A failed warm-up spawn must not
/// consume a queued waiter's slot: no waiter was counting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpawnOrigin {
    /// Keeping `live` at `min_connections`.
    WarmUp,
    /// Growth triggered by queued lease demand.
    LeaseDemand,
}

struct Entry<S> {
    connection: Option<Arc<Connection<S>>>,
    state: EntryState,
    origin: SpawnOrigin,
    last_used: Instant,
    run_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    probe_task: Option<JoinHandle<()>>,
}

struct PoolDriver<C: Connect> {
    connector: Arc<C>,
    events: mpsc::UnboundedReceiver<PoolEvent<C::Stream>>,
    monitor: Arc<dyn Monitor>,
    buffers: BufferPool,
}

/// Pool of long-lived connections with lease semantics.
///
/// `run` must be awaited exactly once and owns all pool state; cancelling
/// it is the abrupt shutdown path (every connection task is aborted), and
/// [`Pool::shutdown`] is the graceful one.
pub struct Pool<C: Connect> {
    events: mpsc::UnboundedSender<PoolEvent<C::Stream>>,
    started: Arc<AtomicBool>,
    config: PoolConfig,
    driver: Mutex<Option<PoolDriver<C>>>,
}

impl<C: Connect> Pool<C> {
    /// Create a pool over `connector` with no observability sink.
    #[must_use]
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self::with_monitor(connector, config, Arc::new(NullMonitor))
    }

    /// Create a pool emitting lifecycle events to `monitor`.
    #[must_use]
    pub fn with_monitor(connector: C, config: PoolConfig, monitor: Arc<dyn Monitor>) -> Self {
        let config = config.normalized();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            events: tx,
            started: Arc::new(AtomicBool::new(false)),
            config: config.clone(),
            driver: Mutex::new(Some(PoolDriver {
                connector: Arc::new(connector),
                events: rx,
                monitor,
                buffers: BufferPool::new(),
            })),
        }
    }

    /// The normalized pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Acquire a connection lease, waiting FIFO behind earlier requests
    /// when the pool is at capacity.
    pub async fn lease(&self) -> Result<Lease<C::Stream>, ClientError> {
        if !self.started.load(Ordering::Acquire) {
            tracing::warn!("lease requested before Pool::run started; the request will wait");
        }
        let (reply, receiver) = oneshot::channel();
        self.events
            .send(PoolEvent::LeaseRequested { reply })
            .map_err(|_| ClientError::unavailable("pool is not running", None))?;
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::unavailable(
                "pool stopped while waiting for a lease",
                None,
            )),
        }
    }

    /// Gracefully shut the pool down: refuse new leases, wait for
    /// outstanding ones up to the configured grace, then close every
    /// connection.
    pub async fn shutdown(&self) {
        let (done, receiver) = oneshot::channel();
        if self.events.send(PoolEvent::Shutdown { done }).is_ok() {
            let _ = receiver.await;
        }
    }

    /// Drive the pool until shutdown.
    ///
    /// Must be awaited exactly once. Completes after a graceful
    /// [`Pool::shutdown`]; cancelling the future aborts every connection
    /// task immediately.
    pub async fn run(&self) {
        let driver = self.driver.lock().take();
        let Some(driver) = driver else {
            tracing::warn!("Pool::run called more than once");
            return;
        };
        self.started.store(true, Ordering::Release);

        let PoolDriver {
            connector,
            events: mut receiver,
            monitor,
            buffers,
        } = driver;

        let mut state = PoolState {
            connector,
            config: self.config.clone(),
            monitor,
            buffers,
            events: self.events.clone(),
            entries: HashMap::new(),
            waiters: VecDeque::new(),
            next_id: 0,
            shutting_down: false,
        };
        state.ensure_min();

        let mut tick = tokio::time::interval(tick_cadence(&self.config));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let done = loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(PoolEvent::Shutdown { done }) => break Some(done),
                    Some(event) => state.handle(event),
                    None => break None,
                },
                _ = tick.tick() => state.handle(PoolEvent::IdleTick),
            }
        };

        state.finish(&mut receiver).await;
        if let Some(done) = done {
            let _ = done.send(());
        }
    }
}

fn tick_cadence(config: &PoolConfig) -> Duration {
    (config.idle_timeout.min(config.keep_alive_frequency) / 2).max(MIN_TICK)
}

struct PoolState<C: Connect> {
    connector: Arc<C>,
    config: PoolConfig,
    monitor: Arc<dyn Monitor>,
    buffers: BufferPool,
    events: mpsc::UnboundedSender<PoolEvent<C::Stream>>,
    entries: HashMap<ConnectionId, Entry<C::Stream>>,
    waiters: VecDeque<LeaseReply<C::Stream>>,
    next_id: u64,
    shutting_down: bool,
}

impl<C: Connect> PoolState<C> {
    fn handle(&mut self, event: PoolEvent<C::Stream>) {
        match event {
            PoolEvent::LeaseRequested { reply } => self.handle_lease_requested(reply),
            PoolEvent::LeaseReturned { id } => self.handle_lease_returned(id),
            PoolEvent::ConnectionEstablished { id, stream } => self.handle_established(id, stream),
            PoolEvent::ConnectionFailed { id, error } => self.handle_connect_failed(id, error),
            PoolEvent::KeepAliveDue { id } => self.handle_keep_alive_due(id),
            PoolEvent::KeepAliveCompleted { id, result } => {
                self.handle_keep_alive_completed(id, result);
            }
            PoolEvent::IdleTick => self.handle_tick(),
            // A second shutdown while one is in progress acks immediately.
            PoolEvent::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn live(&self) -> usize {
        self.entries.len()
    }

    fn handle_lease_requested(&mut self, reply: LeaseReply<C::Stream>) {
        if self.shutting_down {
            let _ = reply.send(Err(ClientError::unavailable("pool is shutting down", None)));
            return;
        }
        if let Some(id) = self.pick_idle() {
            self.lease_to(id, reply);
            return;
        }
        self.waiters.push_back(reply);
        self.monitor.request_queue_depth_changed(self.waiters.len());
        self.maybe_grow();
    }

    /// Pick the most recently used idle entry, retiring any whose
    /// connection already died underneath the pool.
    fn pick_idle(&mut self) -> Option<ConnectionId> {
        let dead: Vec<ConnectionId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.state, EntryState::Idle { .. })
                    && entry
                        .connection
                        .as_ref()
                        .is_some_and(|c| c.is_finished())
            })
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.close_entry(id);
        }

        self.entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, EntryState::Idle { .. }))
            .max_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| *id)
    }

    fn lease_to(&mut self, id: ConnectionId, reply: LeaseReply<C::Stream>) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let Some(connection) = entry.connection.clone() else {
            return;
        };
        entry.state = EntryState::Leased;
        entry.last_used = Instant::now();
        self.monitor.connection_leased(id);
        let lease = Lease {
            connection,
            events: self.events.clone(),
        };
        // A failed send means the waiter gave up: the lease drops here and
        // its return event restores the entry to idle.
        let _ = reply.send(Ok(lease));
    }

    fn maybe_grow(&mut self) {
        let live = self.live();
        if live < self.config.soft_limit
            || (live < self.config.hard_limit && self.waiters.len() > BURST_QUEUE_THRESHOLD)
        {
            self.spawn_connection(SpawnOrigin::LeaseDemand);
        }
    }

    fn ensure_min(&mut self) {
        while self.live() < self.config.min_connections {
            self.spawn_connection(SpawnOrigin::WarmUp);
        }
    }

    fn spawn_connection(&mut self, origin: SpawnOrigin) {
        let id = ConnectionId::new(self.next_id);
        self.next_id += 1;
        self.monitor.started_connecting(id);

        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        let connect_task = tokio::spawn(async move {
            match connector.connect().await {
                Ok(stream) => {
                    let _ = events.send(PoolEvent::ConnectionEstablished { id, stream });
                }
                Err(error) => {
                    let _ = events.send(PoolEvent::ConnectionFailed {
                        id,
                        error: Arc::new(error),
                    });
                }
            }
        });

        self.entries.insert(
            id,
            Entry {
                connection: None,
                state: EntryState::Starting,
                origin,
                last_used: Instant::now(),
                run_task: None,
                connect_task: Some(connect_task),
                probe_task: None,
            },
        );
    }

    fn handle_established(&mut self, id: ConnectionId, stream: C::Stream) {
        let Some(entry) = self.entries.get_mut(&id) else {
            // Retired while starting; the stream just drops.
            return;
        };
        entry.connect_task = None;

        let connection = Arc::new(Connection::new(
            id,
            stream,
            self.config.connection.clone(),
            self.buffers.clone(),
            Arc::clone(&self.monitor),
        ));
        let run_task = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                if let Err(error) = connection.run().await {
                    tracing::debug!(id = %connection.id(), %error, "connection run ended");
                }
            })
        };
        entry.connection = Some(connection);
        entry.run_task = Some(run_task);
        entry.state = EntryState::Idle {
            since: Instant::now(),
        };
        self.monitor.connect_succeeded(id);

        if self.shutting_down {
            self.close_entry(id);
            return;
        }
        self.serve_next_waiter(id);
    }

    fn handle_connect_failed(&mut self, id: ConnectionId, error: Arc<io::Error>) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        let error = ClientError::unavailable("failed to establish connection", Some(error));
        self.monitor.connect_failed(id, &error);

        // A failed warm-up spawn had no waiter behind it; leave the queue
        // alone and let the next tick's `ensure_min` try again.
        if entry.origin == SpawnOrigin::WarmUp {
            return;
        }

        // Fail the oldest live waiter; no automatic retry, the next lease
        // request triggers a fresh attempt.
        while let Some(reply) = self.waiters.pop_front() {
            self.monitor.request_queue_depth_changed(self.waiters.len());
            if reply.is_closed() {
                continue;
            }
            let _ = reply.send(Err(error));
            return;
        }
    }

    fn handle_lease_returned(&mut self, id: ConnectionId) {
        self.monitor.connection_released(id);
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.last_used = Instant::now();

        let finished = entry
            .connection
            .as_ref()
            .is_some_and(|c| c.is_finished());
        if finished || self.shutting_down {
            self.close_entry(id);
            return;
        }

        entry.state = EntryState::Idle {
            since: Instant::now(),
        };
        self.serve_next_waiter(id);
    }

    /// Hand the idle connection `id` to the oldest waiter still listening.
    fn serve_next_waiter(&mut self, id: ConnectionId) {
        while let Some(reply) = self.waiters.pop_front() {
            self.monitor.request_queue_depth_changed(self.waiters.len());
            if reply.is_closed() {
                continue;
            }
            self.lease_to(id, reply);
            return;
        }
    }

    fn handle_keep_alive_due(&mut self, id: ConnectionId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        // Keep-alive never preempts a lease in progress.
        if !matches!(entry.state, EntryState::Idle { .. }) {
            return;
        }
        let Some(connection) = entry.connection.clone() else {
            return;
        };
        entry.state = EntryState::KeepAliveInFlight;
        self.monitor.keep_alive_triggered(id);

        let keep_alive = KeepAlive::new(self.config.keep_alive_frequency);
        let events = self.events.clone();
        entry.probe_task = Some(tokio::spawn(async move {
            let result = keep_alive.probe(&connection).await;
            let _ = events.send(PoolEvent::KeepAliveCompleted { id, result });
        }));
    }

    fn handle_keep_alive_completed(
        &mut self,
        id: ConnectionId,
        result: Result<(), ClientError>,
    ) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.probe_task = None;
        if !matches!(entry.state, EntryState::KeepAliveInFlight) {
            return;
        }
        match result {
            Ok(()) => {
                self.monitor.keep_alive_succeeded(id);
                entry.state = EntryState::Idle {
                    since: Instant::now(),
                };
                // A waiter may have queued while the probe was in flight.
                self.serve_next_waiter(id);
            }
            Err(error) => {
                self.monitor.keep_alive_failed(id, &error);
                self.close_entry(id);
            }
        }
    }

    fn handle_tick(&mut self) {
        let now = Instant::now();
        let mut retire = Vec::new();
        let mut probe = Vec::new();

        for (&id, entry) in &self.entries {
            let EntryState::Idle { since } = entry.state else {
                continue;
            };
            if entry
                .connection
                .as_ref()
                .is_some_and(|c| c.is_finished())
            {
                // Dead regardless of the floor.
                retire.push((id, true));
                continue;
            }
            if now.duration_since(entry.last_used) > self.config.idle_timeout {
                retire.push((id, false));
                continue;
            }
            if now.duration_since(since) >= self.config.keep_alive_frequency {
                probe.push(id);
            }
        }

        for (id, dead) in retire {
            if !dead && self.live() <= self.config.min_connections {
                continue;
            }
            self.close_entry(id);
        }
        for id in probe {
            let _ = self.events.send(PoolEvent::KeepAliveDue { id });
        }
        self.ensure_min();

        // Forget waiters that gave up while queued.
        let before = self.waiters.len();
        self.waiters.retain(|reply| !reply.is_closed());
        if self.waiters.len() != before {
            self.monitor.request_queue_depth_changed(self.waiters.len());
        }
    }

    fn close_entry(&mut self, id: ConnectionId) {
        let Some(mut entry) = self.entries.remove(&id) else {
            return;
        };
        entry.state = EntryState::Closing;
        self.monitor.connection_closing(id);

        for task in [
            entry.connect_task.take(),
            entry.probe_task.take(),
            entry.run_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }

        let cause = entry.connection.as_ref().and_then(|c| c.shutdown_cause());
        self.monitor.connection_closed(id, cause.as_ref());
    }

    async fn finish(mut self, receiver: &mut mpsc::UnboundedReceiver<PoolEvent<C::Stream>>) {
        self.shutting_down = true;

        while let Some(reply) = self.waiters.pop_front() {
            let _ = reply.send(Err(ClientError::unavailable("pool is shutting down", None)));
        }
        self.monitor.request_queue_depth_changed(0);

        let deadline = self
            .config
            .shutdown_grace
            .map(|grace| tokio::time::Instant::now() + grace);

        while self
            .entries
            .values()
            .any(|entry| matches!(entry.state, EntryState::Leased))
        {
            let grace = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                () = grace => {
                    let outstanding = self
                        .entries
                        .values()
                        .filter(|entry| matches!(entry.state, EntryState::Leased))
                        .count();
                    tracing::warn!(outstanding, "shutdown grace elapsed with leases outstanding");
                    break;
                }
            }
        }

        let ids: Vec<ConnectionId> = self.entries.keys().copied().collect();
        for id in ids {
            self.close_entry(id);
        }
    }
}

impl<C: Connect> Drop for PoolState<C> {
    fn drop(&mut self) {
        for entry in self.entries.values_mut() {
            for task in [
                entry.connect_task.take(),
                entry.probe_task.take(),
                entry.run_task.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.soft_limit, 16);
        assert_eq!(config.hard_limit, 16);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.keep_alive_frequency, Duration::from_secs(30));
        assert!(config.shutdown_grace.is_none());
    }

    #[test]
    fn test_config_normalization() {
        let config = PoolConfig::new()
            .soft_limit(8)
            .hard_limit(4)
            .normalized();
        assert_eq!(config.hard_limit, 8);

        let config = PoolConfig::new()
            .min_connections(32)
            .hard_limit(16)
            .normalized();
        assert_eq!(config.min_connections, 16);
    }

    #[test]
    fn test_tick_cadence_bounds() {
        let config = PoolConfig::new()
            .idle_timeout(Duration::from_secs(60))
            .keep_alive_frequency(Duration::from_secs(30));
        assert_eq!(tick_cadence(&config), Duration::from_secs(15));

        // Never below the floor, even with tiny timeouts.
        let config = PoolConfig::new().idle_timeout(Duration::from_millis(2));
        assert_eq!(tick_cadence(&config), MIN_TICK);
    }
}
