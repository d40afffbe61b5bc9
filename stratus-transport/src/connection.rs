//! Single-connection request/response multiplexer.
//!
//! One [`Connection`] owns one byte-duplex stream. Submitted requests flow
//! through a bounded queue into the write half; the read half decodes the
//! response stream and resumes waiters strictly in submission order.
//! Because the meta protocol answers in the order requests were sent, the
//! FIFO waiter queue is the entire correlation mechanism — no per-request
//! IDs, and pipelining falls out for free.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use stratus_codec::{RequestEncoder, ResponseDecoder, MAX_HEADER_LINE};
use stratus_core::{
    ArithmeticMode, BufferPool, ClientError, ConnectionId, Flags, Monitor, Request, Response,
    ReturnCode, ShutdownCause, StorageMode, TimeToLive, Value,
};

/// Configuration for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Depth of the submission queue. Submissions past this bound wait for
    /// the writer to drain.
    pub submission_queue_depth: usize,

    /// Initial capacity of the rolling read buffer.
    pub read_buffer_capacity: usize,

    /// Cap on a response header line before the decoder gives up.
    pub max_header_line: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            submission_queue_depth: 64,
            read_buffer_capacity: 8 * 1024,
            max_header_line: MAX_HEADER_LINE,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the submission queue depth.
    #[must_use]
    pub fn submission_queue_depth(mut self, depth: usize) -> Self {
        self.submission_queue_depth = depth.max(1);
        self
    }

    /// Set the initial read buffer capacity.
    #[must_use]
    pub fn read_buffer_capacity(mut self, capacity: usize) -> Self {
        self.read_buffer_capacity = capacity;
        self
    }

    /// Set the header-line cap.
    #[must_use]
    pub fn max_header_line(mut self, limit: usize) -> Self {
        self.max_header_line = limit;
        self
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created; submissions enqueue until `run` starts.
    Initial,
    /// `run` is driving the read/write loops.
    Running,
    /// Terminal; all pending and future submissions fail.
    Finished,
}

type Waiter = oneshot::Sender<Result<Response, ClientError>>;

struct Submission {
    request: Request,
    reply: Waiter,
}

struct StateCell {
    state: ConnectionState,
    cause: Option<ShutdownCause>,
}

struct Shared {
    id: ConnectionId,
    state: Mutex<StateCell>,
    waiters: Mutex<VecDeque<Waiter>>,
    monitor: Arc<dyn Monitor>,
    queue_depth: usize,
}

struct Driver<S> {
    stream: S,
    submissions: mpsc::Receiver<Submission>,
    decoder: ResponseDecoder,
    read_buffer_capacity: usize,
}

/// One pipelined connection to the server.
///
/// `run` must be awaited exactly once; it drives the stream until the
/// transport fails, the remote closes, or the task is cancelled. All
/// other methods are safe to call from any task at any time.
pub struct Connection<S> {
    shared: Arc<Shared>,
    submissions: mpsc::Sender<Submission>,
    buffers: BufferPool,
    driver: Mutex<Option<Driver<S>>>,
}

impl<S> Connection<S> {
    /// This connection's pool-assigned id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Create a connection over `stream`.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        stream: S,
        config: ConnectionConfig,
        buffers: BufferPool,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.submission_queue_depth);
        Self {
            shared: Arc::new(Shared {
                id,
                state: Mutex::new(StateCell {
                    state: ConnectionState::Initial,
                    cause: None,
                }),
                waiters: Mutex::new(VecDeque::new()),
                monitor,
                queue_depth: config.submission_queue_depth,
            }),
            submissions: tx,
            buffers,
            driver: Mutex::new(Some(Driver {
                stream,
                submissions: rx,
                decoder: ResponseDecoder::with_max_header_line(config.max_header_line),
                read_buffer_capacity: config.read_buffer_capacity,
            })),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.lock().state
    }

    /// Check if the connection has reached its terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == ConnectionState::Finished
    }

    /// Why the connection finished, once it has.
    #[must_use]
    pub fn shutdown_cause(&self) -> Option<ShutdownCause> {
        self.shared.state.lock().cause.clone()
    }

    /// Number of requests currently awaiting responses.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.waiters.lock().len()
    }

    /// Drive the connection until shutdown.
    ///
    /// Must be awaited exactly once. Returns `Ok(())` when the remote
    /// closed the stream cleanly; a transport or framing failure is
    /// returned as [`ClientError::ConnectionShutdown`] with the cause
    /// preserved. Cancelling the future is the documented local shutdown
    /// mechanism: pending waiters are drained with a `Cancelled` cause.
    pub async fn run(&self) -> Result<(), ClientError> {
        let driver = self.driver.lock().take();
        let Some(driver) = driver else {
            tracing::warn!(id = %self.shared.id, "run called more than once");
            return Err(ClientError::shutdown(ShutdownCause::DriverConsumed));
        };

        {
            let mut cell = self.shared.state.lock();
            debug_assert_eq!(cell.state, ConnectionState::Initial);
            cell.state = ConnectionState::Running;
        }

        // Dropped on cancellation: marks the connection finished and
        // drains waiters before the waker ever sees another poll.
        let guard = RunGuard {
            shared: Arc::clone(&self.shared),
        };

        let Driver {
            stream,
            submissions,
            decoder,
            read_buffer_capacity,
        } = driver;
        let (read_half, write_half) = tokio::io::split(stream);

        let cause = tokio::select! {
            cause = write_loop(&self.shared, write_half, submissions) => cause,
            cause = read_loop(&self.shared, read_half, decoder, read_buffer_capacity) => cause,
        };

        finish(&self.shared, cause.clone());
        drop(guard);

        match cause {
            ShutdownCause::RemoteClosed => Ok(()),
            cause => Err(ClientError::shutdown(cause)),
        }
    }

    /// Enqueue `request` and wait for its response.
    ///
    /// In `Initial` the request is queued and served once `run` starts; in
    /// `Finished` it fails immediately with the preserved shutdown cause.
    /// Dropping the returned future abandons the waiter slot: the eventual
    /// response is consumed and discarded by the read loop, keeping FIFO
    /// alignment intact.
    pub async fn submit(&self, request: Request) -> Result<Response, ClientError> {
        if self.is_finished() {
            return Err(self.shutdown_error());
        }
        let (reply, receiver) = oneshot::channel();
        if self
            .submissions
            .send(Submission { request, reply })
            .await
            .is_err()
        {
            return Err(self.shutdown_error());
        }
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(self.shutdown_error()),
        }
    }

    fn shutdown_error(&self) -> ClientError {
        let cause = self
            .shared
            .state
            .lock()
            .cause
            .clone()
            .unwrap_or(ShutdownCause::Cancelled);
        ClientError::shutdown(cause)
    }

    /// Fetch the value stored under `key`. Returns `None` on a miss.
    pub async fn get<V: Value>(&self, key: impl AsRef<[u8]>) -> Result<Option<V>, ClientError> {
        let request = Request::get(key, Flags::new().return_value(true))?;
        let response = self.submit(request).await?;
        match response.code {
            ReturnCode::Value => {
                let payload = response.value().unwrap_or_default();
                V::read_from(payload)
                    .map(Some)
                    .ok_or_else(|| ClientError::protocol("unconvertible value payload"))
            }
            ReturnCode::Miss => Ok(None),
            code => Err(unexpected_code("mg", code)),
        }
    }

    /// Store `value` under `key` without expiration.
    pub async fn set<V: Value>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<(), ClientError> {
        let response = self.store(key, value, None, None).await?;
        expect_stored("ms", response.code)
    }

    /// Store `value` under `key` with a time-to-live.
    pub async fn set_with_ttl<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
        ttl: TimeToLive,
    ) -> Result<(), ClientError> {
        let response = self.store(key, value, None, Some(ttl)).await?;
        expect_stored("ms", response.code)
    }

    /// Store `value` only if `key` does not exist.
    pub async fn add<V: Value>(&self, key: impl AsRef<[u8]>, value: &V) -> Result<(), ClientError> {
        let response = self.store(key, value, Some(StorageMode::Add), None).await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotStored => Err(ClientError::key_exists()),
            code => Err(unexpected_code("ms add", code)),
        }
    }

    /// Store `value` only if `key` already exists.
    pub async fn replace<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let response = self
            .store(key, value, Some(StorageMode::Replace), None)
            .await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotStored => Err(ClientError::key_not_found()),
            code => Err(unexpected_code("ms replace", code)),
        }
    }

    /// Append `value` to the existing value under `key`.
    pub async fn append<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let response = self
            .store(key, value, Some(StorageMode::Append), None)
            .await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotStored => Err(ClientError::key_not_found()),
            code => Err(unexpected_code("ms append", code)),
        }
    }

    /// Prepend `value` to the existing value under `key`.
    pub async fn prepend<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<(), ClientError> {
        let response = self
            .store(key, value, Some(StorageMode::Prepend), None)
            .await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotStored => Err(ClientError::key_not_found()),
            code => Err(unexpected_code("ms prepend", code)),
        }
    }

    /// Delete `key`.
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<(), ClientError> {
        let response = self.submit(Request::delete(key)?).await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotFound => Err(ClientError::key_not_found()),
            code => Err(unexpected_code("md", code)),
        }
    }

    /// Add `delta` to the counter under `key`.
    pub async fn increment(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<(), ClientError> {
        let response = self
            .arithmetic(key, ArithmeticMode::Increment(delta), false)
            .await?;
        expect_arithmetic_ack(response.code)
    }

    /// Add `delta` to the counter under `key`, returning the new value.
    pub async fn increment_fetch(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<u64, ClientError> {
        let response = self
            .arithmetic(key, ArithmeticMode::Increment(delta), true)
            .await?;
        parse_counter(response)
    }

    /// Subtract `delta` from the counter under `key`.
    pub async fn decrement(&self, key: impl AsRef<[u8]>, delta: u64) -> Result<(), ClientError> {
        let response = self
            .arithmetic(key, ArithmeticMode::Decrement(delta), false)
            .await?;
        expect_arithmetic_ack(response.code)
    }

    /// Subtract `delta` from the counter under `key`, returning the new
    /// value.
    pub async fn decrement_fetch(
        &self,
        key: impl AsRef<[u8]>,
        delta: u64,
    ) -> Result<u64, ClientError> {
        let response = self
            .arithmetic(key, ArithmeticMode::Decrement(delta), true)
            .await?;
        parse_counter(response)
    }

    /// Update the time-to-live of `key` without fetching its value.
    ///
    /// Routed through meta-get with a `T` token; the get path reports a
    /// miss as `EN`, so both `NF` and `EN` surface as `KeyNotFound`.
    pub async fn touch(
        &self,
        key: impl AsRef<[u8]>,
        ttl: TimeToLive,
    ) -> Result<(), ClientError> {
        let request = Request::get(key, Flags::new().ttl(ttl))?;
        let response = self.submit(request).await?;
        match response.code {
            ReturnCode::Stored => Ok(()),
            ReturnCode::NotFound | ReturnCode::Miss => Err(ClientError::key_not_found()),
            code => Err(unexpected_code("mg touch", code)),
        }
    }

    /// Issue a no-op and wait for its `MN` sentinel.
    pub async fn noop(&self) -> Result<(), ClientError> {
        let response = self.submit(Request::noop()).await?;
        match response.code {
            ReturnCode::NoOp => Ok(()),
            code => Err(unexpected_code("mn", code)),
        }
    }

    async fn store<V: Value>(
        &self,
        key: impl AsRef<[u8]>,
        value: &V,
        mode: Option<StorageMode>,
        ttl: Option<TimeToLive>,
    ) -> Result<Response, ClientError> {
        let mut payload = self.buffers.acquire();
        value.write_to(payload.as_mut_vec());

        let mut flags = Flags::new();
        if let Some(ttl) = ttl {
            flags = flags.ttl(ttl);
        }
        if let Some(mode) = mode {
            flags = flags.storage_mode(mode);
        }
        self.submit(Request::set(key, payload, flags)?).await
    }

    async fn arithmetic(
        &self,
        key: impl AsRef<[u8]>,
        mode: ArithmeticMode,
        return_value: bool,
    ) -> Result<Response, ClientError> {
        let flags = Flags::new()
            .arithmetic_mode(mode)
            .return_value(return_value);
        self.submit(Request::arithmetic(key, flags)?).await
    }
}

fn expect_stored(command: &str, code: ReturnCode) -> Result<(), ClientError> {
    match code {
        ReturnCode::Stored => Ok(()),
        code => Err(unexpected_code(command, code)),
    }
}

fn expect_arithmetic_ack(code: ReturnCode) -> Result<(), ClientError> {
    match code {
        ReturnCode::Stored | ReturnCode::Value => Ok(()),
        ReturnCode::NotFound => Err(ClientError::key_not_found()),
        code => Err(unexpected_code("ma", code)),
    }
}

fn parse_counter(response: Response) -> Result<u64, ClientError> {
    match response.code {
        ReturnCode::Value => u64::read_from(response.value().unwrap_or_default())
            .ok_or_else(|| ClientError::protocol("non-numeric counter payload")),
        ReturnCode::NotFound => Err(ClientError::key_not_found()),
        code => Err(unexpected_code("ma", code)),
    }
}

fn unexpected_code(command: &str, code: ReturnCode) -> ClientError {
    ClientError::protocol(format!("unexpected return code {code} for {command}"))
}

async fn write_loop<S>(
    shared: &Shared,
    mut writer: WriteHalf<S>,
    mut submissions: mpsc::Receiver<Submission>,
) -> ShutdownCause
where
    S: AsyncWrite,
{
    let encoder = RequestEncoder::new();
    let mut wire = BytesMut::with_capacity(1024);
    loop {
        let Some(Submission { request, reply }) = submissions.recv().await else {
            // The submission sender lives on the connection handle, so a
            // closed channel means the handle itself is gone.
            return ShutdownCause::Cancelled;
        };

        wire.clear();
        encoder.encode(&request, &mut wire);
        drop(request);

        if let Err(e) = writer.write_all(&wire).await {
            let cause = ShutdownCause::from(e);
            let _ = reply.send(Err(ClientError::shutdown(cause.clone())));
            return cause;
        }
        if let Err(e) = writer.flush().await {
            let cause = ShutdownCause::from(e);
            let _ = reply.send(Err(ClientError::shutdown(cause.clone())));
            return cause;
        }

        let depth = {
            let mut waiters = shared.waiters.lock();
            waiters.push_back(reply);
            waiters.len()
        };
        shared
            .monitor
            .connection_utilization_changed(shared.id, depth, shared.queue_depth);
    }
}

async fn read_loop<S>(
    shared: &Shared,
    mut reader: ReadHalf<S>,
    decoder: ResponseDecoder,
    read_buffer_capacity: usize,
) -> ShutdownCause
where
    S: AsyncRead,
{
    let mut buf = BytesMut::with_capacity(read_buffer_capacity);
    loop {
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(response)) => {
                    let (waiter, depth) = {
                        let mut waiters = shared.waiters.lock();
                        let waiter = waiters.pop_front();
                        (waiter, waiters.len())
                    };
                    let Some(waiter) = waiter else {
                        return ShutdownCause::UnexpectedResponse;
                    };
                    if waiter.send(Ok(response)).is_err() {
                        // Waiter abandoned; the response is consumed and
                        // discarded to keep FIFO alignment.
                        tracing::trace!(id = %shared.id, "discarded response for abandoned waiter");
                    }
                    shared.monitor.connection_utilization_changed(
                        shared.id,
                        depth,
                        shared.queue_depth,
                    );
                }
                Ok(None) => break,
                Err(e) => return ShutdownCause::Decode(e),
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => return ShutdownCause::RemoteClosed,
            Ok(_) => {}
            Err(e) => return ShutdownCause::from(e),
        }
    }
}

fn finish(shared: &Shared, cause: ShutdownCause) {
    {
        let mut cell = shared.state.lock();
        if cell.state == ConnectionState::Finished {
            return;
        }
        cell.state = ConnectionState::Finished;
        cell.cause = Some(cause.clone());
    }

    let drained: Vec<Waiter> = {
        let mut waiters = shared.waiters.lock();
        waiters.drain(..).collect()
    };
    if !drained.is_empty() {
        tracing::debug!(
            id = %shared.id,
            pending = drained.len(),
            cause = %cause,
            "connection finished; failing pending waiters"
        );
    }
    for waiter in drained {
        let _ = waiter.send(Err(ClientError::shutdown(cause.clone())));
    }
    shared
        .monitor
        .connection_utilization_changed(shared.id, 0, shared.queue_depth);
}

struct RunGuard {
    shared: Arc<Shared>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        finish(&self.shared, ShutdownCause::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::NullMonitor;

    fn test_connection() -> (Connection<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (local, remote) = tokio::io::duplex(4096);
        let connection = Connection::new(
            ConnectionId::new(0),
            local,
            ConnectionConfig::default(),
            BufferPool::new(),
            Arc::new(NullMonitor),
        );
        (connection, remote)
    }

    #[test]
    fn test_config_builder() {
        let config = ConnectionConfig::new()
            .submission_queue_depth(8)
            .read_buffer_capacity(512)
            .max_header_line(1024);
        assert_eq!(config.submission_queue_depth, 8);
        assert_eq!(config.read_buffer_capacity, 512);
        assert_eq!(config.max_header_line, 1024);

        // Depth zero would deadlock the writer; it is clamped.
        assert_eq!(ConnectionConfig::new().submission_queue_depth(0).submission_queue_depth, 1);
    }

    #[tokio::test]
    async fn test_new_connection_is_initial() {
        let (connection, _remote) = test_connection();
        assert_eq!(connection.state(), ConnectionState::Initial);
        assert!(!connection.is_finished());
        assert_eq!(connection.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let (connection, remote) = test_connection();
        let connection = Arc::new(connection);

        let runner = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run().await })
        };
        // Give the first run a chance to claim the driver.
        tokio::task::yield_now().await;

        let second = connection.run().await;
        assert!(matches!(
            second,
            Err(ClientError::ConnectionShutdown {
                cause: ShutdownCause::DriverConsumed,
                ..
            })
        ));

        drop(remote);
        let first = runner.await.unwrap();
        assert!(first.is_ok());
    }

    #[tokio::test]
    async fn test_submit_after_finish_fails_immediately() {
        let (connection, remote) = test_connection();
        let connection = Arc::new(connection);

        let runner = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run().await })
        };
        drop(remote);
        runner.await.unwrap().unwrap();

        assert!(connection.is_finished());
        let err = connection.submit(Request::noop()).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::ConnectionShutdown {
                cause: ShutdownCause::RemoteClosed,
                ..
            }
        ));
    }
}
