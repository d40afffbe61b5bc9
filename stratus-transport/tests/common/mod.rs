//! Shared fixtures: a scripted in-memory server, a test connector, and a
//! recording monitor.

// Not every test binary exercises every fixture.
#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};

use stratus_core::{ClientError, ConnectionId, Monitor, ShutdownCause};
use stratus_transport::Connect;

/// Answer every request on `stream` with a canned reply: `MN` for no-ops,
/// `EN` for gets, `HD` for everything else. Set payloads are drained.
pub async fn respond(stream: DuplexStream) {
    let (read, mut write) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = match reader.read_until(b'\n', &mut line).await {
            Ok(n) => n,
            Err(_) => return,
        };
        if n == 0 {
            return;
        }

        let text = String::from_utf8_lossy(&line);
        let mut parts = text.trim_end().split(' ');
        let reply: &[u8] = match parts.next() {
            Some("mn") => b"MN\r\n",
            Some("mg") => b"EN\r\n",
            Some("md") | Some("ma") => b"HD\r\n",
            Some("ms") => {
                let _key = parts.next();
                let len: usize = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
                let mut payload = vec![0u8; len + 2];
                if reader.read_exact(&mut payload).await.is_err() {
                    return;
                }
                b"HD\r\n"
            }
            _ => return,
        };
        if write.write_all(reply).await.is_err() {
            return;
        }
    }
}

/// Read and discard forever, keeping the stream open without answering.
async fn hold(stream: DuplexStream) {
    let (mut read, _write) = tokio::io::split(stream);
    let mut sink = [0u8; 1024];
    loop {
        match read.read(&mut sink).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// Connector over in-memory duplex streams.
#[derive(Clone, Default)]
pub struct TestConnector {
    established: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
    fail_first: Arc<AtomicUsize>,
}

impl TestConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose server side never answers.
    pub fn unresponsive() -> Self {
        let connector = Self::default();
        connector.silent.store(true, Ordering::Relaxed);
        connector
    }

    /// Refuse all further connection attempts.
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::Relaxed);
    }

    /// Fail the next `count` attempts, each after a short delay so the
    /// test can queue work behind the doomed connect.
    pub fn fail_first(&self, count: usize) {
        self.fail_first.store(count, Ordering::Relaxed);
    }

    /// Number of streams handed out so far.
    pub fn established(&self) -> usize {
        self.established.load(Ordering::Relaxed)
    }
}

impl Connect for TestConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "test connector refused",
            ));
        }

        let mut doomed = false;
        let _ = self
            .fail_first
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |remaining| {
                if remaining > 0 {
                    doomed = true;
                    Some(remaining - 1)
                } else {
                    None
                }
            });
        if doomed {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted connect failure",
            ));
        }
        self.established.fetch_add(1, Ordering::Relaxed);
        let (local, remote) = tokio::io::duplex(64 * 1024);
        if self.silent.load(Ordering::Relaxed) {
            tokio::spawn(hold(remote));
        } else {
            tokio::spawn(respond(remote));
        }
        Ok(local)
    }
}

/// Monitor that records every event as a tagged line.
#[derive(Default)]
pub struct RecordingMonitor {
    events: Mutex<Vec<String>>,
}

impl RecordingMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

impl Monitor for RecordingMonitor {
    fn started_connecting(&self, id: ConnectionId) {
        self.push(format!("started_connecting {id}"));
    }

    fn connect_succeeded(&self, id: ConnectionId) {
        self.push(format!("connect_succeeded {id}"));
    }

    fn connect_failed(&self, id: ConnectionId, _cause: &ClientError) {
        self.push(format!("connect_failed {id}"));
    }

    fn connection_leased(&self, id: ConnectionId) {
        self.push(format!("connection_leased {id}"));
    }

    fn connection_released(&self, id: ConnectionId) {
        self.push(format!("connection_released {id}"));
    }

    fn connection_closing(&self, id: ConnectionId) {
        self.push(format!("connection_closing {id}"));
    }

    fn connection_closed(&self, id: ConnectionId, _cause: Option<&ShutdownCause>) {
        self.push(format!("connection_closed {id}"));
    }

    fn keep_alive_triggered(&self, id: ConnectionId) {
        self.push(format!("keep_alive_triggered {id}"));
    }

    fn keep_alive_succeeded(&self, id: ConnectionId) {
        self.push(format!("keep_alive_succeeded {id}"));
    }

    fn keep_alive_failed(&self, id: ConnectionId, _cause: &ClientError) {
        self.push(format!("keep_alive_failed {id}"));
    }

    fn request_queue_depth_changed(&self, depth: usize) {
        self.push(format!("queue_depth {depth}"));
    }

    fn connection_utilization_changed(&self, id: ConnectionId, in_flight: usize, _capacity: usize) {
        self.push(format!("utilization {id} {in_flight}"));
    }
}
