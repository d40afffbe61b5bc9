//! # stratus-transport
//!
//! Pooled connection transport for the Stratus memcache client.
//!
//! This crate provides:
//! - `Connection` - one pipelined connection with FIFO response matching
//! - `Pool` / `Lease` - event-driven connection pool with lease semantics
//! - `KeepAlive` - bounded no-op probing for idle connections
//! - `Connect` / `TcpConnector` - the byte-duplex transport abstraction
//! - `Client` - typed facade over a pool
//!
//! ## Architecture Note
//!
//! A single task owns all pool state and drains an event queue; handles,
//! leases, and connection tasks communicate with it exclusively through
//! events. Connections carry only their id and an event sender, so there
//! are no cyclic references between pool and connections.

mod client;
mod connect;
mod connection;
mod keepalive;
mod pool;

pub use client::{Client, TcpClient};
pub use connect::{Connect, TcpConnector, DEFAULT_PORT};
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use keepalive::KeepAlive;
pub use pool::{Lease, Pool, PoolConfig};
