//! # stratus-core
//!
//! Core types, traits, and error definitions for the Stratus memcache
//! client.
//!
//! This crate provides:
//! - Error types (`ClientError`, `ShutdownCause`, `DecodeError`)
//! - The meta-protocol request/response model (`Request`, `Response`,
//!   `Flags`, `ReturnCode`)
//! - The `Value` conversion capability
//! - The `Monitor` observability sink
//! - Reusable value buffers (`BufferPool`)

mod buffer;
mod error;
mod monitor;
mod request;
mod response;
mod value;

pub use buffer::{BufferPool, PooledBuffer};
pub use error::{ClientError, DecodeError, ShutdownCause};
pub use monitor::{ConnectionId, Monitor, NullMonitor, TracingMonitor};
pub use request::{
    validate_key, ArithmeticMode, Flags, Request, StorageMode, TimeToLive, MAX_KEY_LENGTH,
};
pub use response::{Response, ResponseFlags, ReturnCode};
pub use value::Value;
