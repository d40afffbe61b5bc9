//! Meta-command encoding.

use std::time::Instant;

use bytes::{BufMut, BytesMut};

use stratus_core::{ArithmeticMode, Request, TimeToLive};

/// Serializes a [`Request`] into its single-line wire form.
///
/// Encoding appends to a caller-supplied buffer and keeps no state across
/// calls. It is pure over its inputs and never fails: request constructors
/// reject invalid keys and zero deltas before a request reaches the
/// encoder.
///
/// ## Wire Format
///
/// ```text
/// mg <key> [v] [t] [T<seconds>]\r\n
/// ms <key> <len> [T<seconds>] [ME <mode>]\r\n<payload>\r\n
/// md <key>\r\n
/// ma <key> M+|M- D<delta> [v]\r\n
/// mn\r\n
/// ```
///
/// Flag token order is fixed (`v`, `t`, `T` for meta-get; `T`, `ME` for
/// meta-set). A TTL deadline at or before now encodes as `T1`, never `T0`
/// ("never expires" on the wire); see [`TimeToLive::as_seconds_from`].
///
/// ## Example
///
/// ```rust
/// use bytes::BytesMut;
/// use stratus_codec::RequestEncoder;
/// use stratus_core::Request;
///
/// let encoder = RequestEncoder::new();
/// let mut buf = BytesMut::new();
///
/// let request = Request::delete("foo").unwrap();
/// encoder.encode(&request, &mut buf);
/// assert_eq!(&buf[..], b"md foo\r\n");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestEncoder;

impl RequestEncoder {
    /// Create a new encoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode `request` into `dst`, resolving TTL deadlines against the
    /// current instant.
    pub fn encode(&self, request: &Request, dst: &mut BytesMut) {
        self.encode_at(request, Instant::now(), dst);
    }

    /// Encode `request` into `dst`, resolving TTL deadlines against `now`.
    pub fn encode_at(&self, request: &Request, now: Instant, dst: &mut BytesMut) {
        match request {
            Request::Get { key, flags } => {
                dst.reserve(key.len() + 16);
                dst.put_slice(b"mg ");
                dst.put_slice(key);
                if flags.return_value {
                    dst.put_slice(b" v");
                }
                if flags.return_ttl {
                    dst.put_slice(b" t");
                }
                if let Some(ttl) = flags.ttl {
                    put_ttl(dst, ttl, now);
                }
                dst.put_slice(b"\r\n");
            }
            Request::Set { key, value, flags } => {
                dst.reserve(key.len() + value.len() + 32);
                dst.put_slice(b"ms ");
                dst.put_slice(key);
                dst.put_u8(b' ');
                put_decimal(dst, value.len() as u64);
                if let Some(ttl) = flags.ttl {
                    put_ttl(dst, ttl, now);
                }
                if let Some(mode) = flags.storage_mode {
                    dst.put_slice(b" ME ");
                    dst.put_slice(mode.token().as_bytes());
                }
                dst.put_slice(b"\r\n");
                dst.put_slice(value);
                dst.put_slice(b"\r\n");
            }
            Request::Delete { key } => {
                dst.reserve(key.len() + 8);
                dst.put_slice(b"md ");
                dst.put_slice(key);
                dst.put_slice(b"\r\n");
            }
            Request::Arithmetic { key, flags } => {
                dst.reserve(key.len() + 32);
                dst.put_slice(b"ma ");
                dst.put_slice(key);
                // Constructors guarantee the mode is present with a
                // positive delta.
                if let Some(mode) = flags.arithmetic_mode {
                    match mode {
                        ArithmeticMode::Increment(_) => dst.put_slice(b" M+"),
                        ArithmeticMode::Decrement(_) => dst.put_slice(b" M-"),
                    }
                    dst.put_slice(b" D");
                    put_decimal(dst, mode.delta());
                }
                if flags.return_value {
                    dst.put_slice(b" v");
                }
                dst.put_slice(b"\r\n");
            }
            Request::NoOp => {
                dst.put_slice(b"mn\r\n");
            }
        }
    }
}

fn put_ttl(dst: &mut BytesMut, ttl: TimeToLive, now: Instant) {
    dst.put_slice(b" T");
    put_decimal(dst, ttl.as_seconds_from(now));
}

fn put_decimal(dst: &mut BytesMut, mut value: u64) {
    // 20 digits cover u64::MAX.
    let mut digits = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        dst.put_u8(b'0');
        return;
    }
    while value > 0 {
        digits[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    digits[..len].reverse();
    dst.put_slice(&digits[..len]);
}
