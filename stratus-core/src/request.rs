//! Outbound request model for the meta protocol.
//!
//! A [`Request`] is the in-memory form of a single meta command (`mg`,
//! `ms`, `md`, `ma`, `mn`). Checked constructors enforce the caller
//! preconditions — key shape and positive arithmetic deltas — so the
//! encoder never has to fail.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::buffer::PooledBuffer;
use crate::error::ClientError;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Validate a key against the protocol preconditions: non-empty, at most
/// [`MAX_KEY_LENGTH`] bytes, no whitespace or control bytes.
pub fn validate_key(key: &[u8]) -> Result<(), ClientError> {
    if key.is_empty() {
        return Err(ClientError::invalid_argument("key is empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(ClientError::invalid_argument("key exceeds 250 bytes"));
    }
    if key.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(ClientError::invalid_argument(
            "key contains whitespace or control bytes",
        ));
    }
    Ok(())
}

/// Time-to-live for a stored value.
///
/// `Indefinite` is `0` on the wire ("never expires"); an expiry deadline is
/// converted to whole seconds at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    /// The value never expires.
    Indefinite,
    /// The value expires at the given instant.
    ExpiresAt(Instant),
}

impl TimeToLive {
    /// A TTL expiring `duration` from now.
    #[must_use]
    pub fn expires_in(duration: Duration) -> Self {
        Self::ExpiresAt(Instant::now() + duration)
    }

    /// Convert to whole seconds relative to `now`, as carried by the `T`
    /// token.
    ///
    /// Deadlines are rounded up, with a one-second floor: a deadline at or
    /// before `now` encodes as `1`, never as `0` (which means "never
    /// expires" on the wire). `Indefinite` encodes as `0`.
    #[must_use]
    pub fn as_seconds_from(&self, now: Instant) -> u64 {
        match self {
            Self::Indefinite => 0,
            Self::ExpiresAt(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                let mut seconds = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    seconds += 1;
                }
                seconds.max(1)
            }
        }
    }
}

/// Sub-type of meta-set selecting storage semantics. Emitted as the
/// `ME <mode>` token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Unconditionally store.
    Set,
    /// Store only if the key does not exist.
    Add,
    /// Append to an existing value.
    Append,
    /// Prepend to an existing value.
    Prepend,
    /// Store only if the key exists.
    Replace,
}

impl StorageMode {
    /// The wire token for this mode.
    #[must_use]
    pub const fn token(&self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Replace => "replace",
        }
    }
}

/// Direction and delta for meta arithmetic. Emitted as `M+`/`M-` plus
/// `D<delta>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticMode {
    /// Add `delta` to the stored value.
    Increment(u64),
    /// Subtract `delta` from the stored value.
    Decrement(u64),
}

impl ArithmeticMode {
    /// The delta carried by this mode.
    #[must_use]
    pub const fn delta(&self) -> u64 {
        match self {
            Self::Increment(d) | Self::Decrement(d) => *d,
        }
    }
}

/// Optional per-request protocol flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// Ask the server to return the value in the data block (`v`).
    pub return_value: bool,
    /// Attach or update a time-to-live (`T<seconds>`).
    pub ttl: Option<TimeToLive>,
    /// Ask the server to return the remaining TTL (`t`).
    pub return_ttl: bool,
    /// Storage semantics for meta-set (`ME <mode>`).
    pub storage_mode: Option<StorageMode>,
    /// Direction and delta for meta arithmetic (`M+`/`M-`, `D<delta>`).
    pub arithmetic_mode: Option<ArithmeticMode>,
}

impl Flags {
    /// Create an empty flag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the value in the response data block.
    #[must_use]
    pub fn return_value(mut self, on: bool) -> Self {
        self.return_value = on;
        self
    }

    /// Attach a time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: TimeToLive) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Request the remaining TTL in the response flags.
    #[must_use]
    pub fn return_ttl(mut self, on: bool) -> Self {
        self.return_ttl = on;
        self
    }

    /// Select storage semantics for meta-set.
    #[must_use]
    pub fn storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = Some(mode);
        self
    }

    /// Select direction and delta for meta arithmetic.
    #[must_use]
    pub fn arithmetic_mode(mut self, mode: ArithmeticMode) -> Self {
        self.arithmetic_mode = Some(mode);
        self
    }
}

/// A single outbound meta command.
#[derive(Debug)]
pub enum Request {
    /// Meta get (`mg`).
    Get {
        /// Key to look up.
        key: Bytes,
        /// Protocol flags.
        flags: Flags,
    },
    /// Meta set (`ms`).
    Set {
        /// Key to store under.
        key: Bytes,
        /// Opaque value payload.
        value: PooledBuffer,
        /// Protocol flags.
        flags: Flags,
    },
    /// Meta delete (`md`).
    Delete {
        /// Key to remove.
        key: Bytes,
    },
    /// Meta arithmetic (`ma`).
    Arithmetic {
        /// Key of the counter.
        key: Bytes,
        /// Protocol flags; `arithmetic_mode` is required.
        flags: Flags,
    },
    /// No-op (`mn`).
    NoOp,
}

impl Request {
    /// Build a meta-get request.
    pub fn get(key: impl AsRef<[u8]>, flags: Flags) -> Result<Self, ClientError> {
        let key = key.as_ref();
        validate_key(key)?;
        Ok(Self::Get {
            key: Bytes::copy_from_slice(key),
            flags,
        })
    }

    /// Build a meta-set request carrying `value` as its payload.
    pub fn set(
        key: impl AsRef<[u8]>,
        value: PooledBuffer,
        flags: Flags,
    ) -> Result<Self, ClientError> {
        let key = key.as_ref();
        validate_key(key)?;
        Ok(Self::Set {
            key: Bytes::copy_from_slice(key),
            value,
            flags,
        })
    }

    /// Build a meta-delete request.
    pub fn delete(key: impl AsRef<[u8]>) -> Result<Self, ClientError> {
        let key = key.as_ref();
        validate_key(key)?;
        Ok(Self::Delete {
            key: Bytes::copy_from_slice(key),
        })
    }

    /// Build a meta-arithmetic request.
    ///
    /// `flags.arithmetic_mode` must be present with a positive delta.
    pub fn arithmetic(key: impl AsRef<[u8]>, flags: Flags) -> Result<Self, ClientError> {
        let key = key.as_ref();
        validate_key(key)?;
        match flags.arithmetic_mode {
            None => Err(ClientError::invalid_argument("arithmetic mode is required")),
            Some(mode) if mode.delta() == 0 => Err(ClientError::invalid_argument(
                "arithmetic delta must be positive",
            )),
            Some(_) => Ok(Self::Arithmetic {
                key: Bytes::copy_from_slice(key),
                flags,
            }),
        }
    }

    /// Build a no-op request.
    #[must_use]
    pub const fn noop() -> Self {
        Self::NoOp
    }

    /// The key this request addresses, if any.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            Self::Get { key, .. }
            | Self::Set { key, .. }
            | Self::Delete { key }
            | Self::Arithmetic { key, .. } => Some(key),
            Self::NoOp => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_boundaries() {
        assert!(validate_key(&[b'k'; 250]).is_ok());
        assert!(validate_key(&[b'k'; 251]).is_err());
        assert!(validate_key(b"").is_err());
        assert!(validate_key(b"has space").is_err());
        assert!(validate_key(b"has\ttab").is_err());
        assert!(validate_key(b"has\x01control").is_err());
    }

    #[test]
    fn test_ttl_seconds_floor() {
        let now = Instant::now();

        assert_eq!(TimeToLive::Indefinite.as_seconds_from(now), 0);
        // A deadline at or before now still encodes a one-second TTL.
        assert_eq!(TimeToLive::ExpiresAt(now).as_seconds_from(now), 1);
        assert_eq!(
            TimeToLive::ExpiresAt(now + Duration::from_secs(89)).as_seconds_from(now),
            89
        );
        // Partial seconds round up.
        assert_eq!(
            TimeToLive::ExpiresAt(now + Duration::from_millis(1500)).as_seconds_from(now),
            2
        );
    }

    #[test]
    fn test_arithmetic_preconditions() {
        let flags = Flags::new().arithmetic_mode(ArithmeticMode::Increment(0));
        assert!(Request::arithmetic("ctr", flags).is_err());

        assert!(Request::arithmetic("ctr", Flags::new()).is_err());

        let flags = Flags::new().arithmetic_mode(ArithmeticMode::Increment(3));
        assert!(Request::arithmetic("ctr", flags).is_ok());
    }

    #[test]
    fn test_invalid_key_rejected_before_encoding() {
        assert!(Request::get("bad key", Flags::new()).is_err());
        assert!(Request::delete("").is_err());
    }

    #[test]
    fn test_flags_builder() {
        let flags = Flags::new()
            .return_value(true)
            .ttl(TimeToLive::Indefinite)
            .storage_mode(StorageMode::Add);

        assert!(flags.return_value);
        assert_eq!(flags.ttl, Some(TimeToLive::Indefinite));
        assert_eq!(flags.storage_mode, Some(StorageMode::Add));
        assert!(!flags.return_ttl);
    }
}
