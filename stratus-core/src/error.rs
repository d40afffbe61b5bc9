//! Error types for the Stratus memcache client.

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

/// Main error type for client operations.
///
/// Every variant records the source location where it was raised
/// (captured through `#[track_caller]` constructors) and, where one
/// exists, the underlying cause. IO causes are wrapped in [`Arc`] so
/// errors stay `Clone` and can be fanned out to multiple waiters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The connection is finished; the submission was rejected or resumed
    /// with this error.
    #[error("connection shut down: {cause} (at {location})")]
    ConnectionShutdown {
        /// Why the connection stopped serving requests.
        #[source]
        cause: ShutdownCause,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// The pool could not establish a connection within its limits, or the
    /// transport refused.
    #[error("no connection available: {reason} (at {location})")]
    ConnectionUnavailable {
        /// Human-readable reason.
        reason: String,
        /// Underlying IO failure, if the transport produced one.
        #[source]
        cause: Option<Arc<std::io::Error>>,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// Unexpected return code, malformed response, or unconvertible value
    /// payload.
    #[error("protocol error: {reason} (at {location})")]
    Protocol {
        /// What the server sent that the client could not accept.
        reason: String,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// The server reported a missing key for a command that demands
    /// presence.
    #[error("key not found (at {location})")]
    KeyNotFound {
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// The server reported an existing key for an `add`.
    #[error("key exists (at {location})")]
    KeyExists {
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// Response framing violation. Always fatal for its connection.
    #[error("decode error: {cause} (at {location})")]
    Decode {
        /// The framing violation.
        #[source]
        cause: DecodeError,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// A caller precondition was violated before anything touched the
    /// wire (invalid key, zero arithmetic delta).
    #[error("invalid argument: {reason} (at {location})")]
    InvalidArgument {
        /// Which precondition was violated.
        reason: &'static str,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },

    /// A bounded wait elapsed before the server answered.
    #[error("timeout after {after:?} (at {location})")]
    Timeout {
        /// How long the client waited.
        after: Duration,
        /// Where the error was raised.
        location: &'static Location<'static>,
    },
}

impl ClientError {
    /// Create a [`ClientError::ConnectionShutdown`] with the given cause.
    #[track_caller]
    #[must_use]
    pub fn shutdown(cause: ShutdownCause) -> Self {
        Self::ConnectionShutdown {
            cause,
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::ConnectionUnavailable`].
    #[track_caller]
    #[must_use]
    pub fn unavailable(reason: impl Into<String>, cause: Option<Arc<std::io::Error>>) -> Self {
        Self::ConnectionUnavailable {
            reason: reason.into(),
            cause,
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::Protocol`].
    #[track_caller]
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::KeyNotFound`].
    #[track_caller]
    #[must_use]
    pub fn key_not_found() -> Self {
        Self::KeyNotFound {
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::KeyExists`].
    #[track_caller]
    #[must_use]
    pub fn key_exists() -> Self {
        Self::KeyExists {
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::Decode`].
    #[track_caller]
    #[must_use]
    pub fn decode(cause: DecodeError) -> Self {
        Self::Decode {
            cause,
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::InvalidArgument`].
    #[track_caller]
    #[must_use]
    pub fn invalid_argument(reason: &'static str) -> Self {
        Self::InvalidArgument {
            reason,
            location: Location::caller(),
        }
    }

    /// Create a [`ClientError::Timeout`].
    #[track_caller]
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after,
            location: Location::caller(),
        }
    }

    /// Check if this error is retryable on a fresh lease.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionShutdown { .. }
                | Self::ConnectionUnavailable { .. }
                | Self::Timeout { .. }
        )
    }

    /// Check if this error indicates its connection must be closed.
    #[must_use]
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionShutdown { .. } | Self::Decode { .. } | Self::Timeout { .. }
        )
    }

    /// Where the error was raised.
    #[must_use]
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            Self::ConnectionShutdown { location, .. }
            | Self::ConnectionUnavailable { location, .. }
            | Self::Protocol { location, .. }
            | Self::KeyNotFound { location }
            | Self::KeyExists { location }
            | Self::Decode { location, .. }
            | Self::InvalidArgument { location, .. }
            | Self::Timeout { location, .. } => location,
        }
    }
}

/// Why a connection stopped serving requests.
///
/// Preserved on the connection once it transitions to `Finished` so that
/// late submissions and drained waiters all report the original failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownCause {
    /// The transport failed while reading or writing.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// The remote end closed the connection.
    #[error("remote closed the connection")]
    RemoteClosed,

    /// The response stream violated the protocol framing.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A response arrived with no request in flight.
    #[error("response arrived with no request in flight")]
    UnexpectedResponse,

    /// The driving `run` task was cancelled.
    #[error("run task cancelled")]
    Cancelled,

    /// `run` was called more than once on the same connection.
    #[error("connection driver already consumed")]
    DriverConsumed,
}

impl ShutdownCause {
    /// Check whether this shutdown was a cancellation rather than a
    /// transport or protocol failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for ShutdownCause {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

/// Response framing violations. Always fatal for the connection that
/// observed them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The first two bytes of a header line were not a known return code.
    #[error("unknown return code {:?}", String::from_utf8_lossy(.code))]
    UnknownCode {
        /// The offending two bytes.
        code: [u8; 2],
    },

    /// A header line could not be parsed (missing or non-numeric length,
    /// empty line).
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// No CRLF appeared within the header-line cap.
    #[error("header line exceeds {limit} bytes")]
    HeaderTooLong {
        /// The configured cap.
        limit: usize,
    },

    /// A value payload was not terminated by CRLF.
    #[error("value payload not terminated by CRLF")]
    InvalidPayloadTerminator,
}
