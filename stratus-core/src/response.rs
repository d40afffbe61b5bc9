//! Inbound response model for the meta protocol.

use bytes::Bytes;

use crate::request::TimeToLive;

/// The two-letter outcome token beginning every response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// `HD` - stored / ok.
    Stored,
    /// `NS` - not stored.
    NotStored,
    /// `EX` - exists.
    Exists,
    /// `NF` - not found.
    NotFound,
    /// `VA` - value follows, with a data length.
    Value,
    /// `EN` - miss / end.
    Miss,
    /// `MN` - no-op sentinel.
    NoOp,
}

impl ReturnCode {
    /// Parse the first two bytes of a header line. Codes outside the
    /// closed set are a fatal decode error at the framing layer.
    #[must_use]
    pub fn from_bytes(code: [u8; 2]) -> Option<Self> {
        match &code {
            b"HD" => Some(Self::Stored),
            b"NS" => Some(Self::NotStored),
            b"EX" => Some(Self::Exists),
            b"NF" => Some(Self::NotFound),
            b"VA" => Some(Self::Value),
            b"EN" => Some(Self::Miss),
            b"MN" => Some(Self::NoOp),
            _ => None,
        }
    }

    /// The wire form of this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stored => "HD",
            Self::NotStored => "NS",
            Self::Exists => "EX",
            Self::NotFound => "NF",
            Self::Value => "VA",
            Self::Miss => "EN",
            Self::NoOp => "MN",
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags parsed from a response header.
///
/// Unknown tokens are tolerated and dropped by the decoder, so this only
/// carries the fields the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseFlags {
    /// Remaining TTL reported by the server (`t<seconds>`; `0` means
    /// indefinite).
    pub ttl: Option<TimeToLive>,
}

/// One framed server response.
#[derive(Debug, Clone)]
pub struct Response {
    /// Outcome category.
    pub code: ReturnCode,
    /// Advertised payload length; present iff `code` is [`ReturnCode::Value`].
    pub data_length: Option<u64>,
    /// Flags parsed from the header.
    pub flags: ResponseFlags,
    /// Value payload; present iff `code` is [`ReturnCode::Value`].
    pub value: Option<Bytes>,
}

impl Response {
    /// A header-only response with the given code.
    #[must_use]
    pub fn of(code: ReturnCode) -> Self {
        Self {
            code,
            data_length: None,
            flags: ResponseFlags::default(),
            value: None,
        }
    }

    /// A `VA` response carrying `value`.
    #[must_use]
    pub fn with_value(value: Bytes) -> Self {
        Self {
            code: ReturnCode::Value,
            data_length: Some(value.len() as u64),
            flags: ResponseFlags::default(),
            value: Some(value),
        }
    }

    /// Check if this response carries a value payload.
    #[must_use]
    pub fn is_value(&self) -> bool {
        self.code == ReturnCode::Value
    }

    /// The value payload, if present.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}
