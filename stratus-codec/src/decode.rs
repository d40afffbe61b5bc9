//! Meta-response framing and parsing.

use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};

use stratus_core::{DecodeError, Response, ResponseFlags, ReturnCode, TimeToLive};

/// Protocol-defined cap on a response header line.
pub const MAX_HEADER_LINE: usize = 1024 * 1024;

/// Streaming parser for the meta response stream.
///
/// The decoder consumes bytes from a rolling buffer and emits zero or more
/// framed [`Response`]s per invocation. "Need more bytes" is reported as
/// `Ok(None)` without consuming anything, so partial reads can simply be
/// retried once the buffer has grown; a `VA` header is left untouched until
/// its full payload (and trailing CRLF) has arrived.
///
/// Any [`DecodeError`] is a framing violation and fatal for the connection
/// that observed it.
///
/// ## Example
///
/// ```rust
/// use bytes::BytesMut;
/// use stratus_codec::ResponseDecoder;
/// use stratus_core::ReturnCode;
///
/// let decoder = ResponseDecoder::new();
/// let mut buf = BytesMut::from(&b"VA 2\r\nhi\r\n"[..]);
///
/// let response = decoder.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(response.code, ReturnCode::Value);
/// assert_eq!(response.value(), Some(&b"hi"[..]));
/// ```
#[derive(Debug, Clone)]
pub struct ResponseDecoder {
    max_header_line: usize,
}

impl ResponseDecoder {
    /// Create a decoder with the protocol-defined header cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_header_line: MAX_HEADER_LINE,
        }
    }

    /// Create a decoder with a custom header-line cap.
    #[must_use]
    pub fn with_max_header_line(max_header_line: usize) -> Self {
        Self { max_header_line }
    }

    /// Decode one response from `src`, resolving TTL flags against the
    /// current instant.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete
    /// frame.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Response>, DecodeError> {
        self.decode_at(src, Instant::now())
    }

    /// Decode one response from `src`, resolving TTL flags against `now`.
    pub fn decode_at(
        &self,
        src: &mut BytesMut,
        now: Instant,
    ) -> Result<Option<Response>, DecodeError> {
        let Some(line_len) = find_crlf(src) else {
            // A line that still has no terminator past the cap can never
            // become valid.
            if src.len() > self.max_header_line {
                return Err(DecodeError::HeaderTooLong {
                    limit: self.max_header_line,
                });
            }
            return Ok(None);
        };
        if line_len > self.max_header_line {
            return Err(DecodeError::HeaderTooLong {
                limit: self.max_header_line,
            });
        }

        let header = &src[..line_len];
        if header.len() < 2 {
            return Err(DecodeError::MalformedHeader(
                "header shorter than a return code".to_string(),
            ));
        }
        let code_bytes = [header[0], header[1]];
        let code = ReturnCode::from_bytes(code_bytes)
            .ok_or(DecodeError::UnknownCode { code: code_bytes })?;

        let mut tokens = header[2..]
            .split(|b| *b == b' ')
            .filter(|token| !token.is_empty());

        let mut data_length = None;
        let mut frame_end = line_len + 2;
        if code == ReturnCode::Value {
            let token = tokens.next().ok_or_else(|| {
                DecodeError::MalformedHeader("VA header missing data length".to_string())
            })?;
            let length = parse_decimal(token).ok_or_else(|| {
                DecodeError::MalformedHeader("non-numeric data length".to_string())
            })?;
            let payload_len = usize::try_from(length).map_err(|_| {
                DecodeError::MalformedHeader("data length exceeds address space".to_string())
            })?;

            // The full payload plus its CRLF must be buffered before the
            // header is consumed.
            frame_end = frame_end
                .checked_add(payload_len)
                .and_then(|n| n.checked_add(2))
                .ok_or_else(|| {
                    DecodeError::MalformedHeader("data length exceeds address space".to_string())
                })?;
            data_length = Some(length);
        }

        // Remaining tokens are flags, in any order; unknown tokens are
        // ignored for forward compatibility.
        let mut flags = ResponseFlags::default();
        for token in tokens {
            if token[0] == b't' {
                if let Some(seconds) = parse_decimal(&token[1..]) {
                    flags.ttl = Some(if seconds == 0 {
                        TimeToLive::Indefinite
                    } else {
                        TimeToLive::ExpiresAt(now + Duration::from_secs(seconds))
                    });
                }
            }
        }

        if src.len() < frame_end {
            src.reserve(frame_end - src.len());
            return Ok(None);
        }
        src.advance(line_len + 2);

        let value = match data_length {
            Some(length) => {
                let payload = src.split_to(length as usize).freeze();
                if src[..2] != *b"\r\n" {
                    return Err(DecodeError::InvalidPayloadTerminator);
                }
                src.advance(2);
                Some(payload)
            }
            None => None,
        };

        Ok(Some(Response {
            code,
            data_length,
            flags,
            value,
        }))
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}
