//! # stratus-codec
//!
//! Meta-protocol wire codec for the Stratus memcache client.
//!
//! This crate provides:
//! - `RequestEncoder` - serialize a `Request` into its wire form
//! - `ResponseDecoder` - frame and parse a response byte stream
//!
//! The meta protocol is line-oriented: a request is a single ASCII line
//! terminated by CRLF, optionally followed by a payload line (for `ms`);
//! a response is a header line whose first two bytes carry the return
//! code, followed by a length-prefixed payload when the code is `VA`.

mod decode;
mod encode;

pub use decode::{ResponseDecoder, MAX_HEADER_LINE};
pub use encode::RequestEncoder;
