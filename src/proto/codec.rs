//! Codec trait boundary.
//!
//! # Responsibilities
//! - Turn buffered inbound bytes into [`Request`] values
//! - Turn [`Response`] values into outbound bytes
//!
//! # Design Decisions
//! - Decoding is incremental: a partial frame yields `Ok(None)` and the
//!   caller reads more bytes before trying again
//! - Implementations keep no per-frame state outside the buffer, so one
//!   codec instance can serve the read loop and concurrent response writers

use bytes::BytesMut;
use thiserror::Error;

use crate::proto::message::{Request, Response};

/// Errors produced by a codec implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The inbound bytes do not form a valid frame. The connection should
    /// be torn down; resynchronizing inside a stream is not attempted.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A frame exceeded the implementation's size limit.
    #[error("frame of {got} bytes exceeds limit of {limit}")]
    Oversized { got: usize, limit: usize },
}

/// Wire codec for directory protocol messages.
///
/// Implementations live outside this crate; the connection core consumes
/// decoded [`Request`]s and produces [`Response`]s without knowing the
/// byte-level grammar.
pub trait Codec: Send + Sync {
    /// Try to decode one request from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` does not yet hold a complete frame;
    /// consumed bytes are removed from `src` on success.
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Request>, CodecError>;

    /// Encode one response onto the end of `dst`.
    fn encode(&self, response: &Response, dst: &mut BytesMut) -> Result<(), CodecError>;
}
