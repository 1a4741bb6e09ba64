//! Error kinds for the download engine.
//!
//! Wire-level violations get their own enum so callers can tell a truncated
//! frame from a wrong message ID without string matching. Everything a peer
//! can do wrong is recoverable at the worker level; only usage errors and
//! running out of peers terminate the download itself.

use thiserror::Error;

/// Errors produced by the download engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect failure, read/write failure, or deadline expiry.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The handshake reply carried a different info hash than ours.
    #[error("info hash mismatch in handshake reply")]
    HandshakeMismatch,

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A fully assembled piece did not match its expected SHA-1 digest.
    #[error("piece {index} failed integrity check")]
    Integrity { index: u32 },

    /// The caller handed the engine inconsistent parameters.
    #[error("invalid download parameters: {0}")]
    Usage(String),

    /// Every worker exited while pieces were still outstanding.
    #[error("all peers exhausted with {remaining} pieces left")]
    InsufficientPeers { remaining: usize },
}

/// Wire protocol violations by a remote peer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Handshake protocol string length byte was zero.
    #[error("handshake protocol string is empty")]
    EmptyProtocolString,

    /// The stream ended before a complete frame was read.
    #[error("truncated frame: expected {expected} bytes")]
    TruncatedFrame { expected: usize },

    /// A frame claimed a length beyond any legal message.
    #[error("oversized frame: {length} bytes")]
    OversizedFrame { length: usize },

    /// A specific message ID was required but another arrived.
    #[error("expected message id {expected}, got {actual}")]
    UnexpectedId { expected: u8, actual: u8 },

    /// A keep-alive arrived where a real message was required.
    #[error("expected message id {expected}, got keep-alive")]
    UnexpectedKeepAlive { expected: u8 },

    /// Payload shorter than the minimum for its message ID.
    #[error("payload too short for message id {id}: {len} bytes")]
    ShortPayload { id: u8, len: usize },

    /// A Piece message carried a different index than the one in flight.
    #[error("piece index {actual} does not match requested {expected}")]
    WrongPieceIndex { expected: u32, actual: u32 },

    /// A Piece block did not fit inside the piece buffer.
    #[error("block [{begin}, {begin}+{block_len}) out of range for {piece_len}-byte piece")]
    BlockOutOfRange {
        begin: u32,
        block_len: u32,
        piece_len: u32,
    },
}
