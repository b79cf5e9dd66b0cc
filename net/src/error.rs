//! Error types for the networking layer.

use {std::time::Duration, thiserror::Error};

/// Errors surfaced by transport, pool, and forwarding.
///
/// Only the first two variants are routing verdicts; everything else is
/// plumbing.  All of them are non-fatal: the caller may retry, and the
/// forward manager counts each as a dropped packet.
#[derive(Error, Debug)]
pub enum NetError {
    /// The routing table has no entry for the destination.
    #[error("no route to {0}")]
    NoRoute(String),

    /// A route exists but the next hop has no node record.
    #[error("next hop {0} not found in topology")]
    NextHopUnknown(String),

    /// Connection or I/O failure talking to a specific peer.
    #[error("transport error to {peer}: {detail}")]
    Transport {
        /// Peer node id (or address when no id is known).
        peer: String,
        /// Underlying failure description.
        detail: String,
    },

    /// The peer answered, but refused the packet.
    #[error("peer {peer} rejected: {message}")]
    PeerRejected {
        /// Peer node id.
        peer: String,
        /// The peer's own message, preserved verbatim.
        message: String,
    },

    /// An encoded frame exceeds the configured limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The RPC did not complete within its deadline.
    #[error("rpc timed out after {0:?}")]
    Timeout(Duration),

    /// A response frame of the wrong variant for the request sent.
    #[error("unexpected response: expected {expected}, got {got}")]
    UnexpectedResponse {
        /// Variant the caller was waiting for.
        expected: &'static str,
        /// Variant actually received.
        got: &'static str,
    },

    /// Failed to encode or decode a frame.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Raw I/O error not yet attributed to a peer.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
