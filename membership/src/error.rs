//! Error types for the membership layer.

use thiserror::Error;

/// Errors that can occur in the gossip membership layer.
#[derive(Error, Debug)]
pub enum MembershipError {
    /// The configured bind address could not be parsed or bound.
    #[error("invalid bind address {addr}: {source}")]
    Bind {
        /// The offending address string.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// No seed answered the join handshake in time.
    #[error("failed to join cluster: no seed of {0:?} answered")]
    JoinFailed(Vec<String>),

    /// A user event exceeded the configured payload limit.
    #[error("user event '{name}' too large: {size} bytes (max {max})")]
    UserEventTooLarge {
        /// Event name.
        name: String,
        /// Actual payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Failed to encode or decode a gossip datagram.
    #[error("gossip codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Datagram-level I/O error.
    #[error("gossip transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The membership instance has been shut down.
    #[error("membership is shut down")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MembershipError>;
