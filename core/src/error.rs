//! Error types for node bootstrap and the public API.

use {spanmesh_membership::MembershipError, spanmesh_net::NetError, thiserror::Error};

/// Errors surfaced by the node core.
///
/// The first three variants are fatal at startup; everything routed
/// through [`Net`](CoreError::Net) is a non-fatal per-packet verdict
/// the caller may retry.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid or incomplete configuration (missing id, bad address).
    #[error("configuration error: {0}")]
    Config(String),

    /// A config file could not be read.
    #[error("failed to read {path}: {source}")]
    ConfigIo {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config file could not be parsed.
    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        /// Path of the offending file.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// No gossip seed could be reached at startup.
    #[error("cluster join failed: {0}")]
    Join(#[source] MembershipError),

    /// Membership-layer failure outside the join path.
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Transport, routing, or peer failure on the data path.
    #[error(transparent)]
    Net(#[from] NetError),

    /// Failed to encode a gossip event payload.
    #[error("event encode error: {0}")]
    EventEncode(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
