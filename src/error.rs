use thiserror::Error;

/// The errors reported by [`crate::Node`] and [`crate::LocationDescriptor`]
///
/// Per-packet and per-interface failures are never fatal to a running
/// node; they are logged and the affected packet or interface is skipped.
/// This type covers the synchronous failures: misconfiguration, lifecycle
/// misuse, and description content that cannot be produced.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// The configured multicast group is not a valid IPv4 address
    #[error("not a valid host address: {0}")]
    InvalidAddress(String),

    /// `start` was called on a node that is already running
    #[error("node already started")]
    AlreadyStarted,

    /// `start` was called on a node that has been closed
    #[error("node is closed")]
    Closed,

    /// A local LOCATION URL was requested but no HTTP port is configured
    #[error("cannot obtain location for {0} (http not configured)")]
    HttpNotConfigured(String),

    /// An alive, response or byebye was requested for an incomplete message
    #[error("message is missing uuid, urn or location")]
    NotPublishable,

    /// An underlying socket or file operation failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Fetching remote description content failed
    #[error("description fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}
