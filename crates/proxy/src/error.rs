//! Error types for the proxy layer.

use crate::transport::TransportError;

/// Errors produced while proxying channels between tiers.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A callback argument cannot cross the transport
    #[error("cannot marshal a function")]
    MarshalFunction,
    /// Argument of a type with no wire representation
    #[error("cannot marshal object {0}")]
    MarshalObject(String),
    /// Incoming argument of a class this side does not know
    #[error("cannot unmarshal object of class {0}")]
    UnmarshalObject(String),
    /// Failure reported by the remote tier, verbatim
    #[error("{0}")]
    Remote(String),
    /// The request was released (or the manager shut down) before a reply
    #[error("request for {0} was released before it completed")]
    Released(String),
    /// The manager owning a proxy or stub no longer exists
    #[error("proxy manager is gone")]
    ManagerGone,
    #[error(transparent)]
    Channel(#[from] corelib::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed proxy message: {0}")]
    Codec(#[from] serde_json::Error),
}
