//! Error types for the core library.

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
///
/// `Clone` because an in-flight open or close completion is shared by every
/// caller awaiting it, and each of them receives its own copy of the outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// `emit_event` called on a channel that is not a source
    #[error("cannot emit event on a sink channel - did you mean send_event?")]
    NotASource,
    /// `send_event` called on a channel that is not a sink
    #[error("cannot send event on a source channel - did you mean emit_event?")]
    NotASink,
    /// The channel is a sink but never overrode `send_event`
    #[error("send_event is not implemented by this channel (channel bug)")]
    SinkUnimplemented,
    /// `close` called without a matching `open`
    #[error("channel {0} is not open")]
    NotOpen(String),
    /// Device id not present in the registry
    #[error("unknown device {0}")]
    UnknownDevice(String),
    /// Channel kind or id the factory cannot produce
    #[error("unknown channel {0}")]
    UnknownChannel(String),
    /// Channel exists but its capabilities are missing on this platform
    #[error("channel {0} is not supported on this platform")]
    Unsupported(String),
    /// A concrete open/close hook failed
    #[error("channel operation failed: {0}")]
    Failed(String),
}
