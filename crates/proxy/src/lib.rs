//! Cross-tier channel proxying.
//!
//! This crate provides the protocol engine that makes a channel hosted on
//! one tier usable from another:
//! - The wire protocol and argument codec
//! - The transport contract (plus an in-memory transport)
//! - Proxy channels on the requesting side, stubs on the hosting side
//! - The manager that multiplexes both over the transport

pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod proxy_channel;
pub mod stub;
pub mod transport;

pub use codec::MarshaledArg;
pub use config::ProxyConfig;
pub use error::ProxyError;
pub use manager::{ProxyManager, RequestCompletion};
pub use protocol::ProxyMessage;
pub use proxy_channel::ProxyChannel;
pub use stub::ChannelStub;
pub use transport::{MemoryNetwork, MemoryTransport, Transport, TransportError};
