//! Transport contract required by the proxy layer.
//!
//! The transport owns the per-tier connections. The proxy layer only needs
//! to address a tier, ask whether it is reachable, receive messages for its
//! topic and learn when a tier comes back online.

mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

use corelib::Tier;
use serde_json::Value;
use std::sync::Arc;

/// Receives `(sender tier, message)` for one topic.
pub type MessageHandler = Arc<dyn Fn(Tier, Value) + Send + Sync>;

/// Notified with the tier that just became connected.
pub type ConnectedHandler = Arc<dyn Fn(Tier) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("tier {0} is not connected")]
    NotConnected(Tier),
    #[error("no endpoint for tier {0}")]
    UnknownTier(Tier),
    #[error("transport closed")]
    Closed,
}

/// Per-tier message delivery shared by every user of the connection.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the proxy manager sends from
/// whichever task completes a channel operation, and handlers may be invoked
/// from the transport's own tasks.
pub trait Transport: Send + Sync + 'static {
    /// Queue `message` for delivery to `tier`.
    ///
    /// # Arguments
    /// * `tier` - Destination tier
    /// * `message` - JSON object whose `target` field names the topic it is
    ///   dispatched to on the remote side
    ///
    /// # Returns
    /// [`TransportError::NotConnected`] if the link to `tier` is down. Nothing
    /// is buffered in that case; callers that need delivery retry on
    /// reconnect.
    fn send_to(&self, tier: Tier, message: Value) -> Result<(), TransportError>;

    fn is_connected(&self, tier: Tier) -> bool;

    /// Route inbound messages whose `target` equals `topic` to `handler`,
    /// replacing any earlier handler for that topic.
    fn register_handler(&self, topic: &str, handler: MessageHandler);

    /// Subscribe to "tier connected" notifications.
    fn on_connected(&self, handler: ConnectedHandler);
}
