//! In-process transport linking several tiers of one process.

use super::{ConnectedHandler, MessageHandler, Transport, TransportError};
use corelib::Tier;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Default)]
struct NetworkInner {
    endpoints: DashMap<Tier, Arc<MemoryTransport>>,
    links: Mutex<HashSet<(Tier, Tier)>>,
}

fn link(a: Tier, b: Tier) -> (Tier, Tier) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A set of in-memory endpoints, one per tier, with links that can be
/// brought up and down.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoint for `tier`, created on first use. Must be called within a
    /// Tokio runtime: each endpoint runs a task draining its inbox.
    pub fn endpoint(&self, tier: Tier) -> Arc<MemoryTransport> {
        let endpoint = self
            .inner
            .endpoints
            .entry(tier)
            .or_insert_with(|| MemoryTransport::spawn(tier, Arc::downgrade(&self.inner)));
        Arc::clone(endpoint.value())
    }

    /// Bring the link between `a` and `b` up and notify both sides.
    pub fn connect(&self, a: Tier, b: Tier) {
        if !self.inner.links.lock().insert(link(a, b)) {
            return;
        }
        tracing::debug!(%a, %b, "memory link up");
        self.endpoint(a).notify_connected(b);
        self.endpoint(b).notify_connected(a);
    }

    pub fn disconnect(&self, a: Tier, b: Tier) {
        if self.inner.links.lock().remove(&link(a, b)) {
            tracing::debug!(%a, %b, "memory link down");
        }
    }
}

/// One tier's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    tier: Tier,
    network: Weak<NetworkInner>,
    inbox: mpsc::UnboundedSender<(Tier, Value)>,
    handlers: Arc<DashMap<String, MessageHandler>>,
    connected_handlers: Mutex<Vec<ConnectedHandler>>,
}

impl MemoryTransport {
    fn spawn(tier: Tier, network: Weak<NetworkInner>) -> Arc<Self> {
        let (inbox, mut rx) = mpsc::unbounded_channel::<(Tier, Value)>();
        let handlers: Arc<DashMap<String, MessageHandler>> = Arc::new(DashMap::new());

        let dispatch = Arc::clone(&handlers);
        tokio::spawn(async move {
            while let Some((from, message)) = rx.recv().await {
                let topic = message.get("target").and_then(Value::as_str).map(str::to_string);
                let handler = topic
                    .as_deref()
                    .and_then(|topic| dispatch.get(topic).map(|h| Arc::clone(h.value())));
                match handler {
                    Some(handler) => handler(from, message),
                    None => tracing::warn!(%tier, %from, ?topic, "no handler for message topic"),
                }
            }
        });

        Arc::new(Self {
            tier,
            network,
            inbox,
            handlers,
            connected_handlers: Mutex::new(Vec::new()),
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn notify_connected(&self, peer: Tier) {
        let handlers: Vec<ConnectedHandler> = self.connected_handlers.lock().clone();
        for handler in handlers {
            handler(peer);
        }
    }
}

impl Transport for MemoryTransport {
    fn send_to(&self, tier: Tier, message: Value) -> Result<(), TransportError> {
        let network = self.network.upgrade().ok_or(TransportError::Closed)?;
        if !network.links.lock().contains(&link(self.tier, tier)) {
            return Err(TransportError::NotConnected(tier));
        }
        let peer = network
            .endpoints
            .get(&tier)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TransportError::UnknownTier(tier))?;
        peer.inbox
            .send((self.tier, message))
            .map_err(|_| TransportError::Closed)
    }

    fn is_connected(&self, tier: Tier) -> bool {
        self.network
            .upgrade()
            .map_or(false, |network| network.links.lock().contains(&link(self.tier, tier)))
    }

    fn register_handler(&self, topic: &str, handler: MessageHandler) {
        self.handlers.insert(topic.to_string(), handler);
    }

    fn on_connected(&self, handler: ConnectedHandler) {
        self.connected_handlers.lock().push(handler);
    }
}
