//! Shared fixtures for the proxy integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use corelib::{
    Channel, ChannelArg, ChannelBase, ChannelFactory, DeviceDatabase, Error, PlatformKind, Result,
    StaticPlatform, Tier,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use proxy::transport::{ConnectedHandler, MessageHandler};
use proxy::{ProxyConfig, ProxyManager, Transport, TransportError};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Recording transport
// ============================================================================

/// Transport double: records every send, lets the test flip connectivity
/// and inject inbound messages.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Tier, Value)>>,
    connected: Mutex<HashSet<Tier>>,
    handlers: Mutex<HashMap<String, MessageHandler>>,
    connected_handlers: Mutex<Vec<ConnectedHandler>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, tier: Tier, up: bool) {
        if up {
            self.connected.lock().insert(tier);
            let handlers = self.connected_handlers.lock().clone();
            for handler in handlers {
                handler(tier);
            }
        } else {
            self.connected.lock().remove(&tier);
        }
    }

    /// Hand `message` to the proxy topic handler as if sent by `from`.
    pub fn deliver(&self, from: Tier, message: Value) {
        let handler = self.handlers.lock().get("proxy").cloned().expect("proxy handler registered");
        handler(from, message);
    }

    pub fn sent(&self) -> Vec<(Tier, Value)> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<(Tier, Value)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// `(tier, op, channelId)` of every recorded message.
    pub fn sent_ops(&self) -> Vec<(Tier, String, String)> {
        self.sent()
            .into_iter()
            .map(|(tier, message)| {
                (
                    tier,
                    message["op"].as_str().unwrap_or_default().to_string(),
                    message["channelId"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    pub fn count_op(&self, op: &str) -> usize {
        self.sent_ops().iter().filter(|(_, sent_op, _)| sent_op == op).count()
    }
}

impl Transport for RecordingTransport {
    fn send_to(&self, tier: Tier, message: Value) -> std::result::Result<(), TransportError> {
        self.sent.lock().push((tier, message));
        Ok(())
    }

    fn is_connected(&self, tier: Tier) -> bool {
        self.connected.lock().contains(&tier)
    }

    fn register_handler(&self, topic: &str, handler: MessageHandler) {
        self.handlers.lock().insert(topic.to_string(), handler);
    }

    fn on_connected(&self, handler: ConnectedHandler) {
        self.connected_handlers.lock().push(handler);
    }
}

// ============================================================================
// Probe channel & factory
// ============================================================================

/// Source + sink channel that records what happens to it.
pub struct ProbeChannel {
    base: ChannelBase,
    gate: Option<Arc<Notify>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub written: Mutex<Vec<Value>>,
}

impl ProbeChannel {
    pub fn new(id: &str, gate: Option<Arc<Notify>>) -> Arc<Self> {
        Arc::new(Self {
            base: ChannelBase::new(id, Arc::new(StaticPlatform::new(PlatformKind::Server))),
            gate,
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> Vec<Value> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl Channel for ProbeChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn is_source(&self) -> bool {
        true
    }

    fn is_sink(&self) -> bool {
        true
    }

    async fn do_open(&self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn do_close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn send_event(&self, payload: Value) -> Result<()> {
        self.written.lock().push(payload);
        Ok(())
    }
}

/// Factory resolving `[id]` to a shared [`ProbeChannel`] with that id.
/// Ids starting with `fail` are rejected; ids starting with `slow` open only
/// once their gate is notified.
#[derive(Default)]
pub struct ProbeFactory {
    pub channels: DashMap<String, Arc<ProbeChannel>>,
    pub gates: DashMap<String, Arc<Notify>>,
    pub resolved: AtomicUsize,
    pub lookup_flags: Mutex<Vec<bool>>,
}

impl ProbeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn channel(&self, id: &str) -> Option<Arc<ProbeChannel>> {
        self.channels.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn gate(&self, id: &str) -> Arc<Notify> {
        Arc::clone(self.gates.entry(id.to_string()).or_insert_with(|| Arc::new(Notify::new())).value())
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelFactory for ProbeFactory {
    async fn resolve_channel(&self, internal: bool, args: Vec<ChannelArg>) -> Result<Arc<dyn Channel>> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        self.lookup_flags.lock().push(internal);

        let id = args
            .first()
            .and_then(ChannelArg::as_str)
            .ok_or_else(|| Error::UnknownChannel("<missing id>".to_string()))?
            .to_string();
        if id.starts_with("fail") {
            return Err(Error::UnknownChannel(id));
        }
        let gate = id.starts_with("slow").then(|| self.gate(&id));
        let channel = Arc::clone(
            self.channels
                .entry(id.clone())
                .or_insert_with(|| ProbeChannel::new(&id, gate))
                .value(),
        );
        Ok(channel)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub transport: Arc<RecordingTransport>,
    pub factory: Arc<ProbeFactory>,
    pub devices: Arc<DeviceDatabase>,
    pub manager: Arc<ProxyManager>,
}

pub fn harness(local_tier: Tier) -> Harness {
    let transport = RecordingTransport::new();
    let factory = ProbeFactory::new();
    let devices = Arc::new(DeviceDatabase::new());
    let manager = ProxyManager::new(
        ProxyConfig::new(local_tier),
        transport.clone(),
        factory.clone(),
        devices.clone(),
        Arc::new(StaticPlatform::new(PlatformKind::Server)),
    );
    Harness {
        transport,
        factory,
        devices,
        manager,
    }
}

pub fn message(op: &str, channel_id: &str, extra: Value) -> Value {
    let mut message = json!({"target": "proxy", "op": op, "channelId": channel_id});
    if let (Some(fields), Value::Object(extra)) = (message.as_object_mut(), extra) {
        fields.extend(extra);
    }
    message
}

/// Poll `condition` until it holds, failing the test after a second.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
