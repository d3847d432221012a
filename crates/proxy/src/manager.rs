//! The proxy protocol engine.
//!
//! # Naming
//!
//! The *proxy* is the side that requested a channel; the *stub* is the side
//! hosting the real implementation and forwarding its data.
//!
//! # Registries
//!
//! All three registries are keyed by [`FullId`]:
//!
//! - `proxies`: proxies created on this tier, keyed by (channel, hosting tier).
//!   Entries survive reconnects.
//! - `requests`: outstanding channel requests, keyed like `proxies`. An entry
//!   stays until the proxy is released so that a reconnect can replay it.
//! - `stubs`: stubs hosted for remote requesters, keyed by (channel,
//!   requesting tier). A slot is pending while the real channel opens.
//!
//! Releases the transport could not deliver are kept per tier in
//! `unsent_releases` and go out first when that tier reconnects, ahead of the
//! request replay.
//!
//! Inbound messages that reference a missing entry are logged and dropped;
//! the sender may be a stale or racing peer.

use crate::codec::{self, MarshaledArg};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::protocol::{self, ProxyMessage, RESULT_OK};
use crate::proxy_channel::ProxyChannel;
use crate::stub::ChannelStub;
use crate::transport::Transport;
use corelib::{Channel, ChannelArg, ChannelFactory, DeviceRegistry, FullId, Platform, Tier};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Lookup flag passed to the channel factory for requests from other tiers.
const REMOTE_LOOKUP: bool = false;

type Outcome = Result<(), ProxyError>;

/// An outstanding "give me channel X on tier T".
struct PendingRequest {
    target_tier: Tier,
    channel_id: String,
    args: Vec<MarshaledArg>,
    completion: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl PendingRequest {
    fn message(&self) -> ProxyMessage {
        ProxyMessage::RequestChannel {
            channel_id: self.channel_id.clone(),
            args: self.args.clone(),
        }
    }

    /// Settle the request. Returns false if it had already settled.
    fn settle(&self, outcome: Outcome) -> bool {
        match self.completion.lock().take() {
            Some(tx) => {
                // The receiver may be gone; the outcome is then unobserved.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Completion of [`ProxyManager::request_proxy_channel`].
///
/// Resolves once with the remote tier's answer. Fails with
/// [`ProxyError::Released`] if the request is released or the manager shuts
/// down first.
pub struct RequestCompletion {
    full_id: FullId,
    rx: oneshot::Receiver<Outcome>,
}

impl Future for RequestCompletion {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(ProxyError::Released(this.full_id.to_string())))
        })
    }
}

enum SlotState {
    /// Real channel still opening; sink writes queue up in order.
    Pending { backlog: Vec<Value> },
    Ready(Arc<ChannelStub>),
    /// Released while pending; the stub is closed as soon as it opens.
    Released,
    Failed,
}

/// Registry entry for a hosted stub.
struct StubSlot {
    state: Mutex<SlotState>,
}

impl StubSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending { backlog: Vec::new() }),
        }
    }

    /// Mark the stub open and flush queued sink writes into it. Hands the
    /// stub back if the slot was released meanwhile.
    fn ready(&self, stub: Arc<ChannelStub>) -> Option<Arc<ChannelStub>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Failed) {
            SlotState::Pending { backlog } => {
                for data in backlog {
                    forward_sink_data(&stub, data);
                }
                *state = SlotState::Ready(stub);
                None
            }
            SlotState::Released => {
                *state = SlotState::Released;
                Some(stub)
            }
            SlotState::Ready(_) | SlotState::Failed => Some(stub),
        }
    }

    fn fail(&self) {
        *self.state.lock() = SlotState::Failed;
    }

    /// Returns the stub to close, if it is already open.
    fn release(&self) -> Option<Arc<ChannelStub>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Released) {
            SlotState::Ready(stub) => Some(stub),
            SlotState::Failed => {
                *state = SlotState::Failed;
                None
            }
            SlotState::Pending { .. } | SlotState::Released => None,
        }
    }

    fn deliver(&self, channel_id: &str, data: Value) {
        let mut state = self.state.lock();
        match &mut *state {
            SlotState::Pending { backlog } => backlog.push(data),
            SlotState::Ready(stub) => forward_sink_data(stub, data),
            SlotState::Released | SlotState::Failed => {
                tracing::warn!(channel_id, "dropping sink data for a closed stub");
            }
        }
    }
}

fn forward_sink_data(stub: &ChannelStub, data: Value) {
    if let Err(e) = stub.send_event(data) {
        tracing::warn!(
            channel_id = stub.channel().unique_id(),
            requester = %stub.requester(),
            error = %e,
            "sink write failed"
        );
    }
}

fn dropped(op: &'static str) {
    metrics::counter!("proxy.messages.dropped", "op" => op).increment(1);
}

/// Multiplexes every proxy and stub of this tier over the transport.
pub struct ProxyManager {
    me: Weak<ProxyManager>,
    config: ProxyConfig,
    transport: Arc<dyn Transport>,
    channels: Arc<dyn ChannelFactory>,
    devices: Arc<dyn DeviceRegistry>,
    platform: Arc<dyn Platform>,
    proxies: DashMap<FullId, Arc<ProxyChannel>>,
    requests: DashMap<FullId, PendingRequest>,
    stubs: DashMap<FullId, Arc<StubSlot>>,
    unsent_releases: DashMap<Tier, Vec<String>>,
}

impl ProxyManager {
    /// Create a manager and register it with `transport` for the configured
    /// topic and for reconnect notifications.
    pub fn new(
        config: ProxyConfig,
        transport: Arc<dyn Transport>,
        channels: Arc<dyn ChannelFactory>,
        devices: Arc<dyn DeviceRegistry>,
        platform: Arc<dyn Platform>,
    ) -> Arc<Self> {
        let manager = Arc::new_cyclic(|me| ProxyManager {
            me: me.clone(),
            config,
            transport,
            channels,
            devices,
            platform,
            proxies: DashMap::new(),
            requests: DashMap::new(),
            stubs: DashMap::new(),
            unsent_releases: DashMap::new(),
        });

        let weak = Arc::downgrade(&manager);
        manager.transport.register_handler(
            &manager.config.topic,
            Arc::new(move |from: Tier, message: Value| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_message(from, message);
                }
            }),
        );
        let weak = Arc::downgrade(&manager);
        manager.transport.on_connected(Arc::new(move |tier: Tier| {
            if let Some(manager) = weak.upgrade() {
                manager.on_connected(tier);
            }
        }));

        manager
    }

    pub fn local_tier(&self) -> Tier {
        self.config.local_tier
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Proxy for `for_channel` hosted on `target_tier`, created on first use.
    ///
    /// # Arguments
    /// * `for_channel` - Local description of the channel; supplies the id
    ///   and the role flags
    /// * `target_tier` - Tier hosting the real channel
    /// * `args` - Lookup arguments replayed on every open of the proxy
    ///
    /// # Returns
    /// The same proxy for every call with the same id and tier. Arguments of
    /// later calls are ignored.
    pub fn get_proxy_channel(
        &self,
        for_channel: &dyn Channel,
        target_tier: Tier,
        args: Vec<ChannelArg>,
    ) -> Arc<ProxyChannel> {
        let channel_id = for_channel.unique_id();
        let entry = self
            .proxies
            .entry(FullId::new(channel_id, target_tier))
            .or_insert_with(|| {
                tracing::info!(channel_id, %target_tier, "created proxy channel");
                Arc::new(ProxyChannel::new(
                    self.me.clone(),
                    Arc::clone(&self.platform),
                    target_tier,
                    channel_id,
                    args,
                    for_channel.is_source(),
                    for_channel.is_sink(),
                ))
            });
        Arc::clone(entry.value())
    }

    /// Register a request for `proxy`'s remote channel and send it now if the
    /// hosting tier is connected, or on its next reconnect otherwise.
    ///
    /// # Returns
    /// A completion settled by the hosting tier's reply. Fails synchronously
    /// with a marshal error if `cached_args` holds a function or object.
    pub fn request_proxy_channel(
        &self,
        proxy: &ProxyChannel,
        cached_args: &[ChannelArg],
    ) -> Result<RequestCompletion, ProxyError> {
        let full_id = proxy.full_id();
        let args = codec::marshal_args(cached_args)?;
        let (tx, rx) = oneshot::channel();
        let request = PendingRequest {
            target_tier: proxy.target_tier(),
            channel_id: proxy.unique_id().to_string(),
            args,
            completion: Mutex::new(Some(tx)),
        };
        let message = request.message();
        let target_tier = request.target_tier;

        if self.requests.insert(full_id.clone(), request).is_some() {
            tracing::debug!(%full_id, "superseded an earlier channel request");
        }

        if self.transport.is_connected(target_tier) {
            tracing::info!(%full_id, %target_tier, "tier is connected, sending proxy channel request now");
            if let Err(e) = self.send(target_tier, &message) {
                tracing::warn!(%full_id, error = %e, "channel request not sent, waiting for reconnect");
            }
        } else {
            tracing::info!(%full_id, %target_tier, "delaying proxy channel request until tier is connected");
        }

        Ok(RequestCompletion { full_id, rx })
    }

    /// Forget the request for `proxy` and tell the hosting tier to release
    /// its stub.
    ///
    /// # Arguments
    /// * `proxy` - A proxy previously passed to [`request_proxy_channel`](Self::request_proxy_channel)
    ///
    /// # Returns
    /// `Ok` once the release is sent or, if the hosting tier is unreachable,
    /// queued until it reconnects. Releasing an unrequested proxy is logged
    /// and ignored. Only encoding failures are returned as errors.
    pub fn release_proxy_channel(&self, proxy: &ProxyChannel) -> Result<(), ProxyError> {
        let full_id = proxy.full_id();
        if self.requests.remove(&full_id).is_none() {
            tracing::error!(%full_id, "cannot release a channel that was not requested");
            return Ok(());
        }
        self.send_release(proxy.target_tier(), proxy.unique_id())
    }

    fn send_release(&self, target_tier: Tier, channel_id: &str) -> Result<(), ProxyError> {
        let message = ProxyMessage::ReleaseChannel {
            channel_id: channel_id.to_string(),
        };
        match self.send(target_tier, &message) {
            Err(ProxyError::Transport(e)) => {
                tracing::info!(channel_id, %target_tier, error = %e, "release not delivered, resending on reconnect");
                let mut queued = self.unsent_releases.entry(target_tier).or_default();
                if !queued.iter().any(|id| id == channel_id) {
                    queued.push(channel_id.to_string());
                }
                Ok(())
            }
            other => other,
        }
    }

    /// Forward an event produced by a hosted channel to its requester.
    pub fn send_source_event(&self, target_tier: Tier, channel_id: &str, data: Value) -> Result<(), ProxyError> {
        self.send(
            target_tier,
            &ProxyMessage::ChannelSourceData {
                channel_id: channel_id.to_string(),
                data,
            },
        )
    }

    /// Forward a local sink write to the tier hosting the real channel.
    pub fn send_sink_event(&self, target_tier: Tier, channel_id: &str, data: Value) -> Result<(), ProxyError> {
        self.send(
            target_tier,
            &ProxyMessage::ChannelSinkData {
                channel_id: channel_id.to_string(),
                data,
            },
        )
    }

    fn send(&self, target_tier: Tier, message: &ProxyMessage) -> Result<(), ProxyError> {
        let encoded = protocol::encode(&self.config.topic, message)?;
        self.transport.send_to(target_tier, encoded)?;
        metrics::counter!("proxy.messages.sent", "op" => message.op()).increment(1);
        Ok(())
    }

    fn reply(&self, target_tier: Tier, channel_id: &str, result: &str) {
        let message = ProxyMessage::ChannelRequestComplete {
            channel_id: channel_id.to_string(),
            result: result.to_string(),
        };
        if let Err(e) = self.send(target_tier, &message) {
            tracing::warn!(channel_id, %target_tier, error = %e, "failed to send channel reply");
        }
    }

    /// Resend undelivered releases, then every pending request targeting `tier`.
    fn on_connected(&self, tier: Tier) {
        tracing::info!(%tier, local_tier = %self.config.local_tier, "tier is back online, flushing proxy channel requests");
        let releases = self
            .unsent_releases
            .remove(&tier)
            .map(|(_, channel_ids)| channel_ids)
            .unwrap_or_default();
        for channel_id in releases {
            if let Err(e) = self.send_release(tier, &channel_id) {
                tracing::warn!(%channel_id, %tier, error = %e, "channel release replay failed");
            }
        }

        let replay: Vec<ProxyMessage> = self
            .requests
            .iter()
            .filter(|request| request.target_tier == tier)
            .map(|request| request.message())
            .collect();
        for message in replay {
            if let Err(e) = self.send(tier, &message) {
                tracing::warn!(channel_id = message.channel_id(), %tier, error = %e, "channel request replay failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Dispatch one message received on the proxy topic from `from`.
    pub fn handle_message(&self, from: Tier, message: Value) {
        let message = match protocol::decode(message) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%from, error = %e, "invalid proxy message");
                dropped("invalid");
                return;
            }
        };
        tracing::trace!(%from, op = message.op(), channel_id = message.channel_id(), "proxy message");

        match message {
            ProxyMessage::RequestChannel { channel_id, args } => self.on_request_channel(from, channel_id, args),
            ProxyMessage::ReleaseChannel { channel_id } => self.on_release_channel(from, &channel_id),
            ProxyMessage::ChannelRequestComplete { channel_id, result } => {
                self.on_channel_ready(from, &channel_id, result)
            }
            ProxyMessage::ChannelSourceData { channel_id, data } => self.on_source_data(from, &channel_id, data),
            ProxyMessage::ChannelSinkData { channel_id, data } => self.on_sink_data(from, &channel_id, data),
        }
    }

    fn on_request_channel(&self, from: Tier, channel_id: String, args: Vec<MarshaledArg>) {
        let full_id = FullId::new(&channel_id, from);

        let slot = match self.stubs.entry(full_id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let slot = Arc::new(StubSlot::new());
                vacant.insert(Arc::clone(&slot));
                Some(slot)
            }
        };
        let Some(slot) = slot else {
            // Flaky links make peers re-request channels they already have.
            tracing::info!(%from, %channel_id, "duplicate channel request");
            self.reply(from, &channel_id, RESULT_OK);
            return;
        };
        let Some(manager) = self.me.upgrade() else {
            return;
        };

        tracing::info!(%from, %channel_id, "new remote channel request");
        tokio::spawn(async move {
            manager.build_stub(from, channel_id, full_id, args, slot).await;
        });
    }

    async fn build_stub(&self, from: Tier, channel_id: String, full_id: FullId, args: Vec<MarshaledArg>, slot: Arc<StubSlot>) {
        let built = async {
            let args = codec::unmarshal_args(args, self.devices.as_ref())?;
            let channel = self.channels.resolve_channel(REMOTE_LOOKUP, args).await?;
            let stub = Arc::new(ChannelStub::new(self.me.clone(), from, channel));
            stub.open().await?;
            Ok::<_, ProxyError>(stub)
        }
        .await;

        match built {
            Ok(stub) => {
                if let Some(stub) = slot.ready(stub) {
                    tracing::debug!(%full_id, "stub released while opening, closing it");
                    if let Err(e) = stub.close().await {
                        tracing::warn!(%full_id, error = %e, "failed to close released stub");
                    }
                }
                self.reply(from, &channel_id, RESULT_OK);
            }
            Err(e) => {
                tracing::warn!(%full_id, error = %e, "remote channel request failed");
                slot.fail();
                self.stubs.remove_if(&full_id, |_, current| Arc::ptr_eq(current, &slot));
                self.reply(from, &channel_id, &e.to_string());
            }
        }
    }

    fn on_release_channel(&self, from: Tier, channel_id: &str) {
        let full_id = FullId::new(channel_id, from);
        let Some((_, slot)) = self.stubs.remove(&full_id) else {
            tracing::error!(%full_id, "channel was not requested");
            dropped("release-channel");
            return;
        };

        if let Some(stub) = slot.release() {
            tokio::spawn(async move {
                if let Err(e) = stub.close().await {
                    tracing::warn!(%full_id, error = %e, "failed to close released stub");
                }
            });
        }
    }

    fn on_channel_ready(&self, from: Tier, channel_id: &str, result: String) {
        let full_id = FullId::new(channel_id, from);
        let Some(request) = self.requests.get(&full_id) else {
            tracing::error!(%full_id, "invalid channel reply");
            dropped("channel-request-complete");
            return;
        };

        let outcome = if result == RESULT_OK {
            Ok(())
        } else {
            Err(ProxyError::Remote(result))
        };
        if !request.settle(outcome) {
            tracing::debug!(%full_id, "channel request already settled");
        }
    }

    fn on_source_data(&self, from: Tier, channel_id: &str, data: Value) {
        let full_id = FullId::new(channel_id, from);
        let Some(proxy) = self.proxies.get(&full_id).map(|entry| Arc::clone(entry.value())) else {
            tracing::error!(%full_id, "invalid data message");
            dropped("channel-source-data");
            return;
        };
        // Proxies are keyed by hosting tier, so the sender is always the target.
        debug_assert_eq!(proxy.target_tier(), from, "proxy {} keyed under the wrong tier", full_id);

        if let Err(e) = proxy.emit_event(data) {
            tracing::warn!(%full_id, error = %e, "proxy could not emit source data");
        }
    }

    fn on_sink_data(&self, from: Tier, channel_id: &str, data: Value) {
        let full_id = FullId::new(channel_id, from);
        let Some(slot) = self.stubs.get(&full_id).map(|entry| Arc::clone(entry.value())) else {
            tracing::error!(%full_id, "invalid data message");
            dropped("channel-sink-data");
            return;
        };
        slot.deliver(channel_id, data);
    }

    // ------------------------------------------------------------------
    // Teardown & introspection
    // ------------------------------------------------------------------

    /// Drop every pending request and close every hosted stub.
    pub async fn shutdown(&self) {
        let released = self.requests.len();
        self.requests.clear();
        self.unsent_releases.clear();

        let slots: Vec<Arc<StubSlot>> = self.stubs.iter().map(|entry| Arc::clone(entry.value())).collect();
        self.stubs.clear();
        tracing::info!(requests = released, stubs = slots.len(), "proxy manager shutting down");

        for slot in slots {
            if let Some(stub) = slot.release() {
                if let Err(e) = stub.close().await {
                    tracing::warn!(channel_id = stub.channel().unique_id(), error = %e, "failed to close stub");
                }
            }
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    pub fn pending_request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn has_pending_request(&self, channel_id: &str, target_tier: Tier) -> bool {
        self.requests.contains_key(&FullId::new(channel_id, target_tier))
    }

    /// Releases waiting for their hosting tier to reconnect.
    pub fn unsent_release_count(&self) -> usize {
        self.unsent_releases.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.len()
    }

    /// True if a stub (pending or open) exists for `requester`.
    pub fn has_stub(&self, channel_id: &str, requester: Tier) -> bool {
        self.stubs.contains_key(&FullId::new(channel_id, requester))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_fails_when_request_is_dropped() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let completion = RequestCompletion {
            full_id: FullId::new("test", Tier::Server),
            rx,
        };
        drop(tx);
        let err = completion.await.unwrap_err();
        assert_eq!(err.to_string(), "request for test-server was released before it completed");
    }

    #[test]
    fn test_request_settles_once() {
        let (tx, _rx) = oneshot::channel();
        let request = PendingRequest {
            target_tier: Tier::Cloud,
            channel_id: "test".to_string(),
            args: Vec::new(),
            completion: Mutex::new(Some(tx)),
        };
        assert!(request.settle(Ok(())));
        assert!(!request.settle(Err(ProxyError::Remote("late".to_string()))));
    }

    #[test]
    fn test_slot_drops_sink_data_after_release() {
        let slot = StubSlot::new();
        assert!(slot.release().is_none());
        slot.deliver("test", Value::Null);
        assert!(matches!(&*slot.state.lock(), SlotState::Released));
    }
}
