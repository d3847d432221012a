//! The channel contract.
//!
//! A channel is a reference-counted, open/close-able endpoint that is a
//! source of events, a sink for events, or both. Concrete channels implement
//! [`Channel`] and embed a [`ChannelBase`]; callers drive them through
//! [`ChannelExt`], which owns the open/close bookkeeping.

mod base;
mod lifecycle;
mod listeners;

pub use base::ChannelBase;
pub use lifecycle::{ChannelExt, Completion};
pub use listeners::{EventListener, EventListeners, ListenerId};

use crate::error::{Error, Result};
use crate::platform::Capability;
use crate::tier::Tier;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// A source and/or sink of event data.
///
/// Implementations override the hooks and role flags; the provided methods
/// implement the shared behavior on top of [`ChannelBase`].
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Shared state embedded by every concrete channel.
    fn base(&self) -> &ChannelBase;

    fn unique_id(&self) -> &str {
        self.base().unique_id()
    }

    fn is_source(&self) -> bool {
        false
    }

    fn is_sink(&self) -> bool {
        false
    }

    /// Capabilities the host platform must offer. None by default.
    fn required_capabilities(&self) -> &[Capability] {
        &[]
    }

    /// Tiers this channel may be constructed on. All by default.
    fn allowed_tiers(&self) -> &[Tier] {
        &Tier::ALL
    }

    /// Uncached support check. Override for channels whose support does not
    /// reduce to a capability set.
    fn check_supported(&self) -> bool {
        let platform = self.base().platform();
        self.required_capabilities()
            .iter()
            .all(|capability| platform.has_capability(*capability))
    }

    /// Cached result of [`Channel::check_supported`]; computed on first read
    /// and never invalidated.
    fn is_supported(&self) -> bool {
        self.base().supported(|| self.check_supported())
    }

    /// Acquire whatever resources the channel needs. Runs once per first open.
    async fn do_open(&self) -> Result<()> {
        Ok(())
    }

    /// Release what `do_open` acquired. Runs once per last close.
    async fn do_close(&self) -> Result<()> {
        Ok(())
    }

    /// Notify every listener of `payload`, synchronously.
    fn emit_event(&self, payload: Value) -> Result<()> {
        if !self.is_source() {
            return Err(Error::NotASource);
        }
        self.base().listeners().emit(&payload);
        Ok(())
    }

    /// Write `payload` into the channel. Sinks must override this.
    fn send_event(&self, _payload: Value) -> Result<()> {
        if self.is_sink() {
            Err(Error::SinkUnimplemented)
        } else {
            Err(Error::NotASink)
        }
    }

    fn subscribe(&self, listener: EventListener) -> ListenerId {
        self.base().listeners().add(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.base().listeners().remove(id)
    }
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("unique_id", &self.unique_id())
            .field("is_source", &self.is_source())
            .field("is_sink", &self.is_sink())
            .field("use_count", &self.base().use_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Platform, PlatformKind, StaticPlatform};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct RoleChannel {
        base: ChannelBase,
        source: bool,
        sink: bool,
        capabilities: Vec<Capability>,
    }

    impl RoleChannel {
        fn new(source: bool, sink: bool, platform: StaticPlatform) -> Self {
            Self {
                base: ChannelBase::new("role", Arc::new(platform)),
                source,
                sink,
                capabilities: vec![Capability::Bluetooth],
            }
        }
    }

    impl Channel for RoleChannel {
        fn base(&self) -> &ChannelBase {
            &self.base
        }

        fn is_source(&self) -> bool {
            self.source
        }

        fn is_sink(&self) -> bool {
            self.sink
        }

        fn required_capabilities(&self) -> &[Capability] {
            &self.capabilities
        }
    }

    fn server() -> StaticPlatform {
        StaticPlatform::new(PlatformKind::Server)
    }

    #[test]
    fn test_emit_event_requires_source() {
        let channel = RoleChannel::new(false, true, server());
        assert_eq!(channel.emit_event(json!(1)), Err(Error::NotASource));
    }

    #[test]
    fn test_send_event_distinguishes_usage_from_gap() {
        let source_only = RoleChannel::new(true, false, server());
        assert_eq!(source_only.send_event(json!(1)), Err(Error::NotASink));

        let unimplemented_sink = RoleChannel::new(false, true, server());
        assert_eq!(
            unimplemented_sink.send_event(json!(1)),
            Err(Error::SinkUnimplemented)
        );
    }

    #[test]
    fn test_emit_reaches_every_listener() {
        let channel = RoleChannel::new(true, false, server());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        let id = channel.subscribe(Arc::new(move |v: &Value| first.lock().push(("a", v.clone()))));
        let second = Arc::clone(&seen);
        channel.subscribe(Arc::new(move |v: &Value| second.lock().push(("b", v.clone()))));

        channel.emit_event(json!(7)).unwrap();
        assert_eq!(seen.lock().len(), 2);

        assert!(channel.unsubscribe(id));
        channel.emit_event(json!(8)).unwrap();
        assert_eq!(seen.lock().last(), Some(&("b", json!(8))));
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_defaults() {
        let channel = RoleChannel::new(false, false, server());
        assert_eq!(channel.allowed_tiers(), &Tier::ALL);
        assert_eq!(channel.base().use_count(), 0);
    }

    /// Platform that grants every capability until revoked, counting queries.
    struct RevocablePlatform {
        granted: AtomicBool,
        queries: AtomicUsize,
    }

    impl Platform for RevocablePlatform {
        fn kind(&self) -> PlatformKind {
            PlatformKind::Android
        }

        fn has_capability(&self, _capability: Capability) -> bool {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.granted.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_support_is_cached() {
        let platform = Arc::new(RevocablePlatform {
            granted: AtomicBool::new(true),
            queries: AtomicUsize::new(0),
        });
        let channel = RoleChannel {
            base: ChannelBase::new("role", platform.clone()),
            source: true,
            sink: false,
            capabilities: vec![Capability::Bluetooth],
        };

        assert!(channel.is_supported());
        assert_eq!(platform.queries.load(Ordering::SeqCst), 1);

        platform.granted.store(false, Ordering::SeqCst);
        assert!(!channel.check_supported(), "live check sees the revocation");
        assert!(channel.is_supported(), "cached bit is never re-evaluated");
        assert_eq!(platform.queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsupported_without_capability() {
        let unsupported = RoleChannel::new(true, false, server());
        assert!(!unsupported.is_supported());
        assert!(!unsupported.is_supported());

        let supported = RoleChannel::new(
            true,
            false,
            StaticPlatform::with_capabilities(PlatformKind::Android, [Capability::Bluetooth]),
        );
        assert!(supported.is_supported());
    }
}
