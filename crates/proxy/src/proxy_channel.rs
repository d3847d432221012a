//! Requesting-side stand-in for a channel hosted on another tier.

use crate::manager::ProxyManager;
use async_trait::async_trait;
use corelib::{Channel, ChannelArg, ChannelBase, Error, FullId, Platform, Result, Tier};
use serde_json::Value;
use std::sync::{Arc, Weak};

/// A local [`Channel`] whose real implementation lives on `target_tier`.
///
/// Opening sends a channel request and completes immediately; events start
/// flowing once the remote side has opened the real channel.
pub struct ProxyChannel {
    base: ChannelBase,
    manager: Weak<ProxyManager>,
    target_tier: Tier,
    cached_args: Vec<ChannelArg>,
    source: bool,
    sink: bool,
}

impl ProxyChannel {
    pub(crate) fn new(
        manager: Weak<ProxyManager>,
        platform: Arc<dyn Platform>,
        target_tier: Tier,
        target_channel_id: &str,
        cached_args: Vec<ChannelArg>,
        source: bool,
        sink: bool,
    ) -> Self {
        Self {
            base: ChannelBase::new(target_channel_id, platform),
            manager,
            target_tier,
            cached_args,
            source,
            sink,
        }
    }

    pub fn target_tier(&self) -> Tier {
        self.target_tier
    }

    pub fn full_id(&self) -> FullId {
        FullId::new(self.unique_id(), self.target_tier)
    }

    /// Arguments replayed on every open to locate the real channel.
    pub fn cached_args(&self) -> &[ChannelArg] {
        &self.cached_args
    }

    fn manager(&self) -> Result<Arc<ProxyManager>> {
        self.manager
            .upgrade()
            .ok_or_else(|| Error::Failed("proxy manager is gone".to_string()))
    }
}

#[async_trait]
impl Channel for ProxyChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn is_source(&self) -> bool {
        self.source
    }

    fn is_sink(&self) -> bool {
        self.sink
    }

    async fn do_open(&self) -> Result<()> {
        let manager = self.manager()?;
        let completion = manager
            .request_proxy_channel(self, &self.cached_args)
            .map_err(|e| Error::Failed(e.to_string()))?;

        let full_id = self.full_id();
        tokio::spawn(async move {
            match completion.await {
                Ok(()) => tracing::debug!(%full_id, "remote channel ready"),
                Err(e) => tracing::warn!(%full_id, error = %e, "remote channel request failed"),
            }
        });
        Ok(())
    }

    async fn do_close(&self) -> Result<()> {
        let manager = self.manager()?;
        if let Err(e) = manager.release_proxy_channel(self) {
            tracing::warn!(full_id = %self.full_id(), error = %e, "failed to send channel release");
        }
        Ok(())
    }

    fn send_event(&self, payload: Value) -> Result<()> {
        if !self.sink {
            return Err(Error::NotASink);
        }
        self.manager()?
            .send_sink_event(self.target_tier, self.unique_id(), payload)
            .map_err(|e| Error::Failed(e.to_string()))
    }
}
