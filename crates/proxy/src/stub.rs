//! Hosting-side binding of a real channel to one remote requester.

use crate::error::ProxyError;
use crate::manager::ProxyManager;
use corelib::{Channel, ChannelExt, ListenerId, Tier};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};

/// Forwards a real channel's events to the tier that requested it, and that
/// tier's sink writes into the real channel.
pub struct ChannelStub {
    manager: Weak<ProxyManager>,
    requester: Tier,
    inner: Arc<dyn Channel>,
    listener: Mutex<Option<ListenerId>>,
}

impl ChannelStub {
    pub(crate) fn new(manager: Weak<ProxyManager>, requester: Tier, inner: Arc<dyn Channel>) -> Self {
        Self {
            manager,
            requester,
            inner,
            listener: Mutex::new(None),
        }
    }

    pub fn requester(&self) -> Tier {
        self.requester
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner
    }

    /// Subscribe to the real channel, then open it.
    pub async fn open(&self) -> Result<(), ProxyError> {
        let manager = self.manager.clone();
        let requester = self.requester;
        let channel_id = self.inner.unique_id().to_string();
        let id = self.inner.subscribe(Arc::new(move |data: &Value| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Err(e) = manager.send_source_event(requester, &channel_id, data.clone()) {
                tracing::warn!(%channel_id, %requester, error = %e, "dropping source event");
            }
        }));
        if let Some(previous) = self.listener.lock().replace(id) {
            self.inner.unsubscribe(previous);
        }

        if let Err(e) = self.inner.open().await {
            self.detach();
            return Err(e.into());
        }
        Ok(())
    }

    /// Unsubscribe from the real channel, then close it.
    pub async fn close(&self) -> Result<(), ProxyError> {
        self.detach();
        self.inner.close().await?;
        Ok(())
    }

    /// Push a requester's sink write into the real channel.
    pub fn send_event(&self, data: Value) -> Result<(), ProxyError> {
        self.inner.send_event(data)?;
        Ok(())
    }

    fn detach(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.inner.unsubscribe(id);
        }
    }
}
