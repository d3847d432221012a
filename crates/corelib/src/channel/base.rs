use super::lifecycle::Completion;
use super::listeners::EventListeners;
use crate::platform::Platform;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;

/// Open/close bookkeeping. At most one of `opening` and `closing` is set.
#[derive(Default)]
pub(crate) struct Lifecycle {
    pub(crate) use_count: usize,
    pub(crate) opening: Option<Completion>,
    pub(crate) closing: Option<Completion>,
}

/// State shared by every channel implementation.
pub struct ChannelBase {
    unique_id: String,
    platform: Arc<dyn Platform>,
    supported: OnceCell<bool>,
    listeners: EventListeners,
    pub(crate) lifecycle: Mutex<Lifecycle>,
}

impl ChannelBase {
    pub fn new(unique_id: impl Into<String>, platform: Arc<dyn Platform>) -> Self {
        Self {
            unique_id: unique_id.into(),
            platform,
            supported: OnceCell::new(),
            listeners: EventListeners::default(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn listeners(&self) -> &EventListeners {
        &self.listeners
    }

    /// Number of outstanding opens.
    pub fn use_count(&self) -> usize {
        self.lifecycle.lock().use_count
    }

    pub fn is_open(&self) -> bool {
        let state = self.lifecycle.lock();
        state.use_count > 0 && state.opening.is_none()
    }

    pub(crate) fn supported(&self, check: impl FnOnce() -> bool) -> bool {
        *self.supported.get_or_init(check)
    }
}
