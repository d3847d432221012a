use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked for every event a source channel produces.
pub type EventListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerTable {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ListenerId, EventListener)>>,
}

/// Registered listeners of one channel.
///
/// Cheap to clone; clones share the same table, so a channel can hand a
/// clone to a background task that produces events.
#[derive(Clone, Default)]
pub struct EventListeners {
    table: Arc<ListenerTable>,
}

impl EventListeners {
    pub fn add(&self, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.table.next_id.fetch_add(1, Ordering::Relaxed));
        self.table.entries.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.table.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener registered at the time of the call, in
    /// registration order. Listeners may subscribe or unsubscribe from
    /// inside the callback.
    pub fn emit(&self, payload: &Value) {
        let snapshot: Vec<EventListener> = self
            .table
            .entries
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(payload);
        }
    }
}
