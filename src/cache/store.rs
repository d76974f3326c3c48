use crate::segment::{SegmentBody, SegmentHeader};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    EntryCreated,
    EntryDeleted,
}

/// Change notification from a backing store.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub kind: CacheEventKind,
    /// Raised by this process's own put/remove.
    pub is_local: bool,
    pub header: SegmentHeader,
}

pub trait SegmentCacheListener: Send + Sync {
    fn handle(&self, event: &CacheEvent);
}

/// Contract of a pluggable segment store.
///
/// Implementations must tolerate concurrent calls from several I/O threads.
pub trait SegmentCache: Send + Sync {
    fn get(&self, header: &SegmentHeader) -> anyhow::Result<Option<Arc<SegmentBody>>>;

    fn put(&self, header: &SegmentHeader, body: Arc<SegmentBody>) -> anyhow::Result<bool>;

    fn remove(&self, header: &SegmentHeader) -> anyhow::Result<bool>;

    fn get_segment_headers(&self) -> anyhow::Result<Vec<SegmentHeader>>;

    fn tear_down(&self) {}

    fn add_listener(&self, listener: Arc<dyn SegmentCacheListener>);

    fn remove_listener(&self, listener: &Arc<dyn SegmentCacheListener>);

    /// Whether an entry can be re-keyed to a narrower header in place.
    fn supports_rich_index(&self) -> bool;
}

/// Listener bookkeeping for store implementations.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn SegmentCacheListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn SegmentCacheListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove(&self, listener: &Arc<dyn SegmentCacheListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: &CacheEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.handle(event);
        }
    }
}
