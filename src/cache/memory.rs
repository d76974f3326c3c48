use super::store::{CacheEvent, CacheEventKind, ListenerSet, SegmentCache, SegmentCacheListener};
use crate::segment::{SegmentBody, SegmentHeader};
use dashmap::DashMap;
use std::sync::Arc;

/// Unbounded in-process store.
///
/// Bodies are shared as `Arc` so hits never copy cells. Events it raises
/// are marked local.
#[derive(Default)]
pub struct MemorySegmentCache {
    entries: DashMap<SegmentHeader, Arc<SegmentBody>>,
    listeners: ListenerSet,
}

impl MemorySegmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fire(&self, kind: CacheEventKind, header: &SegmentHeader) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.notify(&CacheEvent {
            kind,
            is_local: true,
            header: header.clone(),
        });
    }
}

impl SegmentCache for MemorySegmentCache {
    fn get(&self, header: &SegmentHeader) -> anyhow::Result<Option<Arc<SegmentBody>>> {
        Ok(self.entries.get(header).map(|entry| entry.value().clone()))
    }

    fn put(&self, header: &SegmentHeader, body: Arc<SegmentBody>) -> anyhow::Result<bool> {
        self.entries.insert(header.clone(), body);
        self.fire(CacheEventKind::EntryCreated, header);
        Ok(true)
    }

    fn remove(&self, header: &SegmentHeader) -> anyhow::Result<bool> {
        let removed = self.entries.remove(header).is_some();
        if removed {
            self.fire(CacheEventKind::EntryDeleted, header);
        }
        Ok(removed)
    }

    fn get_segment_headers(&self) -> anyhow::Result<Vec<SegmentHeader>> {
        Ok(self.entries.iter().map(|entry| entry.key().clone()).collect())
    }

    fn tear_down(&self) {
        self.entries.clear();
    }

    fn add_listener(&self, listener: Arc<dyn SegmentCacheListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn SegmentCacheListener>) {
        self.listeners.remove(listener);
    }

    fn supports_rich_index(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{BitKey, CellStorage, FactKey};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(CacheEventKind, bool)>>);

    impl SegmentCacheListener for Recorder {
        fn handle(&self, event: &CacheEvent) {
            self.0.lock().push((event.kind, event.is_local));
        }
    }

    fn header() -> SegmentHeader {
        SegmentHeader::new(
            FactKey {
                schema_name: "s".into(),
                schema_checksum: "c".into(),
                cube_name: "Sales".into(),
                measure_name: "m".into(),
                fact_table: "f".into(),
            },
            BitKey::new(0),
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_put_get_remove_with_local_events() {
        let cache = MemorySegmentCache::new();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn SegmentCacheListener> = recorder.clone();
        cache.add_listener(listener.clone());

        let body = Arc::new(SegmentBody::new(vec![], vec![], CellStorage::Sparse(BTreeMap::new())).unwrap());
        assert!(cache.put(&header(), body).unwrap());
        assert!(cache.get(&header()).unwrap().is_some());
        assert_eq!(cache.get_segment_headers().unwrap().len(), 1);
        assert!(cache.remove(&header()).unwrap());
        assert!(!cache.remove(&header()).unwrap());

        cache.remove_listener(&listener);
        cache.put(&header(), Arc::new(SegmentBody::new(vec![], vec![], CellStorage::Sparse(BTreeMap::new())).unwrap())).unwrap();
        assert_eq!(
            *recorder.0.lock(),
            vec![(CacheEventKind::EntryCreated, true), (CacheEventKind::EntryDeleted, true)]
        );
    }
}
