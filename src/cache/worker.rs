use super::store::{SegmentCache, SegmentCacheListener};
use crate::segment::{SegmentBody, SegmentHeader};
use crate::{CacheError, Result};
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static ON_ACTOR_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Marks the calling thread as the cache actor; store calls from it trip
/// debug assertions.
pub(crate) fn mark_actor_thread() {
    ON_ACTOR_THREAD.with(|flag| flag.set(true));
}

pub(crate) fn on_actor_thread() -> bool {
    ON_ACTOR_THREAD.with(Cell::get)
}

/// Wraps one backing store. Store failures come back as
/// `CacheOperationFailed` naming the operation.
#[derive(Clone)]
pub struct SegmentCacheWorker {
    cache: Arc<dyn SegmentCache>,
}

impl SegmentCacheWorker {
    pub fn new(cache: Arc<dyn SegmentCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn SegmentCache> {
        &self.cache
    }

    fn check_thread(operation: &str) {
        debug_assert!(
            !on_actor_thread(),
            "segment cache '{}' called on the actor thread",
            operation
        );
    }

    pub fn get(&self, header: &SegmentHeader) -> Result<Option<Arc<SegmentBody>>> {
        Self::check_thread("get");
        self.cache.get(header).map_err(|e| CacheError::store("get", e))
    }

    pub fn put(&self, header: &SegmentHeader, body: Arc<SegmentBody>) -> Result<bool> {
        Self::check_thread("put");
        self.cache.put(header, body).map_err(|e| CacheError::store("put", e))
    }

    pub fn remove(&self, header: &SegmentHeader) -> Result<bool> {
        Self::check_thread("remove");
        self.cache.remove(header).map_err(|e| CacheError::store("remove", e))
    }

    pub fn get_segment_headers(&self) -> Result<Vec<SegmentHeader>> {
        Self::check_thread("get_segment_headers");
        self.cache
            .get_segment_headers()
            .map_err(|e| CacheError::store("get_segment_headers", e))
    }

    pub fn supports_rich_index(&self) -> bool {
        self.cache.supports_rich_index()
    }

    pub fn add_listener(&self, listener: Arc<dyn SegmentCacheListener>) {
        self.cache.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SegmentCacheListener>) {
        self.cache.remove_listener(listener);
    }

    pub fn tear_down(&self) {
        self.cache.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::ListenerSet;
    use anyhow::anyhow;

    struct Broken(ListenerSet);

    impl SegmentCache for Broken {
        fn get(&self, _: &SegmentHeader) -> anyhow::Result<Option<Arc<SegmentBody>>> {
            Err(anyhow!("connection refused"))
        }
        fn put(&self, _: &SegmentHeader, _: Arc<SegmentBody>) -> anyhow::Result<bool> {
            Err(anyhow!("disk full"))
        }
        fn remove(&self, _: &SegmentHeader) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn get_segment_headers(&self) -> anyhow::Result<Vec<SegmentHeader>> {
            Ok(vec![])
        }
        fn add_listener(&self, listener: Arc<dyn SegmentCacheListener>) {
            self.0.add(listener);
        }
        fn remove_listener(&self, listener: &Arc<dyn SegmentCacheListener>) {
            self.0.remove(listener);
        }
        fn supports_rich_index(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_store_errors_are_wrapped() {
        let worker = SegmentCacheWorker::new(Arc::new(Broken(ListenerSet::new())));
        let header = SegmentHeader::new(
            crate::segment::FactKey {
                schema_name: "s".into(),
                schema_checksum: "c".into(),
                cube_name: "Sales".into(),
                measure_name: "m".into(),
                fact_table: "f".into(),
            },
            crate::segment::BitKey::new(0),
            vec![],
            vec![],
        );
        match worker.get(&header) {
            Err(CacheError::CacheOperationFailed { operation, reason }) => {
                assert_eq!(operation, "get");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
