use super::store::SegmentCacheListener;
use super::worker::SegmentCacheWorker;
use crate::segment::{SegmentBody, SegmentHeader};
use crate::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Fans each operation out over the workers, in order.
#[derive(Clone, Default)]
pub struct CompositeSegmentCache {
    workers: Vec<SegmentCacheWorker>,
}

impl CompositeSegmentCache {
    pub fn new(workers: Vec<SegmentCacheWorker>) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> &[SegmentCacheWorker] {
        &self.workers
    }

    /// First hit in worker order.
    pub fn get(&self, header: &SegmentHeader) -> Result<Option<Arc<SegmentBody>>> {
        for worker in &self.workers {
            if let Some(body) = worker.get(header)? {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    /// Union over all workers, without duplicates.
    pub fn get_segment_headers(&self) -> Result<Vec<SegmentHeader>> {
        match self.workers.as_slice() {
            [] => Ok(Vec::new()),
            [only] => only.get_segment_headers(),
            workers => {
                let mut seen = HashSet::new();
                let mut headers = Vec::new();
                for worker in workers {
                    for header in worker.get_segment_headers()? {
                        if seen.insert(header.clone()) {
                            headers.push(header);
                        }
                    }
                }
                Ok(headers)
            }
        }
    }

    /// Stores into every worker. Every worker is tried; the first failure
    /// is reported afterwards.
    pub fn put(&self, header: &SegmentHeader, body: Arc<SegmentBody>) -> Result<bool> {
        let mut stored = false;
        let mut failure = None;
        for worker in &self.workers {
            match worker.put(header, body.clone()) {
                Ok(ok) => stored |= ok,
                Err(err) => {
                    warn!(error = %err, "segment put failed");
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(stored),
        }
    }

    /// True if any worker held the entry.
    pub fn remove(&self, header: &SegmentHeader) -> Result<bool> {
        let mut removed = false;
        let mut failure = None;
        for worker in &self.workers {
            match worker.remove(header) {
                Ok(ok) => removed |= ok,
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    pub fn supports_rich_index(&self) -> bool {
        self.workers.iter().all(SegmentCacheWorker::supports_rich_index)
    }

    pub fn add_listener(&self, listener: Arc<dyn SegmentCacheListener>) {
        for worker in &self.workers {
            worker.add_listener(listener.clone());
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SegmentCacheListener>) {
        for worker in &self.workers {
            worker.remove_listener(listener);
        }
    }

    pub fn tear_down(&self) {
        for worker in &self.workers {
            worker.tear_down();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemorySegmentCache;
    use crate::cache::store::SegmentCache;
    use crate::segment::{BitKey, CellStorage, FactKey};
    use std::collections::BTreeMap;

    fn header(measure: &str) -> SegmentHeader {
        SegmentHeader::new(
            FactKey {
                schema_name: "s".into(),
                schema_checksum: "c".into(),
                cube_name: "Sales".into(),
                measure_name: measure.into(),
                fact_table: "f".into(),
            },
            BitKey::new(0),
            vec![],
            vec![],
        )
    }

    fn body() -> Arc<SegmentBody> {
        Arc::new(SegmentBody::new(vec![], vec![], CellStorage::Sparse(BTreeMap::new())).unwrap())
    }

    #[test]
    fn test_union_and_first_hit() {
        let a = Arc::new(MemorySegmentCache::new());
        let b = Arc::new(MemorySegmentCache::new());
        a.put(&header("x"), body()).unwrap();
        b.put(&header("x"), body()).unwrap();
        b.put(&header("y"), body()).unwrap();
        let composite = CompositeSegmentCache::new(vec![
            SegmentCacheWorker::new(a.clone()),
            SegmentCacheWorker::new(b.clone()),
        ]);
        assert_eq!(composite.get_segment_headers().unwrap().len(), 2);
        assert!(composite.get(&header("y")).unwrap().is_some());
        assert!(composite.remove(&header("y")).unwrap());
        assert!(!composite.remove(&header("y")).unwrap());
        assert!(composite.supports_rich_index());
        assert!(CompositeSegmentCache::default().get(&header("x")).unwrap().is_none());
    }
}
