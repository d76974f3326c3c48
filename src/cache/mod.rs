//! Segment stores and the index over them
//!
//! - `store`: pluggable store contract and its change events
//! - `memory`: the in-process store
//! - `worker` / `composite`: fan-out over every configured store
//! - `index`: per-schema bookkeeping of headers and in-flight loads

pub mod composite;
pub mod future;
pub mod index;
pub mod memory;
pub mod store;
pub mod worker;

// Re-exports
pub use composite::CompositeSegmentCache;
pub use future::SegmentFuture;
pub use index::{SegmentCacheIndex, SegmentCacheIndexRegistry};
pub use memory::MemorySegmentCache;
pub use store::{CacheEvent, CacheEventKind, ListenerSet, SegmentCache, SegmentCacheListener};
pub use worker::SegmentCacheWorker;
