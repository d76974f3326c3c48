//! LumaDB segment cache
//!
//! Aggregate-result cache for the OLAP engine:
//! - Segment model: axes, headers, dense/sparse bodies, datasets
//! - Rollup engine merging cached segments without touching SQL
//! - Grouping-sets planner for batched GROUP BY statements
//! - Segment cache manager: single-threaded actor over the index and caches

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod grouping;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod rollup;
pub mod segment;
pub mod star;
pub mod telemetry;

// Re-exports
pub use aggregator::Aggregator;
pub use cache::{
    CacheEvent, CacheEventKind, CompositeSegmentCache, MemorySegmentCache, SegmentCache,
    SegmentCacheIndex, SegmentCacheIndexRegistry, SegmentCacheListener, SegmentCacheWorker,
    SegmentFuture,
};
pub use config::CacheConfig;
pub use error::CacheError;
pub use execution::{Execution, Locus};
pub use grouping::{GroupingSet, GroupingSetsList};
pub use loader::SegmentLoader;
pub use manager::{ActorState, Command, CommandContext, LoadClaim, SegmentCacheManager};
pub use rollup::{rollup, RollupThresholds};
pub use segment::{
    BitKey, CellKey, CellRequest, ColumnPredicate, Datum, Segment, SegmentAxis, SegmentBody,
    SegmentColumn, SegmentConverter, SegmentDataset, SegmentHeader, SegmentWithData,
};
pub use star::{Star, StarColumn, StarMeasure};

pub type Result<T> = std::result::Result<T, CacheError>;
