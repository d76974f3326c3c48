//! Segment data model
//!
//! Value types describing a cached cell set (axes, header, body) and the
//! mutable dataset a segment is populated through.

pub mod axis;
pub mod bitkey;
pub mod body;
pub mod cells;
pub mod converter;
pub mod dataset;
pub mod datum;
pub mod header;
pub mod predicate;
pub mod request;
#[allow(clippy::module_inception)]
pub mod segment;

// Re-exports
pub use axis::SegmentAxis;
pub use bitkey::BitKey;
pub use body::SegmentBody;
pub use cells::{cell_count, CellKey, CellStorage, DenseCells, MAX_DENSE_CELLS};
pub use converter::SegmentConverter;
pub use dataset::{DatasetKind, SegmentDataset, ValueKind};
pub use datum::Datum;
pub use header::{FactKey, SegmentColumn, SegmentHeader};
pub use predicate::ColumnPredicate;
pub use request::CellRequest;
pub use segment::{Segment, SegmentWithData};
