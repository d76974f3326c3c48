use crate::segment::{SegmentBody, SegmentHeader};
use crate::CacheError;
use std::sync::Arc;

/// Fire-and-forget notifications handled on the actor thread in arrival
/// order.
#[derive(Debug, Clone)]
pub enum Event {
    LoadSucceeded {
        header: SegmentHeader,
        body: Arc<SegmentBody>,
    },
    LoadFailed {
        header: SegmentHeader,
        error: CacheError,
    },
    SegmentRemove {
        header: SegmentHeader,
    },
    ExternalSegmentCreated {
        header: SegmentHeader,
    },
    ExternalSegmentDeleted {
        header: SegmentHeader,
    },
}

impl Event {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::LoadSucceeded { .. } => "load_succeeded",
            Event::LoadFailed { .. } => "load_failed",
            Event::SegmentRemove { .. } => "segment_remove",
            Event::ExternalSegmentCreated { .. } => "external_segment_created",
            Event::ExternalSegmentDeleted { .. } => "external_segment_deleted",
        }
    }

    pub fn header(&self) -> &SegmentHeader {
        match self {
            Event::LoadSucceeded { header, .. }
            | Event::LoadFailed { header, .. }
            | Event::SegmentRemove { header }
            | Event::ExternalSegmentCreated { header }
            | Event::ExternalSegmentDeleted { header } => header,
        }
    }
}
