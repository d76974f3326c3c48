use super::axis::SegmentAxis;
use super::body::SegmentBody;
use super::dataset::SegmentDataset;
use super::header::SegmentHeader;
use super::segment::{ordinal_map, Segment, SegmentWithData};
use crate::star::{Star, StarMeasure};
use crate::{CacheError, Result};
use std::sync::Arc;

/// Turns cached (header, body) pairs of one star measure back into
/// segments. Registered with the index alongside each header.
#[derive(Debug, Clone)]
pub struct SegmentConverter {
    star: Arc<Star>,
    measure: StarMeasure,
}

impl SegmentConverter {
    pub fn new(star: Arc<Star>, measure: StarMeasure) -> Self {
        Self { star, measure }
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn measure(&self) -> &StarMeasure {
        &self.measure
    }

    /// Cells lying in the header's excluded regions are dropped here; bodies
    /// re-keyed by a flush are stored untrimmed.
    pub fn convert(&self, header: &SegmentHeader, body: &SegmentBody) -> Result<SegmentWithData> {
        if header.arity() != body.arity() {
            return Err(CacheError::InvalidBody(format!(
                "header constrains {} columns, body has {} axes",
                header.arity(),
                body.arity()
            )));
        }
        let segment = Segment::from_header(self.star.clone(), self.measure.clone(), header)?;
        let mut axes: Vec<SegmentAxis> = segment
            .predicates()
            .iter()
            .zip(body.axis_value_sets())
            .zip(body.null_axis_flags())
            .map(|((predicate, values), has_null)| {
                SegmentAxis::new(predicate.clone(), values.iter().cloned().collect(), *has_null)
            })
            .collect();
        let mut data = SegmentDataset::from_body(body);

        if !header.excluded_regions().is_empty() {
            let expressions: Vec<&str> = header
                .constrained_columns()
                .iter()
                .map(|c| c.expression())
                .collect();
            let maps: Vec<Vec<Option<u32>>> = axes
                .iter()
                .zip(&expressions)
                .map(|(axis, expr)| ordinal_map(axis, |key| !header.is_excluded(expr, key)))
                .collect();
            data = data.restrict(&maps)?;
            axes = axes
                .iter()
                .zip(&expressions)
                .map(|(axis, expr)| axis.restrict(|key| !header.is_excluded(expr, key)))
                .collect();
        }

        SegmentWithData::new(segment, axes, data)
    }
}
