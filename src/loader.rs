//! Builds segments from result rows that have already been fetched.
//!
//! Row layout follows the grouping sets list: the detail columns in bit
//! order, then one value per detail measure, then (only when grouping sets
//! are in use) one `GROUPING()` flag per rollup column.

use crate::grouping::{GroupingSet, GroupingSetsList};
use crate::rollup::RollupThresholds;
use crate::segment::{
    cell_count, CellKey, DatasetKind, Datum, Segment, SegmentAxis, SegmentBody, SegmentDataset,
    SegmentHeader, ValueKind,
};
use crate::{CacheError, Result};
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentLoader {
    thresholds: RollupThresholds,
}

impl SegmentLoader {
    pub fn new(thresholds: RollupThresholds) -> Self {
        Self { thresholds }
    }

    /// One `(header, body)` per segment of every grouping set.
    pub fn load(
        &self,
        list: &GroupingSetsList,
        rows: &[Vec<Datum>],
    ) -> Result<Vec<(SegmentHeader, SegmentBody)>> {
        let Some(detail) = list.detail() else {
            return Ok(Vec::new());
        };
        let column_count = detail.columns().len();
        let measure_count = detail.measure_count();
        let flag_count = list.rollup_columns().len();
        let width = column_count + measure_count + flag_count;

        let mut rows_by_set: Vec<Vec<&Vec<Datum>>> = vec![Vec::new(); list.grouping_sets().len()];
        for row in rows {
            if row.len() < width {
                return Err(CacheError::InvalidBody(format!(
                    "row has {} values, expected {}",
                    row.len(),
                    width
                )));
            }
            let flags: Vec<bool> = row[column_count + measure_count..width]
                .iter()
                .map(is_grouping_flag_set)
                .collect();
            match list.grouping_set_for_row(&flags) {
                Some(set) => rows_by_set[set].push(row),
                None => debug!(?flags, "row matches no grouping set"),
            }
        }

        let mut loaded = Vec::new();
        for (set, set_rows) in list.grouping_sets().iter().zip(&rows_by_set) {
            for (measure, segment) in set.segments().iter().enumerate().take(measure_count) {
                loaded.push(self.load_segment(
                    detail,
                    segment,
                    set_rows,
                    column_count + measure,
                )?);
            }
        }
        Ok(loaded)
    }

    fn load_segment(
        &self,
        detail: &GroupingSet,
        segment: &Segment,
        rows: &[&Vec<Datum>],
        measure_index: usize,
    ) -> Result<(SegmentHeader, SegmentBody)> {
        let positions: Vec<usize> = segment
            .columns()
            .iter()
            .map(|c| {
                detail
                    .columns()
                    .iter()
                    .position(|d| d.bit_position == c.bit_position)
                    .ok_or_else(|| CacheError::UnknownColumn(c.expression.clone()))
            })
            .collect::<Result<_>>()?;

        let axes: Vec<SegmentAxis> = positions
            .iter()
            .zip(segment.predicates())
            .map(|(&pos, predicate)| {
                let seen = rows.iter().map(|row| &row[pos]);
                let has_null = seen.clone().any(Datum::is_null) && predicate.evaluate(&Datum::Null);
                let keys: BTreeSet<Datum> = match predicate.values() {
                    Some(values) => values.iter().filter(|v| !v.is_null()).cloned().collect(),
                    None => seen.filter(|v| !v.is_null()).cloned().collect(),
                };
                SegmentAxis::new(predicate.clone(), keys, has_null)
            })
            .collect();

        let sizes: Vec<usize> = axes.iter().map(SegmentAxis::ordinal_count).collect();
        let value_kind = ValueKind::of_values(rows.iter().map(|row| &row[measure_index]));
        let kind = DatasetKind::choose(
            value_kind,
            cell_count(&sizes),
            rows.len() as u64,
            self.thresholds.density_ratio,
            self.thresholds.max_cell_count,
        );
        let mut dataset = SegmentDataset::new(kind, sizes)?;
        for row in rows {
            let ordinals: Option<Vec<u32>> = positions
                .iter()
                .zip(&axes)
                .map(|(&pos, axis)| axis.offset_of(&row[pos]).map(|o| o as u32))
                .collect();
            if let Some(ordinals) = ordinals {
                dataset.put(&CellKey::new(ordinals), row[measure_index].clone())?;
            }
        }
        debug!(
            measure = segment.measure().name.as_str(),
            rows = rows.len(),
            kind = ?dataset.kind(),
            "loaded segment"
        );
        Ok((segment.header(), dataset.into_body(&axes)?))
    }
}

fn is_grouping_flag_set(value: &Datum) -> bool {
    match value {
        Datum::Bool(b) => *b,
        Datum::Int(i) => *i != 0,
        _ => false,
    }
}
