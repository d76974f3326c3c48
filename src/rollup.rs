//! Rollup engine
//!
//! Merges cached segments into one coarser segment without going back to
//! the database. The retained columns become the target axes (union of the
//! source keys); every other column collapses away through the measure's
//! rollup aggregator.

use crate::aggregator::Aggregator;
use crate::config::CacheConfig;
use crate::segment::{
    cell_count, BitKey, CellKey, CellStorage, ColumnPredicate, DatasetKind, Datum, SegmentAxis,
    SegmentBody, SegmentColumn, SegmentDataset, SegmentHeader, ValueKind,
};
use crate::{CacheError, Result};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Storage-selection limits for rolled-up segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupThresholds {
    /// Dense is chosen when `cells * density_ratio <= expected populated`.
    pub density_ratio: f64,
    /// Above this many cells the target is always sparse.
    pub max_cell_count: u64,
}

impl Default for RollupThresholds {
    fn default() -> Self {
        Self {
            density_ratio: 0.5,
            max_cell_count: 10_000_000,
        }
    }
}

impl From<&CacheConfig> for RollupThresholds {
    fn from(config: &CacheConfig) -> Self {
        Self {
            density_ratio: config.rollup_density_ratio,
            max_cell_count: config.rollup_max_cell_count,
        }
    }
}

/// Rolls `segments` up to the columns named in `keep_columns`.
///
/// Sources must share identity and constrained column set. Cells in a
/// source's excluded region on a kept column are skipped; an excluded
/// region on a collapsed column cannot be honoured and is rejected.
pub fn rollup(
    segments: &[(SegmentHeader, Arc<SegmentBody>)],
    keep_columns: &BTreeSet<String>,
    aggregator: Aggregator,
    thresholds: RollupThresholds,
) -> Result<(SegmentHeader, SegmentBody)> {
    let (first, _) = segments
        .first()
        .ok_or_else(|| CacheError::IncompatibleSegments("nothing to roll up".to_string()))?;
    let combiner = aggregator
        .rollup()
        .ok_or_else(|| CacheError::NotRollable(aggregator.name().to_string()))?;

    let expressions: Vec<&str> = first
        .constrained_columns()
        .iter()
        .map(SegmentColumn::expression)
        .collect();
    for keep in keep_columns {
        if !expressions.contains(&keep.as_str()) {
            return Err(CacheError::UnknownColumn(keep.clone()));
        }
    }
    let kept: Vec<usize> = (0..expressions.len())
        .filter(|i| keep_columns.contains(expressions[*i]))
        .collect();

    for (header, body) in segments {
        check_compatible(first, header, body, &expressions)?;
        for region in header.excluded_regions() {
            if !keep_columns.contains(region.expression()) {
                return Err(CacheError::IncompatibleSegments(format!(
                    "excluded region on rolled-up column {}",
                    region.expression()
                )));
            }
        }
    }

    // (1) target axes: union of surviving keys, null bucket if any source has one
    let mut target_columns = Vec::with_capacity(kept.len());
    let mut target_axes = Vec::with_capacity(kept.len());
    for &i in &kept {
        let expr = expressions[i];
        let mut keys = BTreeSet::new();
        let mut has_null = false;
        let mut column: Option<SegmentColumn> = None;
        for (header, body) in segments {
            keys.extend(
                body.axis_value_sets()[i]
                    .iter()
                    .filter(|v| !header.is_excluded(expr, v))
                    .cloned(),
            );
            has_null |= body.null_axis_flags()[i] && !header.is_excluded(expr, &Datum::Null);
            let source = &header.constrained_columns()[i];
            column = Some(match column {
                None => source.clone(),
                Some(merged) => merged.merge(source),
            });
        }
        let column = column.unwrap_or_else(|| SegmentColumn::wildcard(expr));
        let predicate = ColumnPredicate::from_values(column.values());
        target_axes.push(SegmentAxis::new(predicate, keys, has_null));
        target_columns.push(column);
    }

    // (2, 3) size and representation
    let sizes: Vec<usize> = target_axes.iter().map(SegmentAxis::ordinal_count).collect();
    let cells = cell_count(&sizes);
    let populated: u64 = segments
        .iter()
        .map(|(_, body)| body.populated_count() as u64)
        .fold(0u64, u64::saturating_add);
    let expected = populated.min(cells);
    let value_kind = segments
        .iter()
        .map(|(_, body)| storage_value_kind(body.storage()))
        .fold(ValueKind::Int, ValueKind::widen);
    let kind = DatasetKind::choose(
        value_kind,
        cells,
        expected,
        thresholds.density_ratio,
        thresholds.max_cell_count,
    );
    debug!(
        measure = first.measure_name(),
        sources = segments.len(),
        cells,
        expected,
        ?kind,
        "rolling up segments"
    );

    // (4, 5) allocate and fold every source cell in
    let mut dataset = SegmentDataset::new(kind, sizes)?;
    for (header, body) in segments {
        let lookups: Vec<Vec<Option<u32>>> = kept
            .iter()
            .zip(&target_axes)
            .map(|(&i, target)| {
                ordinal_lookup(
                    &body.axis_value_sets()[i],
                    body.null_axis_flags()[i],
                    target,
                    |v| header.is_excluded(expressions[i], v),
                )
            })
            .collect();
        let source_sizes = body.axis_sizes();
        for (key, value) in body.storage().cells(&source_sizes) {
            let ordinals: Option<Vec<u32>> = kept
                .iter()
                .zip(&lookups)
                .map(|(&i, lookup)| lookup[key.ordinals()[i] as usize])
                .collect();
            if let Some(ordinals) = ordinals {
                dataset.accumulate(&CellKey::new(ordinals), &value, combiner)?;
            }
        }
    }

    // (6) target header keeps only the retained columns, no exclusions
    let positions: Vec<usize> = first.constrained_columns_bitkey().positions().collect();
    let bitkey = BitKey::from_positions(
        first.constrained_columns_bitkey().len(),
        kept.iter().map(|&i| positions[i]),
    );
    let header = SegmentHeader::new(
        first.fact().clone(),
        bitkey,
        target_columns,
        first.compound_predicates().to_vec(),
    );
    let body = dataset.into_body(&target_axes)?;
    Ok((header, body))
}

fn check_compatible(
    first: &SegmentHeader,
    header: &SegmentHeader,
    body: &SegmentBody,
    expressions: &[&str],
) -> Result<()> {
    if header.fact() != first.fact() || header.compound_predicates() != first.compound_predicates() {
        return Err(CacheError::IncompatibleSegments(format!(
            "{}/{} cannot be rolled up with {}/{}",
            header.cube_name(),
            header.measure_name(),
            first.cube_name(),
            first.measure_name()
        )));
    }
    let same_columns = header.arity() == expressions.len()
        && header
            .constrained_columns()
            .iter()
            .zip(expressions)
            .all(|(c, e)| c.expression() == *e);
    if !same_columns || header.constrained_columns_bitkey() != first.constrained_columns_bitkey() {
        return Err(CacheError::IncompatibleSegments(
            "sources constrain different columns".to_string(),
        ));
    }
    if body.arity() != header.arity() || header.constrained_columns_bitkey().cardinality() != header.arity() {
        return Err(CacheError::InvalidBody(format!(
            "body has {} axes for {} constrained columns",
            body.arity(),
            header.arity()
        )));
    }
    Ok(())
}

/// Source ordinal to target ordinal for one kept axis; excluded keys map
/// to `None`.
fn ordinal_lookup(
    values: &[Datum],
    has_null: bool,
    target: &SegmentAxis,
    excluded: impl Fn(&Datum) -> bool,
) -> Vec<Option<u32>> {
    let mut lookup: Vec<Option<u32>> = values
        .iter()
        .map(|v| {
            if excluded(v) {
                None
            } else {
                target.offset_of(v).map(|o| o as u32)
            }
        })
        .collect();
    if has_null {
        lookup.push(if excluded(&Datum::Null) {
            None
        } else {
            target.offset_of(&Datum::Null).map(|o| o as u32)
        });
    }
    lookup
}

fn storage_value_kind(storage: &CellStorage) -> ValueKind {
    match storage {
        CellStorage::DenseInt(_) => ValueKind::Int,
        CellStorage::DenseDouble(_) => ValueKind::Double,
        CellStorage::DenseObject(values) => ValueKind::of_values(values.iter().flatten()),
        CellStorage::Sparse(cells) => ValueKind::of_values(cells.values()),
    }
}

/// Distinct cube/measure pairs among `headers`, for log messages.
pub(crate) fn describe_sources(headers: &[SegmentHeader]) -> String {
    let mut seen = HashSet::new();
    headers
        .iter()
        .filter(|h| seen.insert((h.cube_name(), h.measure_name())))
        .map(|h| format!("{}.{}", h.cube_name(), h.measure_name()))
        .collect::<Vec<_>>()
        .join(", ")
}
