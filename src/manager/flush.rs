//! Cache flush
//!
//! Each header overlapping the flushed region is either dropped or narrowed
//! with one more excluded region. Exclusions are kept per column, so a
//! region over several columns cannot be carved out of a header that
//! constrains several columns; such headers are dropped instead.

use super::command::CommandContext;
use crate::segment::{SegmentColumn, SegmentHeader};
use crate::star::Star;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cells to flush: some or all measures of a star, restricted per column.
/// An empty column list means every cell.
#[derive(Debug, Clone)]
pub struct CacheRegion {
    pub star: Arc<Star>,
    /// `None` flushes every measure.
    pub measures: Option<Vec<String>>,
    pub columns: Vec<SegmentColumn>,
}

impl CacheRegion {
    pub fn all(star: Arc<Star>) -> Self {
        Self {
            star,
            measures: None,
            columns: Vec::new(),
        }
    }

    pub fn with_measure(mut self, measure: impl Into<String>) -> Self {
        self.measures.get_or_insert_with(Vec::new).push(measure.into());
        self
    }

    pub fn with_column(mut self, column: SegmentColumn) -> Self {
        self.columns.push(column);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushOutcome {
    pub dropped: Vec<SegmentHeader>,
    /// (old header, narrowed header)
    pub constrained: Vec<(SegmentHeader, SegmentHeader)>,
}

enum Action {
    Drop,
    Constrain(SegmentHeader),
}

fn decide(header: &SegmentHeader, region: &[SegmentColumn], pending: bool) -> Action {
    if pending || region.is_empty() {
        return Action::Drop;
    }
    if region.len() > 1 && header.arity() > 1 {
        return Action::Drop;
    }
    for column in region {
        let Some(constrained) = header.constrained_column(column.expression()) else {
            return Action::Drop;
        };
        if leaves_nothing(header, constrained, column) {
            return Action::Drop;
        }
    }
    Action::Constrain(header.constrain(region))
}

/// True if excluding `region` removes every value `column` admits.
fn leaves_nothing(header: &SegmentHeader, column: &SegmentColumn, region: &SegmentColumn) -> bool {
    let Some(flushed) = region.values() else {
        return true;
    };
    match column.values() {
        None => false,
        Some(values) => values
            .iter()
            .all(|v| flushed.contains(v) || header.is_excluded(column.expression(), v)),
    }
}

pub(crate) fn flush(ctx: &mut CommandContext<'_>, region: &CacheRegion) -> Result<FlushOutcome> {
    let star = &region.star;
    let index = ctx.index(&star.schema_name, &star.schema_checksum);
    let mut index = index.lock();

    let mut targets: Vec<SegmentHeader> = match &region.measures {
        None => index.intersect_region(&star.fact_table, None, &region.columns),
        Some(measures) => measures
            .iter()
            .flat_map(|m| index.intersect_region(&star.fact_table, Some(m.as_str()), &region.columns))
            .collect(),
    };
    targets.retain(|h| star.owns(h.fact()));

    let mut outcome = FlushOutcome::default();
    for header in targets {
        match decide(&header, &region.columns, index.is_pending(&header)) {
            Action::Drop => {
                index.remove(&header);
                outcome.dropped.push(header);
            }
            Action::Constrain(narrowed) => {
                if index.update(&header, narrowed.clone()) {
                    outcome.constrained.push((header, narrowed));
                } else {
                    index.remove(&header);
                    outcome.dropped.push(header);
                }
            }
        }
    }
    drop(index);

    debug!(
        dropped = outcome.dropped.len(),
        constrained = outcome.constrained.len(),
        "flushed region"
    );
    ctx.metrics()
        .flushed_headers
        .inc_by((outcome.dropped.len() + outcome.constrained.len()) as u64);

    for header in &outcome.dropped {
        let composite = ctx.composite();
        let header = header.clone();
        ctx.core.spawn_io("remove", move || composite.remove(&header).map(|_| ()));
    }
    for (old, new) in &outcome.constrained {
        let composite = ctx.composite();
        let (old, new) = (old.clone(), new.clone());
        ctx.core.spawn_io("rekey", move || {
            for worker in composite.workers() {
                if !worker.supports_rich_index() {
                    worker.remove(&old)?;
                    continue;
                }
                let body = worker.get(&old)?;
                worker.remove(&old)?;
                match body {
                    Some(body) => {
                        worker.put(&new, body)?;
                    }
                    None => warn!(measure = old.measure_name(), "flushed segment missing from store"),
                }
            }
            Ok(())
        });
    }
    ctx.core.refresh_header_gauge();
    Ok(outcome)
}
