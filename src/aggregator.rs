//! Measure aggregators and how they roll up.

use crate::segment::Datum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    Avg,
    DistinctCount,
}

impl Aggregator {
    pub fn name(self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Count => "count",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Avg => "avg",
            Aggregator::DistinctCount => "distinct-count",
        }
    }

    /// Aggregator that combines already-aggregated cells; counts roll up by
    /// summing. `None` when partial results cannot be merged.
    pub fn rollup(self) -> Option<Aggregator> {
        match self {
            Aggregator::Sum | Aggregator::Count => Some(Aggregator::Sum),
            Aggregator::Min => Some(Aggregator::Min),
            Aggregator::Max => Some(Aggregator::Max),
            Aggregator::Avg | Aggregator::DistinctCount => None,
        }
    }

    /// Merges `value` into `acc`.
    ///
    /// A null value is absent rather than zero: the accumulator is returned
    /// untouched. An empty accumulator takes the value as is. Non-rollable
    /// aggregators leave the accumulator unchanged.
    pub fn combine(self, acc: Option<Datum>, value: &Datum) -> Option<Datum> {
        if value.is_null() {
            return acc;
        }
        let current = match acc {
            None | Some(Datum::Null) => return Some(value.clone()),
            Some(current) => current,
        };
        match self {
            Aggregator::Sum | Aggregator::Count => Some(add(&current, value)),
            Aggregator::Min => Some(pick(current, value, Ordering::Less)),
            Aggregator::Max => Some(pick(current, value, Ordering::Greater)),
            Aggregator::Avg | Aggregator::DistinctCount => Some(current),
        }
    }
}

fn add(a: &Datum, b: &Datum) -> Datum {
    match (a, b) {
        (Datum::Int(x), Datum::Int(y)) => Datum::Int(x.saturating_add(*y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Datum::Double(x + y),
            _ => a.clone(),
        },
    }
}

fn pick(current: Datum, value: &Datum, wanted: Ordering) -> Datum {
    let ordering = match (current.as_f64(), value.as_f64()) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        _ => value.cmp(&current),
    };
    if ordering == wanted {
        value.clone()
    } else {
        current
    }
}
