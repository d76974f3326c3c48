use super::cells::{cell_count, CellKey, CellStorage};
use super::datum::Datum;
use crate::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable payload of a cached segment.
///
/// Carries the axis value sets and null-axis flags the cells were laid out
/// against, so a body can be re-attached to any header describing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBody {
    axis_value_sets: Vec<Vec<Datum>>,
    null_axis_flags: Vec<bool>,
    storage: CellStorage,
}

impl SegmentBody {
    /// Validates that the storage matches the declared axes: dense array length
    /// equals the product of axis sizes, sparse coordinates lie inside them.
    pub fn new(
        axis_value_sets: Vec<Vec<Datum>>,
        null_axis_flags: Vec<bool>,
        storage: CellStorage,
    ) -> Result<Self> {
        if axis_value_sets.len() != null_axis_flags.len() {
            return Err(CacheError::InvalidBody(format!(
                "{} axis value sets but {} null flags",
                axis_value_sets.len(),
                null_axis_flags.len()
            )));
        }
        // Ordinals index the value sets directly; they must match axis order.
        for (axis, values) in axis_value_sets.iter().enumerate() {
            if values.iter().any(Datum::is_null) {
                return Err(CacheError::InvalidBody(format!(
                    "axis {} lists null as a value; use the null flag",
                    axis
                )));
            }
            if values.windows(2).any(|pair| pair[0] >= pair[1]) {
                return Err(CacheError::InvalidBody(format!(
                    "axis {} values are not strictly ascending",
                    axis
                )));
            }
        }
        let body = Self {
            axis_value_sets,
            null_axis_flags,
            storage,
        };
        let sizes = body.axis_sizes();
        match &body.storage {
            CellStorage::Sparse(cells) => {
                if let Some(key) = cells.keys().find(|k| !k.fits(&sizes)) {
                    return Err(CacheError::InvalidBody(format!(
                        "sparse cell {:?} outside axes {:?}",
                        key.ordinals(),
                        sizes
                    )));
                }
            }
            dense => {
                let expected = cell_count(&sizes);
                if dense.size() as u64 != expected {
                    return Err(CacheError::InvalidBody(format!(
                        "dense array holds {} cells, axes describe {}",
                        dense.size(),
                        expected
                    )));
                }
            }
        }
        Ok(body)
    }

    pub fn axis_value_sets(&self) -> &[Vec<Datum>] {
        &self.axis_value_sets
    }

    pub fn null_axis_flags(&self) -> &[bool] {
        &self.null_axis_flags
    }

    pub fn storage(&self) -> &CellStorage {
        &self.storage
    }

    pub fn arity(&self) -> usize {
        self.axis_value_sets.len()
    }

    /// Ordinals per axis, null bucket included.
    pub fn axis_sizes(&self) -> Vec<usize> {
        self.axis_value_sets
            .iter()
            .zip(&self.null_axis_flags)
            .map(|(values, has_null)| values.len() + usize::from(*has_null))
            .collect()
    }

    pub fn is_dense(&self) -> bool {
        self.storage.is_dense()
    }

    pub fn populated_count(&self) -> usize {
        self.storage.populated_count()
    }

    pub fn get(&self, key: &CellKey) -> Option<Datum> {
        self.storage.get(key, &self.axis_sizes())
    }

    /// Populated cells keyed by coordinate.
    pub fn value_map(&self) -> BTreeMap<CellKey, Datum> {
        let sizes = self.axis_sizes();
        self.storage.cells(&sizes).collect()
    }
}
