use super::axis::SegmentAxis;
use super::body::SegmentBody;
use super::cells::{cell_count, CellKey, CellStorage, DenseCells, MAX_DENSE_CELLS};
use super::datum::Datum;
use crate::aggregator::Aggregator;
use crate::{CacheError, Result};
use std::collections::BTreeMap;

/// Type of the values a segment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Double,
    Object,
}

impl ValueKind {
    fn element_size(self) -> u64 {
        match self {
            ValueKind::Int => std::mem::size_of::<i64>() as u64,
            ValueKind::Double => std::mem::size_of::<f64>() as u64,
            ValueKind::Object => std::mem::size_of::<Option<Datum>>() as u64,
        }
    }

    /// Narrowest kind able to hold every value.
    pub fn of_values<'a>(values: impl IntoIterator<Item = &'a Datum>) -> ValueKind {
        let mut kind = ValueKind::Int;
        for value in values {
            match value {
                Datum::Null | Datum::Int(_) => {}
                Datum::Double(_) => kind = ValueKind::Double,
                _ => return ValueKind::Object,
            }
        }
        kind
    }

    pub fn widen(self, other: ValueKind) -> ValueKind {
        match (self, other) {
            (ValueKind::Object, _) | (_, ValueKind::Object) => ValueKind::Object,
            (ValueKind::Double, _) | (_, ValueKind::Double) => ValueKind::Double,
            _ => ValueKind::Int,
        }
    }
}

/// Storage variant of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    DenseDouble,
    DenseInt,
    DenseObject,
    Sparse,
}

impl DatasetKind {
    pub fn dense_for(value: ValueKind) -> Self {
        match value {
            ValueKind::Int => DatasetKind::DenseInt,
            ValueKind::Double => DatasetKind::DenseDouble,
            ValueKind::Object => DatasetKind::DenseObject,
        }
    }

    /// Picks dense when `cell_count * density_ratio <= expected_populated`.
    ///
    /// Sparse is forced once the cross product passes `max_cell_count`, the
    /// dense addressing limit, or the bytes an array could occupy.
    pub fn choose(
        value: ValueKind,
        cell_count: u64,
        expected_populated: u64,
        density_ratio: f64,
        max_cell_count: u64,
    ) -> Self {
        let addressable = cell_count
            .checked_mul(value.element_size())
            .map_or(false, |bytes| bytes <= isize::MAX as u64);
        if cell_count > max_cell_count || cell_count > MAX_DENSE_CELLS || !addressable {
            return DatasetKind::Sparse;
        }
        if cell_count as f64 * density_ratio <= expected_populated as f64 {
            DatasetKind::dense_for(value)
        } else {
            DatasetKind::Sparse
        }
    }
}

/// Mutable cell set being populated from SQL rows or a rollup.
#[derive(Debug, Clone)]
pub struct SegmentDataset {
    axis_sizes: Vec<usize>,
    storage: CellStorage,
}

impl SegmentDataset {
    pub fn new(kind: DatasetKind, axis_sizes: Vec<usize>) -> Result<Self> {
        let storage = match kind {
            DatasetKind::Sparse => CellStorage::Sparse(BTreeMap::new()),
            dense => {
                let count = cell_count(&axis_sizes);
                if count > MAX_DENSE_CELLS {
                    return Err(CacheError::InvalidBody(format!(
                        "{} cells cannot be stored densely",
                        count
                    )));
                }
                let len = count as usize;
                match dense {
                    DatasetKind::DenseDouble => CellStorage::DenseDouble(DenseCells::all_null(len)),
                    DatasetKind::DenseInt => CellStorage::DenseInt(DenseCells::all_null(len)),
                    _ => CellStorage::DenseObject(vec![None; len]),
                }
            }
        };
        Ok(Self {
            axis_sizes,
            storage,
        })
    }

    pub fn for_axes(kind: DatasetKind, axes: &[SegmentAxis]) -> Result<Self> {
        Self::new(kind, axes.iter().map(SegmentAxis::ordinal_count).collect())
    }

    pub fn from_body(body: &SegmentBody) -> Self {
        Self {
            axis_sizes: body.axis_sizes(),
            storage: body.storage().clone(),
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match &self.storage {
            CellStorage::DenseDouble(_) => DatasetKind::DenseDouble,
            CellStorage::DenseInt(_) => DatasetKind::DenseInt,
            CellStorage::DenseObject(_) => DatasetKind::DenseObject,
            CellStorage::Sparse(_) => DatasetKind::Sparse,
        }
    }

    pub fn axis_sizes(&self) -> &[usize] {
        &self.axis_sizes
    }

    pub fn size(&self) -> usize {
        self.storage.size()
    }

    pub fn populated_count(&self) -> usize {
        self.storage.populated_count()
    }

    pub fn get(&self, key: &CellKey) -> Option<Datum> {
        self.storage.get(key, &self.axis_sizes)
    }

    pub fn exists(&self, key: &CellKey) -> bool {
        self.get(key).is_some()
    }

    pub fn put(&mut self, key: &CellKey, value: Datum) -> Result<()> {
        self.storage.set(key, value, &self.axis_sizes)
    }

    /// Folds `value` into the cell with `aggregator`.
    pub fn accumulate(&mut self, key: &CellKey, value: &Datum, aggregator: Aggregator) -> Result<()> {
        let current = self.get(key);
        match aggregator.combine(current, value) {
            Some(merged) => self.put(key, merged),
            None => Ok(()),
        }
    }

    pub fn cells(&self) -> impl Iterator<Item = (CellKey, Datum)> + '_ {
        self.storage.cells(&self.axis_sizes)
    }

    /// Copies the cells whose ordinals survive `ordinal_maps` (old ordinal to
    /// new ordinal, per axis) into a dataset of the same kind.
    pub fn restrict(&self, ordinal_maps: &[Vec<Option<u32>>]) -> Result<SegmentDataset> {
        let sizes: Vec<usize> = ordinal_maps
            .iter()
            .map(|m| m.iter().flatten().count())
            .collect();
        let mut target = SegmentDataset::new(self.kind(), sizes)?;
        for (key, value) in self.cells() {
            let mapped: Option<Vec<u32>> = key
                .ordinals()
                .iter()
                .zip(ordinal_maps)
                .map(|(ordinal, map)| map.get(*ordinal as usize).copied().flatten())
                .collect();
            if let Some(ordinals) = mapped {
                target.put(&CellKey::new(ordinals), value)?;
            }
        }
        Ok(target)
    }

    pub fn into_body(self, axes: &[SegmentAxis]) -> Result<SegmentBody> {
        SegmentBody::new(
            axes.iter().map(|a| a.keys().to_vec()).collect(),
            axes.iter().map(SegmentAxis::has_null).collect(),
            self.storage,
        )
    }
}
