//! Cell coordinates and the storage variants shared by datasets and bodies.
//!
//! Dense numeric storage keeps a parallel null bit-vector. A bit only means
//! "null" when the stored value is zero, so non-zero cells never need the
//! bitmap consulted.

use super::datum::Datum;
use crate::{CacheError, Result};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Largest dense array the cache will address; roaring indexes are `u32`.
pub const MAX_DENSE_CELLS: u64 = u32::MAX as u64;

/// Coordinate of a cell: one ordinal per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey(Vec<u32>);

impl CellKey {
    pub fn new(ordinals: Vec<u32>) -> Self {
        Self(ordinals)
    }

    pub fn ordinals(&self) -> &[u32] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Row-major offset, last axis varies fastest.
    pub fn offset(&self, axis_sizes: &[usize]) -> usize {
        let mut offset = 0usize;
        for (ordinal, size) in self.0.iter().zip(axis_sizes) {
            offset = offset * size + *ordinal as usize;
        }
        offset
    }

    pub fn from_offset(mut offset: usize, axis_sizes: &[usize]) -> Self {
        let mut ordinals = vec![0u32; axis_sizes.len()];
        for (slot, size) in ordinals.iter_mut().zip(axis_sizes).rev() {
            if *size > 0 {
                *slot = (offset % size) as u32;
                offset /= size;
            }
        }
        Self(ordinals)
    }

    pub fn fits(&self, axis_sizes: &[usize]) -> bool {
        self.0.len() == axis_sizes.len()
            && self
                .0
                .iter()
                .zip(axis_sizes)
                .all(|(ordinal, size)| (*ordinal as usize) < *size)
    }
}

/// Product of axis sizes, saturating at `u64::MAX`.
pub fn cell_count(axis_sizes: &[usize]) -> u64 {
    axis_sizes
        .iter()
        .fold(1u64, |acc, size| acc.saturating_mul(*size as u64))
}

/// Numeric element of a dense array.
pub trait NumericCell: Copy + PartialEq + Default {
    fn to_datum(self) -> Datum;
    fn from_datum(datum: &Datum) -> Option<Self>;
    fn is_zero(self) -> bool {
        self == Self::default()
    }
}

impl NumericCell for f64 {
    fn to_datum(self) -> Datum {
        Datum::Double(self)
    }

    fn from_datum(datum: &Datum) -> Option<Self> {
        datum.as_f64()
    }
}

impl NumericCell for i64 {
    fn to_datum(self) -> Datum {
        Datum::Int(self)
    }

    fn from_datum(datum: &Datum) -> Option<Self> {
        datum.as_i64()
    }
}

/// Dense numeric array plus null indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseCells<T> {
    values: Vec<T>,
    nulls: RoaringBitmap,
}

impl<T: NumericCell> DenseCells<T> {
    /// Zero-initialised, every cell null.
    pub fn all_null(len: usize) -> Self {
        let mut nulls = RoaringBitmap::new();
        nulls.insert_range(0..len as u32);
        Self {
            values: vec![T::default(); len],
            nulls,
        }
    }

    pub fn from_parts(values: Vec<T>, nulls: RoaringBitmap) -> Self {
        Self { values, nulls }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn nulls(&self) -> &RoaringBitmap {
        &self.nulls
    }

    pub fn get(&self, offset: usize) -> Option<T> {
        let value = *self.values.get(offset)?;
        if value.is_zero() && self.nulls.contains(offset as u32) {
            None
        } else {
            Some(value)
        }
    }

    pub fn set(&mut self, offset: usize, value: Option<T>) {
        match value {
            Some(v) => {
                self.values[offset] = v;
                self.nulls.remove(offset as u32);
            }
            None => {
                self.values[offset] = T::default();
                self.nulls.insert(offset as u32);
            }
        }
    }

    pub fn populated_count(&self) -> usize {
        let null_cells = self
            .nulls
            .iter()
            .filter(|i| {
                self.values
                    .get(*i as usize)
                    .map_or(false, |v| v.is_zero())
            })
            .count();
        self.values.len() - null_cells
    }
}

/// Physical layout of segment cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellStorage {
    DenseDouble(DenseCells<f64>),
    DenseInt(DenseCells<i64>),
    DenseObject(Vec<Option<Datum>>),
    /// Cells not listed are null.
    Sparse(BTreeMap<CellKey, Datum>),
}

impl CellStorage {
    pub fn is_dense(&self) -> bool {
        !matches!(self, CellStorage::Sparse(_))
    }

    /// Allocated slots: array length for dense, entry count for sparse.
    pub fn size(&self) -> usize {
        match self {
            CellStorage::DenseDouble(cells) => cells.len(),
            CellStorage::DenseInt(cells) => cells.len(),
            CellStorage::DenseObject(values) => values.len(),
            CellStorage::Sparse(cells) => cells.len(),
        }
    }

    pub fn populated_count(&self) -> usize {
        match self {
            CellStorage::DenseDouble(cells) => cells.populated_count(),
            CellStorage::DenseInt(cells) => cells.populated_count(),
            CellStorage::DenseObject(values) => values.iter().filter(|v| v.is_some()).count(),
            CellStorage::Sparse(cells) => cells.len(),
        }
    }

    pub fn get(&self, key: &CellKey, axis_sizes: &[usize]) -> Option<Datum> {
        if !key.fits(axis_sizes) {
            return None;
        }
        match self {
            CellStorage::DenseDouble(cells) => cells.get(key.offset(axis_sizes)).map(f64::to_datum),
            CellStorage::DenseInt(cells) => cells.get(key.offset(axis_sizes)).map(i64::to_datum),
            CellStorage::DenseObject(values) => {
                values.get(key.offset(axis_sizes)).cloned().flatten()
            }
            CellStorage::Sparse(cells) => cells.get(key).cloned(),
        }
    }

    /// Stores `value`; `Datum::Null` clears the cell.
    pub fn set(&mut self, key: &CellKey, value: Datum, axis_sizes: &[usize]) -> Result<()> {
        if !key.fits(axis_sizes) {
            return Err(CacheError::InvalidBody(format!(
                "cell {:?} outside axes {:?}",
                key.ordinals(),
                axis_sizes
            )));
        }
        match self {
            CellStorage::DenseDouble(cells) => {
                let v = numeric_or_null::<f64>(&value, "double")?;
                cells.set(key.offset(axis_sizes), v);
            }
            CellStorage::DenseInt(cells) => {
                let v = numeric_or_null::<i64>(&value, "int")?;
                cells.set(key.offset(axis_sizes), v);
            }
            CellStorage::DenseObject(values) => {
                values[key.offset(axis_sizes)] = (!value.is_null()).then_some(value);
            }
            CellStorage::Sparse(cells) => {
                if value.is_null() {
                    cells.remove(key);
                } else {
                    cells.insert(key.clone(), value);
                }
            }
        }
        Ok(())
    }

    /// Populated cells in ascending key order.
    pub fn cells<'a>(
        &'a self,
        axis_sizes: &'a [usize],
    ) -> Box<dyn Iterator<Item = (CellKey, Datum)> + 'a> {
        match self {
            CellStorage::DenseDouble(cells) => Box::new((0..cells.len()).filter_map(move |i| {
                cells
                    .get(i)
                    .map(|v| (CellKey::from_offset(i, axis_sizes), v.to_datum()))
            })),
            CellStorage::DenseInt(cells) => Box::new((0..cells.len()).filter_map(move |i| {
                cells
                    .get(i)
                    .map(|v| (CellKey::from_offset(i, axis_sizes), v.to_datum()))
            })),
            CellStorage::DenseObject(values) => {
                Box::new(values.iter().enumerate().filter_map(move |(i, v)| {
                    v.as_ref()
                        .map(|v| (CellKey::from_offset(i, axis_sizes), v.clone()))
                }))
            }
            CellStorage::Sparse(cells) => {
                Box::new(cells.iter().map(|(k, v)| (k.clone(), v.clone())))
            }
        }
    }
}

fn numeric_or_null<T: NumericCell>(value: &Datum, kind: &str) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    T::from_datum(value)
        .map(Some)
        .ok_or_else(|| CacheError::InvalidBody(format!("{} is not a {} cell", value, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_round_trip() {
        let sizes = [3, 4, 2];
        let key = CellKey::new(vec![2, 1, 1]);
        let offset = key.offset(&sizes);
        assert_eq!(offset, 2 * 8 + 2 + 1);
        assert_eq!(CellKey::from_offset(offset, &sizes), key);
    }

    #[test]
    fn test_dense_null_encoding() {
        let mut cells = DenseCells::<f64>::all_null(3);
        assert_eq!(cells.get(0), None);
        cells.set(0, Some(0.0));
        cells.set(1, Some(5.0));
        assert_eq!(cells.get(0), Some(0.0));
        assert_eq!(cells.get(1), Some(5.0));
        assert_eq!(cells.get(2), None);
        assert_eq!(cells.populated_count(), 2);
    }

    #[test]
    fn test_nonzero_value_ignores_null_bit() {
        let mut nulls = RoaringBitmap::new();
        nulls.insert(0);
        nulls.insert(1);
        let cells = DenseCells::from_parts(vec![5.0, 0.0], nulls);
        assert_eq!(cells.get(0), Some(5.0));
        assert_eq!(cells.get(1), None);
    }

    #[test]
    fn test_cell_count_saturates() {
        assert_eq!(cell_count(&[usize::MAX, usize::MAX]), u64::MAX);
        assert_eq!(cell_count(&[]), 1);
    }
}
