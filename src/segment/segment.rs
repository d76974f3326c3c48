use super::axis::SegmentAxis;
use super::bitkey::BitKey;
use super::cells::CellKey;
use super::dataset::SegmentDataset;
use super::datum::Datum;
use super::header::{SegmentColumn, SegmentHeader};
use super::predicate::ColumnPredicate;
use crate::star::{Star, StarColumn, StarMeasure};
use crate::{CacheError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Header-equivalent descriptor of a segment, without cell data.
#[derive(Debug, Clone)]
pub struct Segment {
    star: Arc<Star>,
    measure: StarMeasure,
    bitkey: BitKey,
    columns: Vec<StarColumn>,
    predicates: Vec<ColumnPredicate>,
    excluded_regions: Vec<SegmentColumn>,
    compound_predicates: Vec<String>,
}

impl Segment {
    /// `columns` and `predicates` are parallel and get sorted by bit position.
    pub fn new(
        star: Arc<Star>,
        measure: StarMeasure,
        columns: Vec<StarColumn>,
        predicates: Vec<ColumnPredicate>,
        compound_predicates: Vec<String>,
    ) -> Self {
        let mut pairs: Vec<(StarColumn, ColumnPredicate)> =
            columns.into_iter().zip(predicates).collect();
        pairs.sort_by_key(|(c, _)| c.bit_position);
        let (columns, predicates): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let bitkey = star.bitkey_of(&columns);
        Self {
            star,
            measure,
            bitkey,
            columns,
            predicates,
            excluded_regions: Vec::new(),
            compound_predicates,
        }
    }

    /// Resolves a header's column expressions against `star`.
    pub fn from_header(star: Arc<Star>, measure: StarMeasure, header: &SegmentHeader) -> Result<Self> {
        let mut columns = Vec::with_capacity(header.arity());
        let mut predicates = Vec::with_capacity(header.arity());
        for column in header.constrained_columns() {
            let star_column = star
                .column_by_expression(column.expression())
                .cloned()
                .ok_or_else(|| CacheError::UnknownColumn(column.expression().to_string()))?;
            columns.push(star_column);
            predicates.push(ColumnPredicate::from_values(column.values()));
        }
        let mut segment = Segment::new(
            star,
            measure,
            columns,
            predicates,
            header.compound_predicates().to_vec(),
        );
        segment.excluded_regions = header.excluded_regions().to_vec();
        Ok(segment)
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn measure(&self) -> &StarMeasure {
        &self.measure
    }

    pub fn bitkey(&self) -> &BitKey {
        &self.bitkey
    }

    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    pub fn predicates(&self) -> &[ColumnPredicate] {
        &self.predicates
    }

    pub fn excluded_regions(&self) -> &[SegmentColumn] {
        &self.excluded_regions
    }

    pub fn header(&self) -> SegmentHeader {
        let columns = self
            .columns
            .iter()
            .zip(&self.predicates)
            .map(|(c, p)| SegmentColumn::new(c.expression.clone(), p.values().cloned()))
            .collect();
        SegmentHeader::new(
            self.star.fact_key(&self.measure),
            self.bitkey.clone(),
            columns,
            self.compound_predicates.clone(),
        )
        .with_excluded_regions(self.excluded_regions.clone())
    }
}

/// A segment with its axes and cells attached.
#[derive(Debug, Clone)]
pub struct SegmentWithData {
    segment: Segment,
    axes: Arc<[SegmentAxis]>,
    data: Arc<SegmentDataset>,
}

impl SegmentWithData {
    pub fn new(segment: Segment, axes: Vec<SegmentAxis>, data: SegmentDataset) -> Result<Self> {
        if axes.len() != segment.columns().len() || data.axis_sizes().len() != axes.len() {
            return Err(CacheError::InvalidBody(format!(
                "segment has {} columns, {} axes, {} dataset axes",
                segment.columns().len(),
                axes.len(),
                data.axis_sizes().len()
            )));
        }
        Ok(Self {
            segment,
            axes: axes.into(),
            data: Arc::new(data),
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn header(&self) -> SegmentHeader {
        self.segment.header()
    }

    pub fn axes(&self) -> &[SegmentAxis] {
        &self.axes
    }

    pub fn data(&self) -> &SegmentDataset {
        &self.data
    }

    /// Coordinate of the cell addressed by one key per axis.
    pub fn cell_key(&self, keys: &[Datum]) -> Option<CellKey> {
        if keys.len() != self.axes.len() {
            return None;
        }
        let ordinals = self
            .axes
            .iter()
            .zip(keys)
            .map(|(axis, key)| axis.offset_of(key).map(|o| o as u32))
            .collect::<Option<Vec<_>>>()?;
        Some(CellKey::new(ordinals))
    }

    pub fn get_cell_value(&self, keys: &[Datum]) -> Option<Datum> {
        self.cell_key(keys).and_then(|key| self.data.get(&key))
    }

    /// New segment holding only the listed keys per axis; `None` keeps an
    /// axis whole.
    pub fn create_sub_segment(&self, keep: &[Option<BTreeSet<Datum>>]) -> Result<SegmentWithData> {
        if keep.len() != self.axes.len() {
            return Err(CacheError::InvalidBody(format!(
                "sub-segment names {} axes, segment has {}",
                keep.len(),
                self.axes.len()
            )));
        }
        let mut axes = Vec::with_capacity(self.axes.len());
        let mut maps = Vec::with_capacity(self.axes.len());
        for (axis, wanted) in self.axes.iter().zip(keep) {
            let accept = |key: &Datum| wanted.as_ref().map_or(true, |w| w.contains(key));
            maps.push(ordinal_map(axis, accept));
            axes.push(match wanted {
                None => axis.clone(),
                Some(_) => axis.restrict(accept),
            });
        }
        let data = self.data.restrict(&maps)?;
        let mut segment = self.segment.clone();
        segment.predicates = self
            .segment
            .predicates
            .iter()
            .zip(keep)
            .map(|(old, wanted)| match (old, wanted) {
                (_, None) => old.clone(),
                (ColumnPredicate::True, Some(w)) => ColumnPredicate::Values(w.clone()),
                (ColumnPredicate::Values(v), Some(w)) => {
                    ColumnPredicate::Values(v.intersection(w).cloned().collect())
                }
            })
            .collect();
        SegmentWithData::new(segment, axes, data)
    }
}

/// Old-ordinal to new-ordinal table for the keys of `axis` that `keep`
/// accepts. Surviving ordinals stay in order, null bucket last.
pub(crate) fn ordinal_map(axis: &SegmentAxis, keep: impl Fn(&Datum) -> bool) -> Vec<Option<u32>> {
    let mut next = 0u32;
    (0..axis.ordinal_count())
        .map(|ordinal| {
            let key = axis.key_at(ordinal)?;
            if keep(key) {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::segment::dataset::DatasetKind;

    fn star() -> Arc<Star> {
        Arc::new(Star::new(
            "FoodMart",
            "v1",
            "sales",
            vec![
                StarColumn::new(0, "state", "store.state"),
                StarColumn::new(1, "year", "time.year"),
            ],
        ))
    }

    fn loaded() -> SegmentWithData {
        let star = star();
        let measure = StarMeasure::new("Unit Sales", "Sales", Aggregator::Sum);
        let segment = Segment::new(
            star.clone(),
            measure,
            star.columns().to_vec(),
            vec![ColumnPredicate::True, ColumnPredicate::values_of([1997])],
            vec![],
        );
        let axes = vec![
            SegmentAxis::new(
                ColumnPredicate::True,
                ["CA", "OR", "WA"].into_iter().map(Datum::from).collect(),
                true,
            ),
            SegmentAxis::new(
                ColumnPredicate::values_of([1997]),
                [Datum::from(1997)].into_iter().collect(),
                false,
            ),
        ];
        let mut data = SegmentDataset::for_axes(DatasetKind::DenseDouble, &axes).unwrap();
        data.put(&CellKey::new(vec![0, 0]), Datum::from(10.0)).unwrap();
        data.put(&CellKey::new(vec![2, 0]), Datum::from(30.0)).unwrap();
        data.put(&CellKey::new(vec![3, 0]), Datum::from(5.0)).unwrap();
        SegmentWithData::new(segment, axes, data).unwrap()
    }

    #[test]
    fn test_header_from_segment() {
        let swd = loaded();
        let header = swd.header();
        assert_eq!(header.arity(), 2);
        assert!(header.constrained_columns()[0].is_wildcard());
        assert_eq!(header.measure_name(), "Unit Sales");
        let back = Segment::from_header(star(), swd.segment().measure().clone(), &header).unwrap();
        assert_eq!(back.header(), header);
    }

    #[test]
    fn test_cell_lookup_including_null_bucket() {
        let swd = loaded();
        assert_eq!(
            swd.get_cell_value(&[Datum::from("WA"), Datum::from(1997)]),
            Some(Datum::from(30.0))
        );
        assert_eq!(
            swd.get_cell_value(&[Datum::Null, Datum::from(1997)]),
            Some(Datum::from(5.0))
        );
        assert_eq!(swd.get_cell_value(&[Datum::from("OR"), Datum::from(1997)]), None);
        assert_eq!(swd.get_cell_value(&[Datum::from("TX"), Datum::from(1997)]), None);
    }

    #[test]
    fn test_sub_segment_is_a_new_instance() {
        let swd = loaded();
        let wanted: BTreeSet<Datum> = [Datum::from("WA")].into_iter().collect();
        let sub = swd.create_sub_segment(&[Some(wanted), None]).unwrap();
        assert_eq!(sub.axes()[0].keys(), &[Datum::from("WA")]);
        assert!(!sub.axes()[0].has_null());
        assert_eq!(
            sub.get_cell_value(&[Datum::from("WA"), Datum::from(1997)]),
            Some(Datum::from(30.0))
        );
        assert_eq!(sub.data().populated_count(), 1);
        assert_eq!(swd.data().populated_count(), 3);
        assert!(!sub.header().constrained_columns()[0].is_wildcard());
    }

    #[test]
    fn test_unknown_column_rejected() {
        let header = loaded().header();
        let other = Arc::new(Star::new("FoodMart", "v1", "sales", vec![]));
        let err = Segment::from_header(
            other,
            StarMeasure::new("Unit Sales", "Sales", Aggregator::Sum),
            &header,
        );
        assert!(matches!(err, Err(CacheError::UnknownColumn(_))));
    }
}
