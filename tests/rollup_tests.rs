//! Integration tests for the rollup engine

use luma_segment_cache::segment::{CellStorage, FactKey};
use luma_segment_cache::{
    rollup, Aggregator, BitKey, CacheError, CellKey, Datum, RollupThresholds, SegmentBody,
    SegmentColumn, SegmentHeader,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const YEARS: [i64; 3] = [1997, 1998, 1999];

fn fact() -> FactKey {
    FactKey {
        schema_name: "FoodMart".into(),
        schema_checksum: "v1".into(),
        cube_name: "Sales".into(),
        measure_name: "Unit Sales".into(),
        fact_table: "sales_fact".into(),
    }
}

fn header(state: &str) -> SegmentHeader {
    SegmentHeader::new(
        fact(),
        BitKey::from_positions(2, [0, 1]),
        vec![
            SegmentColumn::of_values("store.state", [state]),
            SegmentColumn::wildcard("time.year"),
        ],
        vec![],
    )
}

/// One state by the three years; `None` cells are left out.
fn body(state: &str, cells: &[Option<i64>], null_year: Option<i64>) -> SegmentBody {
    let mut map: BTreeMap<CellKey, Datum> = cells
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (CellKey::new(vec![0, i as u32]), Datum::from(v))))
        .collect();
    if let Some(v) = null_year {
        map.insert(CellKey::new(vec![0, YEARS.len() as u32]), Datum::from(v));
    }
    SegmentBody::new(
        vec![
            vec![Datum::from(state)],
            YEARS.iter().map(|y| Datum::from(*y)).collect(),
        ],
        vec![false, null_year.is_some()],
        CellStorage::Sparse(map),
    )
    .unwrap()
}

fn by_year() -> BTreeSet<String> {
    ["time.year".to_string()].into_iter().collect()
}

#[cfg(test)]
mod merge_tests {
    use super::*;

    #[test]
    fn test_states_sum_into_years() {
        let sources = vec![
            (header("CA"), Arc::new(body("CA", &[Some(1), Some(2), None], None))),
            (header("OR"), Arc::new(body("OR", &[Some(10), None, None], None))),
            (header("WA"), Arc::new(body("WA", &[None, Some(5), None], None))),
        ];
        let (h, b) = rollup(&sources, &by_year(), Aggregator::Sum, RollupThresholds::default()).unwrap();

        assert_eq!(h.arity(), 1);
        assert_eq!(h.constrained_columns()[0].expression(), "time.year");
        assert!(h.constrained_column("store.state").is_none());
        assert_eq!(b.get(&CellKey::new(vec![0])), Some(Datum::from(11i64)));
        assert_eq!(b.get(&CellKey::new(vec![1])), Some(Datum::from(7i64)));
        assert_eq!(b.get(&CellKey::new(vec![2])), None);
    }

    #[test]
    fn test_null_year_bucket_propagates() {
        let sources = vec![
            (header("CA"), Arc::new(body("CA", &[Some(1), None, None], Some(3)))),
            (header("OR"), Arc::new(body("OR", &[Some(2), None, None], Some(4)))),
        ];
        let (_, b) = rollup(&sources, &by_year(), Aggregator::Sum, RollupThresholds::default()).unwrap();
        assert_eq!(b.null_axis_flags(), &[true]);
        assert_eq!(b.get(&CellKey::new(vec![YEARS.len() as u32])), Some(Datum::from(7i64)));
    }

    #[test]
    fn test_min_max_roll_up() {
        let sources = vec![
            (header("CA"), Arc::new(body("CA", &[Some(8), None, None], None))),
            (header("OR"), Arc::new(body("OR", &[Some(3), None, None], None))),
        ];
        let (_, min) = rollup(&sources, &by_year(), Aggregator::Min, RollupThresholds::default()).unwrap();
        let (_, max) = rollup(&sources, &by_year(), Aggregator::Max, RollupThresholds::default()).unwrap();
        assert_eq!(min.get(&CellKey::new(vec![0])), Some(Datum::from(3i64)));
        assert_eq!(max.get(&CellKey::new(vec![0])), Some(Datum::from(8i64)));
    }

    #[test]
    fn test_sparse_forced_above_cell_limit() {
        let sources = vec![(
            header("CA"),
            Arc::new(body("CA", &[Some(1), Some(2), Some(3)], None)),
        )];
        let dense = rollup(&sources, &by_year(), Aggregator::Sum, RollupThresholds::default()).unwrap();
        assert!(dense.1.is_dense());

        let capped = RollupThresholds {
            max_cell_count: 2,
            ..RollupThresholds::default()
        };
        let (_, sparse) = rollup(&sources, &by_year(), Aggregator::Sum, capped).unwrap();
        assert!(!sparse.is_dense());
        assert_eq!(sparse.get(&CellKey::new(vec![2])), Some(Datum::from(3i64)));
    }

    #[test]
    fn test_unknown_keep_column_rejected() {
        let sources = vec![(header("CA"), Arc::new(body("CA", &[Some(1), None, None], None)))];
        let keep: BTreeSet<String> = ["product.family".to_string()].into_iter().collect();
        let err = rollup(&sources, &keep, Aggregator::Sum, RollupThresholds::default());
        assert_eq!(err.unwrap_err(), CacheError::UnknownColumn("product.family".into()));
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = rollup(&[], &by_year(), Aggregator::Sum, RollupThresholds::default());
        assert!(matches!(err, Err(CacheError::IncompatibleSegments(_))));
    }
}

proptest! {
    #[test]
    fn prop_rollup_ignores_source_order(
        ca in proptest::collection::vec(proptest::option::of(-1000i64..1000), 3),
        or in proptest::collection::vec(proptest::option::of(-1000i64..1000), 3),
    ) {
        let a = (header("CA"), Arc::new(body("CA", &ca, None)));
        let b = (header("OR"), Arc::new(body("OR", &or, None)));

        let forward = rollup(&[a.clone(), b.clone()], &by_year(), Aggregator::Sum, RollupThresholds::default()).unwrap();
        let backward = rollup(&[b, a], &by_year(), Aggregator::Sum, RollupThresholds::default()).unwrap();
        prop_assert_eq!(&forward.0, &backward.0);
        prop_assert_eq!(forward.1.value_map(), backward.1.value_map());

        for (i, (x, y)) in ca.iter().zip(&or).enumerate() {
            let expected = match (x, y) {
                (None, None) => None,
                _ => Some(Datum::from(x.unwrap_or(0) + y.unwrap_or(0))),
            };
            prop_assert_eq!(forward.1.get(&CellKey::new(vec![i as u32])), expected);
        }
    }
}
