//! Integration tests for segment cell storage

use luma_segment_cache::segment::DenseCells;
use proptest::prelude::*;
use roaring::RoaringBitmap;

proptest! {
    #[test]
    fn prop_dense_cells_keep_zero_and_null_apart(
        cells in proptest::collection::vec(proptest::option::of(-3i64..3), 1..64),
    ) {
        let mut dense = DenseCells::<i64>::all_null(cells.len());
        for (offset, value) in cells.iter().enumerate() {
            dense.set(offset, *value);
        }
        for (offset, value) in cells.iter().enumerate() {
            prop_assert_eq!(dense.get(offset), *value);
        }
        prop_assert_eq!(dense.populated_count(), cells.iter().filter(|v| v.is_some()).count());
    }
}

#[test]
fn test_null_bit_ignored_for_non_zero_value() {
    let mut nulls = RoaringBitmap::new();
    nulls.insert(0);
    nulls.insert(1);
    let dense = DenseCells::from_parts(vec![0.0f64, 2.5], nulls);
    assert_eq!(dense.get(0), None);
    assert_eq!(dense.get(1), Some(2.5));
    assert_eq!(dense.populated_count(), 1);
}
