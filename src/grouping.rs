//! Grouping sets planner
//!
//! One SQL statement with `GROUP BY GROUPING SETS (...)` can load several
//! granularities at once. Rows then carry `GROUPING()` flags telling which
//! columns were aggregated away; this module computes where those flags
//! sit in the result and how to map them back to a grouping set.

use crate::segment::{BitKey, Segment};
use crate::star::StarColumn;

/// One granularity of a batched load: the columns grouped by and the
/// segments (one per measure) it fills.
#[derive(Debug, Clone)]
pub struct GroupingSet {
    columns: Vec<StarColumn>,
    segments: Vec<Segment>,
}

impl GroupingSet {
    /// Columns are kept in bit-position order.
    pub fn new(mut columns: Vec<StarColumn>, segments: Vec<Segment>) -> Self {
        columns.sort_by_key(|c| c.bit_position);
        columns.dedup_by_key(|c| c.bit_position);
        Self { columns, segments }
    }

    /// Grouping set over the columns of `segments`, which must agree.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        let columns = segments
            .first()
            .map(|s| s.columns().to_vec())
            .unwrap_or_default();
        Self::new(columns, segments)
    }

    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn measure_count(&self) -> usize {
        self.segments.len()
    }

    pub fn contains(&self, column: &StarColumn) -> bool {
        self.columns
            .binary_search_by_key(&column.bit_position, |c| c.bit_position)
            .is_ok()
    }
}

/// Ordered grouping sets of one statement. Index 0 is the detail set.
#[derive(Debug, Clone)]
pub struct GroupingSetsList {
    grouping_sets: Vec<GroupingSet>,
    rollup_columns: Vec<StarColumn>,
    column_index_to_grouping_index: Vec<Option<usize>>,
    rollup_columns_bitkey_list: Vec<BitKey>,
    grouping_bit_key_index: Option<usize>,
}

impl GroupingSetsList {
    pub fn new(grouping_sets: Vec<GroupingSet>) -> Self {
        let use_grouping_sets = grouping_sets.len() > 1;
        if !use_grouping_sets {
            return Self {
                grouping_sets,
                rollup_columns: Vec::new(),
                column_index_to_grouping_index: Vec::new(),
                rollup_columns_bitkey_list: vec![BitKey::new(0)],
                grouping_bit_key_index: None,
            };
        }

        let detail = &grouping_sets[0];
        let rollup_columns: Vec<StarColumn> = detail
            .columns()
            .iter()
            .filter(|c| grouping_sets[1..].iter().any(|g| !g.contains(c)))
            .cloned()
            .collect();

        let column_index_to_grouping_index = detail
            .columns()
            .iter()
            .map(|c| {
                rollup_columns
                    .iter()
                    .position(|r| r.bit_position == c.bit_position)
            })
            .collect();

        let rollup_columns_bitkey_list = grouping_sets
            .iter()
            .map(|g| {
                BitKey::from_positions(
                    rollup_columns.len(),
                    rollup_columns
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| !g.contains(c))
                        .map(|(j, _)| j),
                )
            })
            .collect();

        let grouping_bit_key_index = Some(detail.columns().len() + detail.measure_count());

        Self {
            grouping_sets,
            rollup_columns,
            column_index_to_grouping_index,
            rollup_columns_bitkey_list,
            grouping_bit_key_index,
        }
    }

    pub fn use_grouping_sets(&self) -> bool {
        self.grouping_sets.len() > 1
    }

    pub fn grouping_sets(&self) -> &[GroupingSet] {
        &self.grouping_sets
    }

    pub fn detail(&self) -> Option<&GroupingSet> {
        self.grouping_sets.first()
    }

    pub fn rollups(&self) -> &[GroupingSet] {
        self.grouping_sets.get(1..).unwrap_or_default()
    }

    /// Detail columns aggregated away by at least one rollup set, in bit order.
    pub fn rollup_columns(&self) -> &[StarColumn] {
        &self.rollup_columns
    }

    /// Position of each detail column among the rollup columns; `None` for
    /// columns every set groups by.
    pub fn column_index_to_grouping_index(&self) -> &[Option<usize>] {
        &self.column_index_to_grouping_index
    }

    /// Per grouping set, bit `j` set iff `rollup_columns[j]` is absent.
    pub fn rollup_columns_bitkey_list(&self) -> &[BitKey] {
        &self.rollup_columns_bitkey_list
    }

    /// Result column where the `GROUPING()` outputs begin.
    pub fn grouping_bit_key_index(&self) -> Option<usize> {
        self.grouping_bit_key_index
    }

    /// Index of the grouping set that produced a row, given the row's
    /// `GROUPING()` outputs in rollup-column order.
    pub fn grouping_set_for_row(&self, grouping_flags: &[bool]) -> Option<usize> {
        if !self.use_grouping_sets() {
            return (!self.grouping_sets.is_empty()).then_some(0);
        }
        if grouping_flags.len() != self.rollup_columns.len() {
            return None;
        }
        let key = BitKey::from_positions(
            self.rollup_columns.len(),
            grouping_flags
                .iter()
                .enumerate()
                .filter(|(_, set)| **set)
                .map(|(j, _)| j),
        );
        self.rollup_columns_bitkey_list
            .iter()
            .position(|k| *k == key)
    }
}
